use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::StreamExt;
use domus_core::{
    LifecycleError, LifecycleEvent, LifecycleEventKind, LifecycleStore, RequestContext,
};
use domus_platform::{PgLedger, RedisBus, ServiceConfig, connect_database, run_migrations};
use redis::Msg;
use serde_json::json;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "domus_ops=info".to_string()),
        )
        .init();

    let config = ServiceConfig::worker_from_env()?;
    let pool = connect_database(&config.database_url).await?;
    run_migrations(&pool).await?;
    let template = config.contract_template()?;
    let store: Arc<dyn LifecycleStore> = Arc::new(PgLedger::new(pool, template));
    let redis = RedisBus::connect(&config.redis_url)?;

    tokio::spawn(run_warning_sweep(
        store.clone(),
        redis.clone(),
        config.warning_sweep_secs,
        config.auto_warning_interval_days,
    ));

    let signed_channel = LifecycleEventKind::ContractSigned.channel();
    let mut pubsub = redis.client().get_async_pubsub().await?;
    pubsub.subscribe(signed_channel).await?;
    let mut messages = pubsub.on_message();

    info!("ops worker subscribed to {signed_channel}");

    loop {
        let msg = messages
            .next()
            .await
            .with_context(|| format!("{signed_channel} stream ended unexpectedly"))?;
        if let Err(err) = handle_message(store.as_ref(), &redis, msg).await {
            error!("failed to process message: {err:#}");
        }
    }
}

async fn handle_message(store: &dyn LifecycleStore, redis: &RedisBus, msg: Msg) -> Result<()> {
    let payload: String = msg.get_payload()?;
    let event: LifecycleEvent = serde_json::from_str(&payload)?;

    if let Some(generated) = invoice_signed_contract(store, &event).await? {
        redis.publish_event(&generated).await?;
    }
    Ok(())
}

/// Generates the recurring invoices of a contract once both parties have signed.
/// Returns the event to publish, or `None` when there was nothing to do.
async fn invoice_signed_contract(
    store: &dyn LifecycleStore,
    event: &LifecycleEvent,
) -> Result<Option<LifecycleEvent>> {
    if event.kind != LifecycleEventKind::ContractSigned {
        return Ok(None);
    }

    let ctx = RequestContext::system(Utc::now().date_naive());
    match store.generate_invoices(&ctx, event.claim_id).await {
        Ok(invoices) => {
            info!(
                "generated {} invoice(s) for claim {}",
                invoices.len(),
                event.claim_id
            );
            Ok(Some(LifecycleEvent::new(
                event.claim_id,
                LifecycleEventKind::InvoicesGenerated,
                ctx.actor_id,
                json!({ "count": invoices.len() }),
            )))
        }
        Err(LifecycleError::AlreadyExists { detail, .. }) => {
            info!("skipping invoice generation: {detail}");
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

async fn run_warning_sweep(
    store: Arc<dyn LifecycleStore>,
    redis: RedisBus,
    every_secs: u64,
    interval_days: i64,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(every_secs));
    info!("automatic warning sweep every {every_secs}s, {interval_days} day(s) between warnings");

    loop {
        ticker.tick().await;
        if let Err(err) = sweep_once(store.as_ref(), &redis, interval_days).await {
            error!("automatic warning sweep failed: {err:#}");
        }
    }
}

async fn sweep_once(store: &dyn LifecycleStore, redis: &RedisBus, interval_days: i64) -> Result<()> {
    let ctx = RequestContext::system(Utc::now().date_naive());
    let issued = store.issue_automatic_warnings(&ctx, interval_days).await?;
    if !issued.is_empty() {
        info!("issued {} automatic warning(s)", issued.len());
    }

    for warning in &issued {
        let event = LifecycleEvent::new(
            warning.claim_id,
            LifecycleEventKind::WarningIssued,
            ctx.actor_id,
            json!({
                "warning_id": warning.id,
                "invoice_id": warning.invoice_id,
                "warning_type": warning.warning_type,
            }),
        );
        if let Err(err) = redis.publish_event(&event).await {
            warn!("failed to publish warning {}: {err:#}", warning.id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use domus_contracts::{ContractTemplate, default_terms};
    use domus_core::{
        ActorRole, ClaimSource, ClaimType, ContractTerms, NewClaim, PaymentType,
    };
    use domus_ledger::InMemoryLedger;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use super::*;

    async fn signed_claim(ledger: &InMemoryLedger) -> Uuid {
        let today = Utc::now().date_naive();
        let owner_id = ledger.register_owner("Samuel Kiptoo").await;
        let client_id = ledger.register_client("Grace Wanjiru").await;
        let property = ledger
            .register_property(owner_id, "Plot 14, Kilimani")
            .await
            .unwrap();
        let client = RequestContext::new(client_id, ActorRole::Client, today);
        let owner = RequestContext::new(owner_id, ActorRole::Owner, today);
        let accountant = RequestContext::new(Uuid::new_v4(), ActorRole::Accountant, today);
        let general_manager = RequestContext::new(Uuid::new_v4(), ActorRole::GeneralManager, today);

        let claim = ledger
            .create_claim(
                &client,
                NewClaim {
                    property_id: property.id,
                    claim_type: ClaimType::Rent,
                    claim_source: ClaimSource::RentalPropertyManagement,
                },
            )
            .await
            .unwrap();
        for payment_type in [PaymentType::Deposit, PaymentType::Claim] {
            let payment = ledger
                .claim_overview(&accountant, claim.id)
                .await
                .unwrap()
                .payments
                .into_iter()
                .find(|payment| payment.payment_type == payment_type)
                .unwrap();
            ledger
                .upload_payment_invoice(&accountant, payment.id, "invoices/reservation.pdf")
                .await
                .unwrap();
            ledger
                .upload_payment_proof(&client, payment.id, "proofs/reservation.pdf")
                .await
                .unwrap();
            ledger.confirm_payment(&accountant, payment.id).await.unwrap();
        }

        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let terms = ContractTerms {
            end_date: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
            monthly_amount: Decimal::new(45_000, 0),
            ..default_terms(start)
        };
        ledger
            .save_contract(&general_manager, claim.id, terms)
            .await
            .unwrap();
        ledger.lock_contract(&general_manager, claim.id).await.unwrap();
        ledger.sign_contract(&client, claim.id, "G. Wanjiru").await.unwrap();
        ledger.sign_contract(&owner, claim.id, "S. Kiptoo").await.unwrap();
        claim.id
    }

    fn ledger() -> InMemoryLedger {
        InMemoryLedger::new(
            ContractTemplate::parse("Lease for {{PROPERTY_ADDRESS}} at {{MONTHLY_AMOUNT}}")
                .unwrap(),
        )
    }

    fn signed_event(claim_id: Uuid) -> LifecycleEvent {
        LifecycleEvent::new(
            claim_id,
            LifecycleEventKind::ContractSigned,
            Uuid::new_v4(),
            json!({}),
        )
    }

    #[tokio::test]
    async fn signed_contract_gets_invoiced_once() {
        let ledger = ledger();
        let claim_id = signed_claim(&ledger).await;

        let event = invoice_signed_contract(&ledger, &signed_event(claim_id))
            .await
            .unwrap()
            .expect("invoices generated");
        assert_eq!(event.kind, LifecycleEventKind::InvoicesGenerated);
        assert_eq!(event.claim_id, claim_id);
        assert_eq!(event.payload["count"], 6);

        let replay = invoice_signed_contract(&ledger, &signed_event(claim_id))
            .await
            .unwrap();
        assert!(replay.is_none());
    }

    #[tokio::test]
    async fn other_events_are_ignored() {
        let ledger = ledger();
        let event = LifecycleEvent::new(
            Uuid::new_v4(),
            LifecycleEventKind::NoticeSent,
            Uuid::new_v4(),
            json!({}),
        );
        assert!(invoice_signed_contract(&ledger, &event).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_claim_is_an_error() {
        let ledger = ledger();
        let result = invoice_signed_contract(&ledger, &signed_event(Uuid::new_v4())).await;
        assert!(result.is_err());
    }
}
