use std::{net::SocketAddr, str::FromStr, sync::Arc};

use anyhow::Result as AnyResult;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use chrono::Utc;
use domus_core::{
    ActorRole, Claim, ClaimOverview, ClaimPayment, ConfirmOutcome, ContractPhase, ContractTerms,
    LifecycleError, LifecycleEvent, LifecycleEventKind, LifecycleStore, NewClaim,
    RecurringInvoice, RentNotice, RentWarning, RentalContract, RequestContext, Termination,
};
use domus_platform::{
    GeneratedInvoicesResponse, InvoiceListResponse, PgLedger, RedisBus, ScheduleMeetingRequest,
    SendNoticeRequest, ServiceConfig, SignContractRequest, UploadDocumentRequest,
    WarningListResponse, WarningRequest, connect_database, run_migrations,
};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

const ACTOR_ID_HEADER: &str = "x-actor-id";
const ACTOR_ROLE_HEADER: &str = "x-actor-role";

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

#[derive(Clone)]
struct AppState {
    store: Arc<dyn LifecycleStore>,
    redis: RedisBus,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "domus_gateway=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;
    let pool = connect_database(&config.database_url).await?;
    run_migrations(&pool).await?;
    let template = config.contract_template()?;
    let redis = RedisBus::connect(&config.redis_url)?;

    let state = AppState {
        store: Arc::new(PgLedger::new(pool, template)),
        redis,
    };
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/claims", post(create_claim))
        .route("/claims/{claim_id}", get(claim_overview))
        .route("/payments/{payment_id}/invoice", post(upload_payment_invoice))
        .route("/payments/{payment_id}/proof", post(upload_payment_proof))
        .route("/payments/{payment_id}/confirm", post(confirm_payment))
        .route(
            "/claims/{claim_id}/contract",
            get(get_contract).put(save_contract),
        )
        .route("/claims/{claim_id}/contract/lock", post(lock_contract))
        .route("/claims/{claim_id}/contract/unlock", post(unlock_contract))
        .route("/claims/{claim_id}/contract/restore", post(restore_contract))
        .route("/claims/{claim_id}/contract/renew", post(renew_contract))
        .route("/claims/{claim_id}/contract/sign", post(sign_contract))
        .route("/claims/{claim_id}/contract/meeting", post(schedule_meeting))
        .route(
            "/claims/{claim_id}/contract/terminate",
            post(terminate_contract),
        )
        .route(
            "/claims/{claim_id}/invoices/generate",
            post(generate_invoices),
        )
        .route("/claims/{claim_id}/invoices", get(list_invoices))
        .route("/invoices/{invoice_id}/proof", post(upload_invoice_proof))
        .route("/invoices/{invoice_id}/confirm", post(confirm_invoice))
        .route(
            "/invoices/{invoice_id}/warnings/automatic",
            post(record_automatic_warning),
        )
        .route(
            "/invoices/{invoice_id}/warnings/manual",
            post(send_manual_warning),
        )
        .route("/claims/{claim_id}/warnings", get(list_warnings))
        .route("/claims/{claim_id}/notices", post(send_notice))
        .route("/notices/{notice_id}/cancel", post(cancel_notice))
        .with_state(state);

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn create_claim(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NewClaim>,
) -> ApiResult<Claim> {
    let ctx = request_context(&headers)?;
    let claim = state
        .store
        .create_claim(&ctx, payload)
        .await
        .map_err(lifecycle_error)?;
    Ok(Json(claim))
}

async fn claim_overview(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(claim_id): Path<Uuid>,
) -> ApiResult<ClaimOverview> {
    let ctx = request_context(&headers)?;
    let overview = state
        .store
        .claim_overview(&ctx, claim_id)
        .await
        .map_err(lifecycle_error)?;
    Ok(Json(overview))
}

async fn upload_payment_invoice(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(payment_id): Path<Uuid>,
    Json(payload): Json<UploadDocumentRequest>,
) -> ApiResult<ClaimPayment> {
    let ctx = request_context(&headers)?;
    let payment = state
        .store
        .upload_payment_invoice(&ctx, payment_id, &payload.path)
        .await
        .map_err(lifecycle_error)?;
    Ok(Json(payment))
}

async fn upload_payment_proof(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(payment_id): Path<Uuid>,
    Json(payload): Json<UploadDocumentRequest>,
) -> ApiResult<ClaimPayment> {
    let ctx = request_context(&headers)?;
    let payment = state
        .store
        .upload_payment_proof(&ctx, payment_id, &payload.path)
        .await
        .map_err(lifecycle_error)?;
    Ok(Json(payment))
}

async fn confirm_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(payment_id): Path<Uuid>,
) -> ApiResult<ConfirmOutcome<ClaimPayment>> {
    let ctx = request_context(&headers)?;
    let outcome = state
        .store
        .confirm_payment(&ctx, payment_id)
        .await
        .map_err(lifecycle_error)?;

    if let ConfirmOutcome::Confirmed { record, effects } = &outcome {
        let payload = json!({
            "payment_id": record.id,
            "payment_type": record.payment_type,
            "effects": effects,
        });
        dispatch(&state, &ctx, record.claim_id, LifecycleEventKind::PaymentConfirmed, payload)
            .await;
    }
    Ok(Json(outcome))
}

async fn get_contract(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(claim_id): Path<Uuid>,
) -> ApiResult<RentalContract> {
    let ctx = request_context(&headers)?;
    let contract = state
        .store
        .contract(&ctx, claim_id)
        .await
        .map_err(lifecycle_error)?;
    Ok(Json(contract))
}

async fn save_contract(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(claim_id): Path<Uuid>,
    Json(terms): Json<ContractTerms>,
) -> ApiResult<RentalContract> {
    let ctx = request_context(&headers)?;
    let contract = state
        .store
        .save_contract(&ctx, claim_id, terms)
        .await
        .map_err(lifecycle_error)?;
    Ok(Json(contract))
}

async fn lock_contract(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(claim_id): Path<Uuid>,
) -> ApiResult<RentalContract> {
    let ctx = request_context(&headers)?;
    let contract = state
        .store
        .lock_contract(&ctx, claim_id)
        .await
        .map_err(lifecycle_error)?;

    let payload = json!({
        "contract_id": contract.id,
        "next_revision_date": contract.next_revision_date,
    });
    dispatch(&state, &ctx, claim_id, LifecycleEventKind::ContractLocked, payload).await;
    Ok(Json(contract))
}

async fn unlock_contract(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(claim_id): Path<Uuid>,
) -> ApiResult<RentalContract> {
    let ctx = request_context(&headers)?;
    let contract = state
        .store
        .unlock_contract(&ctx, claim_id)
        .await
        .map_err(lifecycle_error)?;
    Ok(Json(contract))
}

async fn restore_contract(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(claim_id): Path<Uuid>,
) -> ApiResult<RentalContract> {
    let ctx = request_context(&headers)?;
    let contract = state
        .store
        .restore_contract_from_template(&ctx, claim_id)
        .await
        .map_err(lifecycle_error)?;
    Ok(Json(contract))
}

async fn renew_contract(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(claim_id): Path<Uuid>,
) -> ApiResult<RentalContract> {
    let ctx = request_context(&headers)?;
    let contract = state
        .store
        .renew_contract(&ctx, claim_id)
        .await
        .map_err(lifecycle_error)?;
    Ok(Json(contract))
}

async fn sign_contract(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(claim_id): Path<Uuid>,
    Json(payload): Json<SignContractRequest>,
) -> ApiResult<RentalContract> {
    let ctx = request_context(&headers)?;
    let contract = state
        .store
        .sign_contract(&ctx, claim_id, &payload.signature)
        .await
        .map_err(lifecycle_error)?;

    if contract.phase() == ContractPhase::Signed {
        let payload = json!({ "contract_id": contract.id });
        dispatch(&state, &ctx, claim_id, LifecycleEventKind::ContractSigned, payload).await;
    }
    Ok(Json(contract))
}

async fn schedule_meeting(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(claim_id): Path<Uuid>,
    Json(payload): Json<ScheduleMeetingRequest>,
) -> ApiResult<RentalContract> {
    let ctx = request_context(&headers)?;
    let contract = state
        .store
        .schedule_signing_meeting(&ctx, claim_id, payload.at)
        .await
        .map_err(lifecycle_error)?;
    Ok(Json(contract))
}

async fn terminate_contract(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(claim_id): Path<Uuid>,
    Json(termination): Json<Termination>,
) -> ApiResult<RentalContract> {
    let ctx = request_context(&headers)?;
    let contract = state
        .store
        .terminate_contract(&ctx, claim_id, termination)
        .await
        .map_err(lifecycle_error)?;

    let payload = json!({
        "contract_id": contract.id,
        "termination_type": contract.termination_type,
        "actual_end_date": contract.actual_end_date,
    });
    dispatch(&state, &ctx, claim_id, LifecycleEventKind::ContractTerminated, payload).await;
    Ok(Json(contract))
}

async fn generate_invoices(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(claim_id): Path<Uuid>,
) -> ApiResult<GeneratedInvoicesResponse> {
    let ctx = request_context(&headers)?;
    let items = state
        .store
        .generate_invoices(&ctx, claim_id)
        .await
        .map_err(lifecycle_error)?;

    let payload = json!({ "count": items.len() });
    dispatch(&state, &ctx, claim_id, LifecycleEventKind::InvoicesGenerated, payload).await;
    Ok(Json(GeneratedInvoicesResponse {
        claim_id,
        generated: items.len(),
        items,
    }))
}

async fn list_invoices(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(claim_id): Path<Uuid>,
) -> ApiResult<InvoiceListResponse> {
    let ctx = request_context(&headers)?;
    let items = state
        .store
        .invoices(&ctx, claim_id)
        .await
        .map_err(lifecycle_error)?;

    Ok(Json(InvoiceListResponse {
        claim_id,
        current: domus_billing::current_invoice(&items).cloned(),
        items,
    }))
}

async fn upload_invoice_proof(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<UploadDocumentRequest>,
) -> ApiResult<RecurringInvoice> {
    let ctx = request_context(&headers)?;
    let invoice = state
        .store
        .upload_invoice_proof(&ctx, invoice_id, &payload.path)
        .await
        .map_err(lifecycle_error)?;
    Ok(Json(invoice))
}

async fn confirm_invoice(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(invoice_id): Path<Uuid>,
) -> ApiResult<ConfirmOutcome<RecurringInvoice>> {
    let ctx = request_context(&headers)?;
    let outcome = state
        .store
        .confirm_invoice_payment(&ctx, invoice_id)
        .await
        .map_err(lifecycle_error)?;

    if let ConfirmOutcome::Confirmed { record, .. } = &outcome {
        let payload = json!({ "invoice_id": record.id, "amount": record.amount });
        dispatch(&state, &ctx, record.claim_id, LifecycleEventKind::PaymentConfirmed, payload)
            .await;
    }
    Ok(Json(outcome))
}

async fn record_automatic_warning(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<WarningRequest>,
) -> ApiResult<RentWarning> {
    let ctx = request_context(&headers)?;
    let warning = state
        .store
        .record_automatic_warning(&ctx, invoice_id, &payload.message)
        .await
        .map_err(lifecycle_error)?;

    dispatch_warning(&state, &ctx, &warning).await;
    Ok(Json(warning))
}

async fn send_manual_warning(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<WarningRequest>,
) -> ApiResult<RentWarning> {
    let ctx = request_context(&headers)?;
    let warning = state
        .store
        .send_manual_warning(&ctx, invoice_id, &payload.message)
        .await
        .map_err(lifecycle_error)?;

    dispatch_warning(&state, &ctx, &warning).await;
    Ok(Json(warning))
}

async fn list_warnings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(claim_id): Path<Uuid>,
) -> ApiResult<WarningListResponse> {
    let ctx = request_context(&headers)?;
    let items = state
        .store
        .visible_warnings(&ctx, claim_id)
        .await
        .map_err(lifecycle_error)?;
    Ok(Json(WarningListResponse { claim_id, items }))
}

async fn send_notice(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(claim_id): Path<Uuid>,
    Json(payload): Json<SendNoticeRequest>,
) -> ApiResult<RentNotice> {
    let ctx = request_context(&headers)?;
    let notice = state
        .store
        .send_notice(
            &ctx,
            claim_id,
            &payload.message,
            payload.immediate_termination,
        )
        .await
        .map_err(lifecycle_error)?;

    let payload = json!({
        "notice_id": notice.id,
        "immediate_termination": notice.immediate_termination,
        "sender_role": notice.sender_role,
    });
    dispatch(&state, &ctx, claim_id, LifecycleEventKind::NoticeSent, payload).await;
    Ok(Json(notice))
}

async fn cancel_notice(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(notice_id): Path<Uuid>,
) -> ApiResult<RentNotice> {
    let ctx = request_context(&headers)?;
    let notice = state
        .store
        .cancel_notice(&ctx, notice_id)
        .await
        .map_err(lifecycle_error)?;

    let payload = json!({ "notice_id": notice.id });
    dispatch(
        &state,
        &ctx,
        notice.claim_id,
        LifecycleEventKind::NoticeCancelled,
        payload,
    )
    .await;
    Ok(Json(notice))
}

async fn dispatch_warning(state: &AppState, ctx: &RequestContext, warning: &RentWarning) {
    let payload = json!({
        "warning_id": warning.id,
        "invoice_id": warning.invoice_id,
        "warning_type": warning.warning_type,
    });
    dispatch(
        state,
        ctx,
        warning.claim_id,
        LifecycleEventKind::WarningIssued,
        payload,
    )
    .await;
}

/// Publishes after the operation committed; a bus failure is logged, not returned.
async fn dispatch(
    state: &AppState,
    ctx: &RequestContext,
    claim_id: Uuid,
    kind: LifecycleEventKind,
    payload: serde_json::Value,
) {
    let event = LifecycleEvent::new(claim_id, kind, ctx.actor_id, payload);
    if let Err(err) = state.redis.publish_event(&event).await {
        error!(
            "failed to publish {} for claim {claim_id}: {err:#}",
            kind.channel()
        );
    }
}

fn request_context(headers: &HeaderMap) -> Result<RequestContext, (StatusCode, String)> {
    let actor_id = header_value(headers, ACTOR_ID_HEADER)?;
    let role = header_value(headers, ACTOR_ROLE_HEADER)?;

    let actor_id = Uuid::parse_str(actor_id).map_err(|err| {
        (
            StatusCode::BAD_REQUEST,
            format!("{ACTOR_ID_HEADER} is not a valid id: {err}"),
        )
    })?;
    let role = ActorRole::from_str(role).map_err(|err| invalid_request(err.into()))?;
    if role == ActorRole::System {
        return Err((
            StatusCode::FORBIDDEN,
            "the system role is reserved for background jobs".to_string(),
        ));
    }

    Ok(RequestContext::new(actor_id, role, Utc::now().date_naive()))
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, (StatusCode, String)> {
    let value = headers
        .get(name)
        .ok_or_else(|| (StatusCode::UNAUTHORIZED, format!("{name} header is required")))?;
    value
        .to_str()
        .map(str::trim)
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("{name} must be ASCII")))
}

fn lifecycle_error(err: LifecycleError) -> (StatusCode, String) {
    let status = match &err {
        LifecycleError::NotFound { .. } => StatusCode::NOT_FOUND,
        LifecycleError::Unauthorized(_) => {
            warn!("{err}");
            StatusCode::FORBIDDEN
        }
        LifecycleError::MissingPrerequisite(_)
        | LifecycleError::NotPermitted(_)
        | LifecycleError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LifecycleError::InvalidStateTransition { .. } | LifecycleError::AlreadyExists { .. } => {
            StatusCode::CONFLICT
        }
        LifecycleError::Template(_) | LifecycleError::Storage(_) => return internal_error(&err),
    };
    (status, err.to_string())
}

fn invalid_request(err: anyhow::Error) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, err.to_string())
}

fn internal_error<E: std::fmt::Display>(err: E) -> (StatusCode, String) {
    error!("request failed: {err}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal error".to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use domus_core::ManualWarningDenial;

    fn headers(actor_id: &str, role: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACTOR_ID_HEADER, HeaderValue::from_str(actor_id).unwrap());
        headers.insert(ACTOR_ROLE_HEADER, HeaderValue::from_str(role).unwrap());
        headers
    }

    #[test]
    fn context_is_built_from_headers() {
        let actor_id = Uuid::new_v4();
        let ctx = request_context(&headers(&actor_id.to_string(), "General Manager")).unwrap();
        assert_eq!(ctx.actor_id, actor_id);
        assert_eq!(ctx.role, ActorRole::GeneralManager);
        assert_eq!(ctx.today, Utc::now().date_naive());
    }

    #[test]
    fn missing_headers_are_unauthorized() {
        let (status, _) = request_context(&HeaderMap::new()).unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn malformed_headers_are_bad_requests() {
        let (status, _) = request_context(&headers("not-a-uuid", "manager")).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            request_context(&headers(&Uuid::new_v4().to_string(), "landlord")).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn callers_cannot_act_as_system() {
        let (status, _) =
            request_context(&headers(&Uuid::new_v4().to_string(), "system")).unwrap_err();
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn lifecycle_errors_map_to_status_codes() {
        let cases = [
            (
                LifecycleError::not_found("payment", Uuid::nil()),
                StatusCode::NOT_FOUND,
            ),
            (
                LifecycleError::Unauthorized("client may not lock contracts".to_string()),
                StatusCode::FORBIDDEN,
            ),
            (
                LifecycleError::MissingPrerequisite("proof".to_string()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                LifecycleError::NotPermitted(ManualWarningDenial::NotYetDue),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                LifecycleError::invalid_transition("contract", "save", "locked"),
                StatusCode::CONFLICT,
            ),
            (
                LifecycleError::AlreadyExists {
                    entity: "recurring invoices",
                    detail: "claim already invoiced".to_string(),
                },
                StatusCode::CONFLICT,
            ),
            (
                LifecycleError::storage(anyhow::anyhow!("connection reset")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(lifecycle_error(err).0, expected);
        }
    }

    #[test]
    fn storage_details_are_not_leaked() {
        let (_, body) = lifecycle_error(LifecycleError::storage(anyhow::anyhow!(
            "password authentication failed"
        )));
        assert_eq!(body, "internal error");
    }

    #[test]
    fn template_failures_are_internal_errors() {
        let (status, body) = lifecycle_error(LifecycleError::Template(
            "unknown token {{TENANT}}".to_string(),
        ));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "internal error");
    }
}
