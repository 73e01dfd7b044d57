use anyhow::{Context, Result};
use domus_contracts::ContractTemplate;
use tracing::info;

const DEFAULT_WARNING_SWEEP_SECS: u64 = 3600;
const DEFAULT_AUTO_WARNING_INTERVAL_DAYS: i64 = 7;

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    pub redis_url: String,
    pub http_addr: String,
    /// Lease template file; the built-in one is used when unset.
    pub contract_template_path: Option<String>,
    pub warning_sweep_secs: u64,
    pub auto_warning_interval_days: i64,
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = std::env::var("REDIS_URL").context("REDIS_URL is required")?;
        let http_addr =
            std::env::var("HTTP_ADDR").unwrap_or_else(|_| default_http_addr.to_string());
        let contract_template_path = std::env::var("CONTRACT_TEMPLATE_PATH")
            .ok()
            .filter(|path| !path.trim().is_empty());

        Ok(Self {
            database_url,
            redis_url,
            http_addr,
            contract_template_path,
            warning_sweep_secs: DEFAULT_WARNING_SWEEP_SECS,
            auto_warning_interval_days: DEFAULT_AUTO_WARNING_INTERVAL_DAYS,
        })
    }

    pub fn worker_from_env() -> Result<Self> {
        let mut config = Self::from_env("")?;
        config.http_addr = String::new();
        config.warning_sweep_secs =
            parse_env("WARNING_SWEEP_SECS")?.unwrap_or(DEFAULT_WARNING_SWEEP_SECS);
        config.auto_warning_interval_days = parse_env("AUTO_WARNING_INTERVAL_DAYS")?
            .unwrap_or(DEFAULT_AUTO_WARNING_INTERVAL_DAYS);

        if config.warning_sweep_secs == 0 {
            anyhow::bail!("WARNING_SWEEP_SECS must be greater than zero");
        }
        if config.auto_warning_interval_days < 1 {
            anyhow::bail!("AUTO_WARNING_INTERVAL_DAYS must be at least 1");
        }
        Ok(config)
    }

    /// The lease template from `CONTRACT_TEMPLATE_PATH`, or the built-in one.
    pub fn contract_template(&self) -> Result<ContractTemplate> {
        let template = match &self.contract_template_path {
            Some(path) => {
                info!("loading contract template from {path}");
                ContractTemplate::from_file(path)?
            }
            None => ContractTemplate::canonical()?,
        };
        Ok(template)
    }
}

fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{name} must be a number, got {raw:?}")),
        Err(_) => Ok(None),
    }
}
