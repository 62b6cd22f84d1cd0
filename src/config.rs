use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::fees::FeeSchedule;
use crate::wallet::AddressVerifier;

const MIN_TOKEN_LEN: usize = 16;
/// getSignaturesForAddress accepts at most this many per call
const MAX_PAGE_SIZE: usize = 1_000;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// Unset means the process-local store; state is lost on restart.
    #[serde(default)]
    pub database_url: Option<String>,
    pub bind_address: String,
    pub solana_rpc_url: String,
    pub relayer_url: String,
    /// Settlement pool every deposit must credit
    pub pool_address: String,
    /// Shared secret of the settlement relay (push deposit recording)
    pub relay_token: String,
    /// Shared secret for the anomaly register
    pub admin_token: String,
    pub protocol_fee_bps: u32,
    pub sol_base_fee: u64,
    pub token_base_fee: u64,
    pub probe_timeout_secs: u64,
    pub settlement_timeout_secs: u64,
    /// Signatures fetched per settlement-scan page
    pub history_page_size: usize,
    /// Signatures examined before a history lookup is reported truncated
    pub history_scan_cap: usize,
    pub anomaly_report_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        let fees = FeeSchedule::default();
        Self {
            database_url: None,
            bind_address: "0.0.0.0:8080".to_string(),
            solana_rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            relayer_url: "http://localhost:3001".to_string(),
            pool_address: "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM".to_string(),
            relay_token: "dev-relay-token-change-me".to_string(),
            admin_token: "dev-admin-token-change-me".to_string(),
            protocol_fee_bps: fees.protocol_fee_bps,
            sol_base_fee: fees.sol_base_fee,
            token_base_fee: fees.token_base_fee,
            probe_timeout_secs: 10,
            settlement_timeout_secs: 60,
            history_page_size: 200,
            history_scan_cap: 5_000,
            anomaly_report_interval_secs: 300,
        }
    }
}

impl AppConfig {
    /// Load from the process environment (after `.env`) and validate
    pub fn from_env() -> AppResult<Self> {
        let defaults = Self::default();

        let config: AppConfig = config::Config::builder()
            .set_default("bind_address", defaults.bind_address)?
            .set_default("solana_rpc_url", defaults.solana_rpc_url)?
            .set_default("relayer_url", defaults.relayer_url)?
            .set_default("protocol_fee_bps", defaults.protocol_fee_bps as i64)?
            .set_default("sol_base_fee", defaults.sol_base_fee as i64)?
            .set_default("token_base_fee", defaults.token_base_fee as i64)?
            .set_default("probe_timeout_secs", defaults.probe_timeout_secs as i64)?
            .set_default("settlement_timeout_secs", defaults.settlement_timeout_secs as i64)?
            .set_default("history_page_size", defaults.history_page_size as i64)?
            .set_default("history_scan_cap", defaults.history_scan_cap as i64)?
            .set_default(
                "anomaly_report_interval_secs",
                defaults.anomaly_report_interval_secs as i64,
            )?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()?;

        let config = config.normalized();
        config.validate()?;
        Ok(config)
    }

    fn normalized(mut self) -> Self {
        self.database_url = self
            .database_url
            .filter(|url| !url.trim().is_empty());
        self
    }

    /// Fail fast on anything that would only surface mid-request
    pub fn validate(&self) -> AppResult<()> {
        self.bind_address
            .parse::<SocketAddr>()
            .map_err(|_| AppError::Config(format!("BIND_ADDRESS {} is not host:port", self.bind_address)))?;

        for (key, url) in [
            ("SOLANA_RPC_URL", &self.solana_rpc_url),
            ("RELAYER_URL", &self.relayer_url),
        ] {
            let parsed = reqwest::Url::parse(url)
                .map_err(|e| AppError::Config(format!("{} is not a URL: {}", key, e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(AppError::Config(format!("{} must be http(s)", key)));
            }
        }

        if !AddressVerifier::is_solana_address(&self.pool_address) {
            return Err(AppError::Config(format!(
                "POOL_ADDRESS {} is not a Solana address",
                self.pool_address
            )));
        }

        for (key, token) in [("RELAY_TOKEN", &self.relay_token), ("ADMIN_TOKEN", &self.admin_token)] {
            if token.len() < MIN_TOKEN_LEN {
                return Err(AppError::Config(format!(
                    "{} must be at least {} characters",
                    key, MIN_TOKEN_LEN
                )));
            }
        }
        if self.relay_token == self.admin_token {
            return Err(AppError::Config(
                "RELAY_TOKEN and ADMIN_TOKEN must differ".to_string(),
            ));
        }

        if self.protocol_fee_bps > 10_000 {
            return Err(AppError::Config(format!(
                "PROTOCOL_FEE_BPS {} exceeds 10000",
                self.protocol_fee_bps
            )));
        }

        if self.probe_timeout_secs == 0
            || self.settlement_timeout_secs == 0
            || self.anomaly_report_interval_secs == 0
        {
            return Err(AppError::Config("timeouts and intervals must be positive".to_string()));
        }

        if self.history_page_size == 0 || self.history_page_size > MAX_PAGE_SIZE {
            return Err(AppError::Config(format!(
                "HISTORY_PAGE_SIZE must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        if self.history_scan_cap < self.history_page_size {
            return Err(AppError::Config(
                "HISTORY_SCAN_CAP must be at least HISTORY_PAGE_SIZE".to_string(),
            ));
        }

        Ok(())
    }

    pub fn fee_schedule(&self) -> FeeSchedule {
        FeeSchedule {
            protocol_fee_bps: self.protocol_fee_bps,
            sol_base_fee: self.sol_base_fee,
            token_base_fee: self.token_base_fee,
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn settlement_timeout(&self) -> Duration {
        Duration::from_secs(self.settlement_timeout_secs)
    }

    pub fn anomaly_report_interval(&self) -> Duration {
        Duration::from_secs(self.anomaly_report_interval_secs)
    }
}
