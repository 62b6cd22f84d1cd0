pub mod claim;
pub mod history;
pub mod recorder;

pub use claim::{ClaimEngine, ClaimOutcome, ClaimState};
pub use history::{
    AttributedView, HistoryReconciler, HistoryView, LinkHistory, SettlementScanView, ViewMatches,
};
pub use recorder::{DepositRecorded, DepositRecorder};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult, LinkError};
use crate::execution::SettlementExecutor;
use crate::fees::{FeeBreakdown, FeeCalculator, FeeDisplay};
use crate::ledger::models::{AssetType, PaymentLink, ReconciliationAnomaly};
use crate::ledger::LinkStore;
use crate::probe::{LedgerProbe, TransactionScanner};
use crate::wallet::AddressVerifier;

/// Read-only view of a link for whoever holds it
#[derive(Debug, Clone, Serialize)]
pub struct LinkStatusView {
    pub link_id: Uuid,
    pub amount: u64,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount_display: Decimal,
    pub asset_type: AssetType,
    pub deposit_present: bool,
    pub claimed: bool,
    /// Absent when the current schedule's fees swallow the whole amount
    pub fee_breakdown: Option<FeeBreakdown>,
    pub fee_display: Option<FeeDisplay>,
    pub created_at: DateTime<Utc>,
}

/// Entry point for every link operation exposed to transports
pub struct LinkService {
    store: Arc<dyn LinkStore>,
    fees: FeeCalculator,
    recorder: DepositRecorder,
    claims: ClaimEngine,
    history: HistoryReconciler,
}

impl LinkService {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn LinkStore>,
        probe: Arc<dyn LedgerProbe>,
        scanner: Arc<dyn TransactionScanner>,
        executor: Arc<dyn SettlementExecutor>,
    ) -> Self {
        let fees = FeeCalculator::new(config.fee_schedule());

        Self {
            recorder: DepositRecorder::new(
                store.clone(),
                probe,
                config.pool_address.clone(),
                config.probe_timeout(),
            ),
            claims: ClaimEngine::new(
                store.clone(),
                executor,
                fees.clone(),
                config.settlement_timeout(),
            ),
            history: HistoryReconciler::new(
                store.clone(),
                scanner,
                config.history_page_size,
                config.history_scan_cap,
            ),
            fees,
            store,
        }
    }

    pub fn store(&self) -> Arc<dyn LinkStore> {
        self.store.clone()
    }

    pub fn fees(&self) -> &FeeCalculator {
        &self.fees
    }

    /// Create an unfunded link. The amount must leave a positive payout.
    pub async fn create_link(
        &self,
        amount: u64,
        asset_type: AssetType,
        creator_address: Option<String>,
    ) -> AppResult<PaymentLink> {
        if let Some(creator) = creator_address.as_deref() {
            AddressVerifier::validate_address(creator)?;
        }
        self.fees.compute(amount, asset_type)?;

        let link = PaymentLink::new(amount, asset_type, creator_address);
        self.store.insert(&link).await?;

        info!("Created link {} for {} {}", link.id, amount, asset_type);
        Ok(link)
    }

    pub async fn create_status(&self, link_id: &str) -> AppResult<LinkStatusView> {
        let id = AddressVerifier::parse_link_id(link_id)?;
        let link = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| LinkError::NotFound(id.to_string()))?;

        let fee_breakdown = self.fees.compute(link.amount, link.asset_type).ok();

        Ok(LinkStatusView {
            link_id: link.id,
            amount: link.amount,
            amount_display: link.asset_type.to_display(link.amount),
            asset_type: link.asset_type,
            deposit_present: link.has_deposit(),
            claimed: link.claimed,
            fee_display: fee_breakdown.map(|fees| fees.display(link.asset_type)),
            fee_breakdown,
            created_at: link.created_at,
        })
    }

    pub async fn record_deposit(&self, link_id: &str, tx_ref: &str) -> AppResult<DepositRecorded> {
        self.recorder.record_deposit(link_id, tx_ref).await
    }

    pub async fn recover_deposit(&self, link_id: &str, tx_hash: &str) -> AppResult<DepositRecorded> {
        self.recorder.recover_deposit(link_id, tx_hash).await
    }

    pub async fn claim(&self, link_id: &str, recipient: &str) -> AppResult<ClaimOutcome> {
        self.claims.claim(link_id, recipient).await
    }

    pub async fn history(&self, address: &str) -> AppResult<LinkHistory> {
        self.history.history(address).await
    }

    pub async fn anomalies(&self, open_only: bool) -> AppResult<Vec<ReconciliationAnomaly>> {
        self.store.list_anomalies(open_only).await
    }

    pub async fn open_anomaly_count(&self) -> AppResult<usize> {
        Ok(self.store.list_anomalies(true).await?.len())
    }

    #[instrument(skip(self))]
    pub async fn acknowledge_anomaly(
        &self,
        anomaly_id: &str,
        acknowledged_by: &str,
    ) -> AppResult<ReconciliationAnomaly> {
        let id = Uuid::parse_str(anomaly_id.trim())
            .map_err(|_| AppError::InvalidInput(format!("Malformed anomaly id: {}", anomaly_id)))?;

        let anomaly = self
            .store
            .acknowledge_anomaly(id, acknowledged_by)
            .await?
            .ok_or_else(|| LinkError::NotFound(format!("anomaly {}", id)))?;

        info!("Anomaly {} acknowledged by {}", id, acknowledged_by);
        Ok(anomaly)
    }
}
