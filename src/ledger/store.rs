use async_trait::async_trait;
use uuid::Uuid;

use super::models::*;
use crate::error::AppResult;

/// Link store - THE source of truth for link state
///
/// SECURITY: `try_set_deposit` and `try_mark_claimed` must each be a single
/// conditional update. They are the only thing standing between concurrent
/// callers and a double deposit or double claim; callers never lock.
#[async_trait]
pub trait LinkStore: Send + Sync {
    async fn insert(&self, link: &PaymentLink) -> AppResult<()>;

    async fn get(&self, id: Uuid) -> AppResult<Option<PaymentLink>>;

    /// Set `deposit_tx` only if it is currently unset and no other link
    /// already holds `tx_ref`.
    async fn try_set_deposit(&self, id: Uuid, tx_ref: &str) -> AppResult<DepositUpdate>;

    /// Set `claimed` + `withdraw_tx` only if unclaimed and funded.
    async fn try_mark_claimed(&self, id: Uuid, withdraw_tx: &str) -> AppResult<ClaimUpdate>;

    async fn find_by_creator(&self, address: &str) -> AppResult<Vec<PaymentLink>>;

    /// Links whose `deposit_tx` or `withdraw_tx` is one of `tx_refs`
    async fn find_by_tx_refs(&self, tx_refs: &[String]) -> AppResult<Vec<PaymentLink>>;

    async fn record_anomaly(&self, anomaly: &ReconciliationAnomaly) -> AppResult<()>;

    async fn list_anomalies(&self, open_only: bool) -> AppResult<Vec<ReconciliationAnomaly>>;

    /// Whether an unacknowledged anomaly references `link_id`
    async fn has_open_anomaly(&self, link_id: Uuid) -> AppResult<bool>;

    /// Idempotent: an already acknowledged record is returned unchanged.
    async fn acknowledge_anomaly(
        &self,
        id: Uuid,
        acknowledged_by: &str,
    ) -> AppResult<Option<ReconciliationAnomaly>>;
}
