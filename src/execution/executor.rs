use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::error::LinkError;
use crate::ledger::models::{AssetType, PaymentLink};

/// What the settlement network needs to spend a link's deposit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepositContext {
    pub link_id: Uuid,
    pub deposit_tx: String,
    pub asset_type: AssetType,
    /// Gross amount originally deposited, in smallest units
    pub gross_amount: u64,
}

impl DepositContext {
    /// `None` unless the link carries a non-empty deposit reference
    pub fn from_link(link: &PaymentLink) -> Option<Self> {
        if !link.has_deposit() {
            return None;
        }
        Some(Self {
            link_id: link.id,
            deposit_tx: link.deposit_tx.clone()?,
            asset_type: link.asset_type,
            gross_amount: link.amount,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementReceipt {
    pub withdraw_tx: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementFailure {
    /// The network refused the payout; retrying the same request won't help.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The network could not be reached or answered nonsense; nothing was paid.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl From<SettlementFailure> for LinkError {
    fn from(failure: SettlementFailure) -> Self {
        match failure {
            SettlementFailure::Rejected(reason) => LinkError::SettlementRejected(reason),
            SettlementFailure::Unavailable(reason) => LinkError::SettlementUnavailable(reason),
        }
    }
}

/// Settlement executor - moves deposited value to the recipient
///
/// SECURITY: a returned receipt means funds left the pool. The payout cannot
/// be rolled back, so callers must commit or escalate every receipt.
#[async_trait]
pub trait SettlementExecutor: Send + Sync {
    async fn execute(
        &self,
        ctx: &DepositContext,
        recipient: &str,
        net_amount: u64,
    ) -> Result<SettlementReceipt, SettlementFailure>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_requires_deposit() {
        let mut link = PaymentLink::new(17_000_000, AssetType::Sol, None);
        assert!(DepositContext::from_link(&link).is_none());

        link.deposit_tx = Some("tx123".to_string());
        let ctx = DepositContext::from_link(&link).unwrap();
        assert_eq!(ctx.deposit_tx, "tx123");
        assert_eq!(ctx.gross_amount, 17_000_000);
    }

    #[test]
    fn test_failures_map_to_link_errors() {
        assert_eq!(
            LinkError::from(SettlementFailure::Rejected("nullifier spent".into())),
            LinkError::SettlementRejected("nullifier spent".into())
        );
        assert!(LinkError::from(SettlementFailure::Unavailable("503".into())).is_retryable());
    }
}
