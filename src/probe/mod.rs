pub mod solana;

use async_trait::async_trait;

use crate::error::AppResult;
use crate::ledger::models::AssetType;

pub use solana::SolanaRpcProbe;

/// What the settlement network says about a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Landed, succeeded, and credited the pool with at least the expected amount
    Confirmed,
    /// Unknown to the network (possibly not indexed yet)
    NotFound,
    /// Seen but not yet confirmed
    Pending,
    /// Confirmed, but not a deposit for this link
    Mismatch(String),
}

/// Read-only transaction verification against the settlement network.
///
/// An `Err` means the question could not be answered (transport failure,
/// malformed response) and is always inconclusive.
#[async_trait]
pub trait LedgerProbe: Send + Sync {
    async fn verify(
        &self,
        tx_hash: &str,
        expected_pool: &str,
        expected_amount: u64,
        asset: AssetType,
    ) -> AppResult<ProbeOutcome>;
}

/// Historical settlement transactions an address took part in
#[async_trait]
pub trait TransactionScanner: Send + Sync {
    /// One page of references, most recent first, at most `limit` long.
    /// `before` continues the walk strictly older than that reference.
    async fn signatures_page(
        &self,
        address: &str,
        before: Option<&str>,
        limit: usize,
    ) -> AppResult<Vec<String>>;
}
