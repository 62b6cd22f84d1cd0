use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, field, info, instrument, warn, Span};
use uuid::Uuid;

use crate::error::{AppResult, LinkError};
use crate::execution::{DepositContext, SettlementExecutor};
use crate::fees::FeeCalculator;
use crate::ledger::models::{ClaimUpdate, PaymentLink, ReconciliationAnomaly};
use crate::ledger::LinkStore;
use crate::wallet::AddressVerifier;

const COMMIT_ATTEMPTS: u32 = 3;
const COMMIT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Where a single claim attempt currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimState {
    Unclaimed,
    Validating,
    Executing,
    Claimed,
}

impl ClaimState {
    pub fn as_str(self) -> &'static str {
        match self {
            ClaimState::Unclaimed => "unclaimed",
            ClaimState::Validating => "validating",
            ClaimState::Executing => "executing",
            ClaimState::Claimed => "claimed",
        }
    }

    /// `Claimed` is terminal; every failure exit returns to `Unclaimed`.
    pub fn can_transition(self, to: ClaimState) -> bool {
        matches!(
            (self, to),
            (ClaimState::Unclaimed, ClaimState::Validating)
                | (ClaimState::Validating, ClaimState::Executing)
                | (ClaimState::Validating, ClaimState::Unclaimed)
                | (ClaimState::Executing, ClaimState::Claimed)
                | (ClaimState::Executing, ClaimState::Unclaimed)
        )
    }

    /// Move to `to` and report it on the current claim span
    fn advance(&mut self, to: ClaimState) {
        debug_assert!(
            self.can_transition(to),
            "invalid claim transition {:?} -> {:?}",
            self,
            to
        );
        *self = to;
        Span::current().record("state", to.as_str());
    }
}

/// Result of a claim whose payout went out
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClaimOutcome {
    Claimed {
        link_id: Uuid,
        withdraw_tx: String,
        net_amount: u64,
    },
    /// Funds left the pool but the link could not be marked claimed.
    /// Nothing is rolled back; an operator has to reconcile.
    ReconciliationRequired {
        link_id: Uuid,
        withdraw_tx: String,
        anomaly_id: Uuid,
    },
}

impl ClaimOutcome {
    pub fn withdraw_tx(&self) -> &str {
        match self {
            ClaimOutcome::Claimed { withdraw_tx, .. }
            | ClaimOutcome::ReconciliationRequired { withdraw_tx, .. } => withdraw_tx,
        }
    }

    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed { .. })
    }
}

/// Claim validator and executor
///
/// INVARIANTS:
/// - the settlement executor runs only after every precondition passed
/// - no store mutation happens before the executor returns a receipt
/// - every receipt is either committed or recorded as an anomaly
pub struct ClaimEngine {
    store: Arc<dyn LinkStore>,
    executor: Arc<dyn SettlementExecutor>,
    fees: FeeCalculator,
    settlement_timeout: Duration,
}

impl ClaimEngine {
    pub fn new(
        store: Arc<dyn LinkStore>,
        executor: Arc<dyn SettlementExecutor>,
        fees: FeeCalculator,
        settlement_timeout: Duration,
    ) -> Self {
        Self {
            store,
            executor,
            fees,
            settlement_timeout,
        }
    }

    #[instrument(skip(self), fields(executor = self.executor.name(), state = field::Empty))]
    pub async fn claim(&self, link_id: &str, recipient: &str) -> AppResult<ClaimOutcome> {
        let mut state = ClaimState::Unclaimed;
        state.advance(ClaimState::Validating);

        let (link, ctx, net_amount) = match self.validate(link_id, recipient).await {
            Ok(validated) => validated,
            Err(e) => {
                state.advance(ClaimState::Unclaimed);
                debug!("Claim rejected during validation: {}", e);
                return Err(e);
            }
        };

        state.advance(ClaimState::Executing);
        info!(
            "Executing claim for link {} -> {} ({} net)",
            link.id, recipient, net_amount
        );

        let settled = tokio::time::timeout(
            self.settlement_timeout,
            self.executor.execute(&ctx, recipient, net_amount),
        )
        .await;

        let receipt = match settled {
            Err(_) => {
                state.advance(ClaimState::Unclaimed);
                warn!(
                    "Settlement for link {} timed out after {:?}; link left unclaimed",
                    link.id, self.settlement_timeout
                );
                return Err(LinkError::SettlementTimeout(link.id).into());
            }
            Ok(Err(failure)) => {
                state.advance(ClaimState::Unclaimed);
                warn!("Settlement for link {} failed: {}", link.id, failure);
                return Err(LinkError::from(failure).into());
            }
            Ok(Ok(receipt)) => receipt,
        };

        if receipt.withdraw_tx.trim().is_empty() {
            state.advance(ClaimState::Unclaimed);
            error!(
                "Executor {} returned an empty withdrawal reference for link {}",
                self.executor.name(),
                link.id
            );
            return Err(LinkError::SettlementUnavailable(
                "settlement returned no withdrawal reference".to_string(),
            )
            .into());
        }

        match self.commit(link.id, &receipt.withdraw_tx).await {
            Ok(()) => {
                state.advance(ClaimState::Claimed);
                info!("Link {} claimed by {} in {}", link.id, recipient, receipt.withdraw_tx);
                Ok(ClaimOutcome::Claimed {
                    link_id: link.id,
                    withdraw_tx: receipt.withdraw_tx,
                    net_amount,
                })
            }
            Err(commit_outcome) => {
                state.advance(ClaimState::Unclaimed);
                Ok(self
                    .escalate(&link, recipient, net_amount, receipt.withdraw_tx, commit_outcome)
                    .await)
            }
        }
    }

    /// Conditional claim commit, re-issued on store errors.
    ///
    /// Only the first writer can win, so repeating the same update after an
    /// ambiguous failure is safe. An attempt that landed before its error was
    /// reported shows up as our own `withdraw_tx` on the link.
    /// `Err` carries the outcome recorded on the anomaly.
    async fn commit(&self, link_id: Uuid, withdraw_tx: &str) -> Result<(), String> {
        let mut attempt = 1;
        loop {
            match self.store.try_mark_claimed(link_id, withdraw_tx).await {
                Ok(ClaimUpdate::Applied) => return Ok(()),
                Ok(ClaimUpdate::AlreadyClaimed) if attempt > 1 => {
                    return match self.store.get(link_id).await {
                        Ok(Some(link)) if link.withdraw_tx.as_deref() == Some(withdraw_tx) => Ok(()),
                        _ => Err(ClaimUpdate::AlreadyClaimed.as_str().to_string()),
                    };
                }
                Ok(other) => return Err(other.as_str().to_string()),
                Err(e) if attempt < COMMIT_ATTEMPTS => {
                    warn!(
                        "Claim commit for link {} failed (attempt {}/{}): {}",
                        link_id, attempt, COMMIT_ATTEMPTS, e
                    );
                    tokio::time::sleep(COMMIT_RETRY_DELAY * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(format!("store_error: {}", e)),
            }
        }
    }

    /// Ordered, short-circuiting precondition checks
    async fn validate(
        &self,
        link_id: &str,
        recipient: &str,
    ) -> AppResult<(PaymentLink, DepositContext, u64)> {
        let id = AddressVerifier::parse_link_id(link_id)?;
        AddressVerifier::validate_recipient(recipient)?;

        let link = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| LinkError::NotFound(id.to_string()))?;

        let ctx = DepositContext::from_link(&link).ok_or(LinkError::DepositPending(id))?;

        if link.claimed {
            return Err(LinkError::AlreadyClaimed(id).into());
        }

        // A payout for this link may already have gone out
        if self.store.has_open_anomaly(id).await? {
            return Err(LinkError::ReconciliationPending(id).into());
        }

        let fees = self.fees.compute(link.amount, link.asset_type)?;
        Ok((link, ctx, fees.net_amount))
    }

    async fn escalate(
        &self,
        link: &PaymentLink,
        recipient: &str,
        net_amount: u64,
        withdraw_tx: String,
        commit_outcome: String,
    ) -> ClaimOutcome {
        let anomaly = ReconciliationAnomaly::new(
            link.id,
            withdraw_tx.clone(),
            recipient.to_string(),
            net_amount,
            link.asset_type,
            commit_outcome,
        );

        error!(
            link_id = %link.id,
            withdraw_tx = %withdraw_tx,
            anomaly_id = %anomaly.id,
            commit_outcome = %anomaly.commit_outcome,
            "RECONCILIATION REQUIRED: payout executed but claim commit was refused"
        );

        if let Err(e) = self.store.record_anomaly(&anomaly).await {
            error!(
                anomaly_id = %anomaly.id,
                "Failed to persist reconciliation anomaly: {}", e
            );
        }

        ClaimOutcome::ReconciliationRequired {
            link_id: link.id,
            withdraw_tx,
            anomaly_id: anomaly.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::execution::{SettlementFailure, SettlementReceipt};
    use crate::ledger::models::{AssetType, DepositUpdate};
    use crate::ledger::InMemoryLinkStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const RECIPIENT: &str = "4Nd1mBQtrMJVYVfKf2PJy9NZUZdTAsp7D4xWLs4gDB4T";

    struct CountingExecutor {
        calls: AtomicUsize,
        result: Result<(), SettlementFailure>,
    }

    impl CountingExecutor {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                result: Ok(()),
            })
        }

        fn failing(failure: SettlementFailure) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                result: Err(failure),
            })
        }
    }

    #[async_trait]
    impl SettlementExecutor for CountingExecutor {
        async fn execute(
            &self,
            ctx: &DepositContext,
            _recipient: &str,
            _net_amount: u64,
        ) -> Result<SettlementReceipt, SettlementFailure> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()?;
            Ok(SettlementReceipt {
                withdraw_tx: format!("wd{}{}", ctx.link_id.simple(), n),
            })
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    /// In-memory store whose claim commits fail on demand
    struct FlakyCommitStore {
        inner: InMemoryLinkStore,
        /// Commits refused with an error before touching the link
        failures_before: AtomicUsize,
        /// Apply the next commit but report an error anyway
        fail_after_apply: AtomicBool,
    }

    impl FlakyCommitStore {
        fn new(failures_before: usize, fail_after_apply: bool) -> Self {
            Self {
                inner: InMemoryLinkStore::new(),
                failures_before: AtomicUsize::new(failures_before),
                fail_after_apply: AtomicBool::new(fail_after_apply),
            }
        }
    }

    #[async_trait]
    impl LinkStore for FlakyCommitStore {
        async fn insert(&self, link: &PaymentLink) -> AppResult<()> {
            self.inner.insert(link).await
        }

        async fn get(&self, id: Uuid) -> AppResult<Option<PaymentLink>> {
            self.inner.get(id).await
        }

        async fn try_set_deposit(&self, id: Uuid, tx_ref: &str) -> AppResult<DepositUpdate> {
            self.inner.try_set_deposit(id, tx_ref).await
        }

        async fn try_mark_claimed(&self, id: Uuid, withdraw_tx: &str) -> AppResult<ClaimUpdate> {
            let remaining = self.failures_before.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_before.store(remaining - 1, Ordering::SeqCst);
                return Err(AppError::Internal("connection reset".to_string()));
            }
            let update = self.inner.try_mark_claimed(id, withdraw_tx).await?;
            if self.fail_after_apply.swap(false, Ordering::SeqCst) {
                return Err(AppError::Internal("connection reset after commit".to_string()));
            }
            Ok(update)
        }

        async fn find_by_creator(&self, address: &str) -> AppResult<Vec<PaymentLink>> {
            self.inner.find_by_creator(address).await
        }

        async fn find_by_tx_refs(&self, tx_refs: &[String]) -> AppResult<Vec<PaymentLink>> {
            self.inner.find_by_tx_refs(tx_refs).await
        }

        async fn record_anomaly(&self, anomaly: &ReconciliationAnomaly) -> AppResult<()> {
            self.inner.record_anomaly(anomaly).await
        }

        async fn list_anomalies(&self, open_only: bool) -> AppResult<Vec<ReconciliationAnomaly>> {
            self.inner.list_anomalies(open_only).await
        }

        async fn has_open_anomaly(&self, link_id: Uuid) -> AppResult<bool> {
            self.inner.has_open_anomaly(link_id).await
        }

        async fn acknowledge_anomaly(
            &self,
            id: Uuid,
            acknowledged_by: &str,
        ) -> AppResult<Option<ReconciliationAnomaly>> {
            self.inner.acknowledge_anomaly(id, acknowledged_by).await
        }
    }

    async fn flaky_engine(
        executor: Arc<CountingExecutor>,
        store: FlakyCommitStore,
    ) -> (ClaimEngine, Arc<FlakyCommitStore>, Uuid) {
        let store = Arc::new(store);
        let link = PaymentLink::new(17_000_000, AssetType::Sol, None);
        store.insert(&link).await.unwrap();
        store.try_set_deposit(link.id, "tx123").await.unwrap();
        let engine = ClaimEngine::new(
            store.clone(),
            executor,
            FeeCalculator::default(),
            Duration::from_secs(5),
        );
        (engine, store, link.id)
    }

    async fn engine_with(
        executor: Arc<CountingExecutor>,
        funded: bool,
    ) -> (ClaimEngine, Arc<InMemoryLinkStore>, Uuid) {
        let store = Arc::new(InMemoryLinkStore::new());
        let link = PaymentLink::new(17_000_000, AssetType::Sol, None);
        store.insert(&link).await.unwrap();
        if funded {
            store.try_set_deposit(link.id, "tx123").await.unwrap();
        }
        let engine = ClaimEngine::new(
            store.clone(),
            executor,
            FeeCalculator::default(),
            Duration::from_secs(5),
        );
        (engine, store, link.id)
    }

    #[test]
    fn test_state_transitions() {
        let mut state = ClaimState::Unclaimed;
        assert!(!state.can_transition(ClaimState::Executing));
        state.advance(ClaimState::Validating);
        state.advance(ClaimState::Executing);
        state.advance(ClaimState::Claimed);
        assert_eq!(state.as_str(), "claimed");
        // Claimed is terminal
        assert!(!state.can_transition(ClaimState::Unclaimed));
        assert!(!state.can_transition(ClaimState::Validating));
    }

    #[tokio::test]
    async fn test_claim_pays_net_amount() {
        let executor = CountingExecutor::ok();
        let (engine, store, id) = engine_with(executor.clone(), true).await;

        let outcome = engine.claim(&id.to_string(), RECIPIENT).await.unwrap();
        match &outcome {
            ClaimOutcome::Claimed { net_amount, .. } => assert_eq!(*net_amount, 10_940_500),
            other => panic!("unexpected outcome {:?}", other),
        }

        let link = store.get(id).await.unwrap().unwrap();
        assert!(link.claimed);
        assert_eq!(link.withdraw_tx.as_deref(), Some(outcome.withdraw_tx()));
        assert!(link.claimed_at.is_some());
    }

    #[tokio::test]
    async fn test_checks_run_in_order() {
        let executor = CountingExecutor::ok();
        let (engine, _, id) = engine_with(executor.clone(), false).await;

        assert!(matches!(
            engine.claim("not-a-uuid", "bad").await,
            Err(AppError::Link(LinkError::InvalidLinkId(_)))
        ));
        assert!(matches!(
            engine.claim(&id.to_string(), "bad").await,
            Err(AppError::Link(LinkError::InvalidRecipient(_)))
        ));
        assert!(matches!(
            engine.claim(&Uuid::new_v4().to_string(), RECIPIENT).await,
            Err(AppError::Link(LinkError::NotFound(_)))
        ));
        assert!(matches!(
            engine.claim(&id.to_string(), RECIPIENT).await,
            Err(AppError::Link(LinkError::DepositPending(_)))
        ));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejected_settlement_leaves_link_claimable() {
        let executor = CountingExecutor::failing(SettlementFailure::Rejected("proof invalid".into()));
        let (engine, store, id) = engine_with(executor, true).await;

        assert!(matches!(
            engine.claim(&id.to_string(), RECIPIENT).await,
            Err(AppError::Link(LinkError::SettlementRejected(_)))
        ));
        assert!(store.get(id).await.unwrap().unwrap().is_claimable());
    }

    #[tokio::test]
    async fn test_unavailable_settlement_is_retryable() {
        let executor = CountingExecutor::failing(SettlementFailure::Unavailable("503".into()));
        let (engine, store, id) = engine_with(executor, true).await;

        match engine.claim(&id.to_string(), RECIPIENT).await {
            Err(AppError::Link(e)) => assert!(e.is_retryable()),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(!store.get(id).await.unwrap().unwrap().claimed);
    }

    #[tokio::test]
    async fn test_second_claim_is_already_claimed() {
        let executor = CountingExecutor::ok();
        let (engine, _, id) = engine_with(executor.clone(), true).await;

        engine.claim(&id.to_string(), RECIPIENT).await.unwrap();
        assert!(matches!(
            engine.claim(&id.to_string(), RECIPIENT).await,
            Err(AppError::Link(LinkError::AlreadyClaimed(_)))
        ));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_commit_failure_is_retried() {
        let executor = CountingExecutor::ok();
        let (engine, store, id) = flaky_engine(executor.clone(), FlakyCommitStore::new(1, false)).await;

        let outcome = engine.claim(&id.to_string(), RECIPIENT).await.unwrap();
        assert!(outcome.is_claimed());
        assert_eq!(
            store.get(id).await.unwrap().unwrap().withdraw_tx.as_deref(),
            Some(outcome.withdraw_tx())
        );

        assert!(matches!(
            engine.claim(&id.to_string(), RECIPIENT).await,
            Err(AppError::Link(LinkError::AlreadyClaimed(_)))
        ));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert!(store.list_anomalies(false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_that_landed_before_its_error_is_claimed() {
        let executor = CountingExecutor::ok();
        let (engine, store, id) = flaky_engine(executor.clone(), FlakyCommitStore::new(0, true)).await;

        let outcome = engine.claim(&id.to_string(), RECIPIENT).await.unwrap();
        assert!(outcome.is_claimed());
        assert!(store.list_anomalies(false).await.unwrap().is_empty());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unresolved_payout_blocks_further_claims() {
        let executor = CountingExecutor::ok();
        let (engine, store, id) =
            flaky_engine(executor.clone(), FlakyCommitStore::new(COMMIT_ATTEMPTS as usize, false)).await;

        let outcome = engine.claim(&id.to_string(), RECIPIENT).await.unwrap();
        assert!(matches!(outcome, ClaimOutcome::ReconciliationRequired { .. }));
        assert!(!store.get(id).await.unwrap().unwrap().claimed);

        let open = store.list_anomalies(true).await.unwrap();
        assert_eq!(open.len(), 1);
        assert!(open[0].commit_outcome.starts_with("store_error"));

        match engine.claim(&id.to_string(), RECIPIENT).await {
            Err(AppError::Link(e @ LinkError::ReconciliationPending(_))) => {
                assert!(!e.is_retryable())
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }
}
