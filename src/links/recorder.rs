use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{AppResult, LinkError};
use crate::ledger::models::DepositUpdate;
use crate::ledger::LinkStore;
use crate::probe::{LedgerProbe, ProbeOutcome};
use crate::wallet::AddressVerifier;

/// Successful deposit recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositRecorded {
    /// This call wrote the reference
    Applied,
    /// The identical reference was already on the link
    AlreadyRecorded,
}

/// Records the transaction that funded a link.
///
/// Both entry points end in the same write-once `try_set_deposit`; recovery
/// only gets there after the ledger probe confirms the transaction.
pub struct DepositRecorder {
    store: Arc<dyn LinkStore>,
    probe: Arc<dyn LedgerProbe>,
    pool_address: String,
    probe_timeout: Duration,
}

impl DepositRecorder {
    pub fn new(
        store: Arc<dyn LinkStore>,
        probe: Arc<dyn LedgerProbe>,
        pool_address: String,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            store,
            probe,
            pool_address,
            probe_timeout,
        }
    }

    /// Push path, called by the authorized settlement relay
    #[instrument(skip(self))]
    pub async fn record_deposit(&self, link_id: &str, tx_ref: &str) -> AppResult<DepositRecorded> {
        let id = AddressVerifier::parse_link_id(link_id)?;
        AddressVerifier::validate_tx_ref(tx_ref)?;

        self.commit(id, tx_ref).await
    }

    /// Pull path, called by an end user whose push recording never landed
    #[instrument(skip(self))]
    pub async fn recover_deposit(&self, link_id: &str, tx_hash: &str) -> AppResult<DepositRecorded> {
        let id = AddressVerifier::parse_link_id(link_id)?;
        AddressVerifier::validate_tx_ref(tx_hash)?;

        let link = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| LinkError::NotFound(id.to_string()))?;

        if let Some(existing) = link.deposit_tx.as_deref().filter(|tx| !tx.trim().is_empty()) {
            if existing == tx_hash {
                return Ok(DepositRecorded::AlreadyRecorded);
            }
            return Err(LinkError::DepositConflict {
                link_id: id,
                existing: existing.to_string(),
                attempted: tx_hash.to_string(),
            }
            .into());
        }

        let verdict = tokio::time::timeout(
            self.probe_timeout,
            self.probe
                .verify(tx_hash, &self.pool_address, link.amount, link.asset_type),
        )
        .await;

        let not_verifiable = |reason: String, retryable: bool| LinkError::TransactionNotVerifiable {
            tx_hash: tx_hash.to_string(),
            reason,
            retryable,
        };

        match verdict {
            Err(_) => {
                warn!("Ledger probe timed out for {} after {:?}", tx_hash, self.probe_timeout);
                Err(not_verifiable("ledger probe timed out".to_string(), true).into())
            }
            Ok(Err(e)) => {
                warn!("Ledger probe failed for {}: {}", tx_hash, e);
                Err(not_verifiable("ledger probe unavailable".to_string(), true).into())
            }
            Ok(Ok(ProbeOutcome::Pending)) => {
                Err(not_verifiable("transaction not yet confirmed".to_string(), true).into())
            }
            // An unindexed transaction looks exactly like a missing one
            Ok(Ok(ProbeOutcome::NotFound)) => {
                Err(not_verifiable("transaction not found".to_string(), true).into())
            }
            Ok(Ok(ProbeOutcome::Mismatch(reason))) => {
                warn!("Recovery for link {} rejected: {}", id, reason);
                Err(not_verifiable(reason, false).into())
            }
            Ok(Ok(ProbeOutcome::Confirmed)) => {
                info!("Ledger confirmed {} for link {}", tx_hash, id);
                self.commit(id, tx_hash).await
            }
        }
    }

    async fn commit(&self, id: Uuid, tx_ref: &str) -> AppResult<DepositRecorded> {
        match self.store.try_set_deposit(id, tx_ref).await? {
            DepositUpdate::Applied => {
                info!("Recorded deposit {} for link {}", tx_ref, id);
                Ok(DepositRecorded::Applied)
            }
            DepositUpdate::AlreadySet(existing) if existing == tx_ref => {
                Ok(DepositRecorded::AlreadyRecorded)
            }
            DepositUpdate::AlreadySet(existing) => {
                warn!(
                    "Refusing deposit {} for link {}: already funded by {}",
                    tx_ref, id, existing
                );
                Err(LinkError::DepositConflict {
                    link_id: id,
                    existing,
                    attempted: tx_ref.to_string(),
                }
                .into())
            }
            DepositUpdate::HeldByOtherLink(owner) => {
                warn!(
                    "Refusing deposit {} for link {}: it already funds link {}",
                    tx_ref, id, owner
                );
                Err(LinkError::DepositReused {
                    tx_ref: tx_ref.to_string(),
                    owner,
                }
                .into())
            }
            DepositUpdate::NotFound => Err(LinkError::NotFound(id.to_string()).into()),
        }
    }
}
