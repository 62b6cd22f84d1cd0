use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::*;
use super::store::LinkStore;
use crate::error::{AppError, AppResult};

/// Process-local link store.
///
/// Every conditional update runs under one write guard, which gives the same
/// check-and-set atomicity the Postgres store gets from `UPDATE ... WHERE`.
/// Suitable for development and tests; state is lost on restart.
pub struct InMemoryLinkStore {
    links: RwLock<HashMap<Uuid, PaymentLink>>,
    anomalies: RwLock<Vec<ReconciliationAnomaly>>,
}

impl InMemoryLinkStore {
    pub fn new() -> Self {
        Self {
            links: RwLock::new(HashMap::new()),
            anomalies: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryLinkStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LinkStore for InMemoryLinkStore {
    async fn insert(&self, link: &PaymentLink) -> AppResult<()> {
        let mut links = self.links.write().await;
        if links.contains_key(&link.id) {
            return Err(AppError::Internal(format!("Duplicate link id {}", link.id)));
        }
        links.insert(link.id, link.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<PaymentLink>> {
        let links = self.links.read().await;
        Ok(links.get(&id).cloned())
    }

    async fn try_set_deposit(&self, id: Uuid, tx_ref: &str) -> AppResult<DepositUpdate> {
        let mut links = self.links.write().await;
        match links.get(&id) {
            None => return Ok(DepositUpdate::NotFound),
            Some(link) => {
                if let Some(existing) = &link.deposit_tx {
                    return Ok(DepositUpdate::AlreadySet(existing.clone()));
                }
            }
        }

        // One on-chain deposit funds at most one link
        if let Some(owner) = links
            .values()
            .find(|l| l.id != id && l.deposit_tx.as_deref() == Some(tx_ref))
        {
            return Ok(DepositUpdate::HeldByOtherLink(owner.id));
        }

        match links.get_mut(&id) {
            Some(link) => {
                link.deposit_tx = Some(tx_ref.to_string());
                Ok(DepositUpdate::Applied)
            }
            None => Ok(DepositUpdate::NotFound),
        }
    }

    async fn try_mark_claimed(&self, id: Uuid, withdraw_tx: &str) -> AppResult<ClaimUpdate> {
        let mut links = self.links.write().await;
        let Some(link) = links.get_mut(&id) else {
            return Ok(ClaimUpdate::NotFound);
        };

        if link.claimed {
            return Ok(ClaimUpdate::AlreadyClaimed);
        }
        if !link.has_deposit() {
            return Ok(ClaimUpdate::MissingDeposit);
        }

        link.claimed = true;
        link.withdraw_tx = Some(withdraw_tx.to_string());
        link.claimed_at = Some(Utc::now());
        Ok(ClaimUpdate::Applied)
    }

    async fn find_by_creator(&self, address: &str) -> AppResult<Vec<PaymentLink>> {
        let links = self.links.read().await;
        Ok(links
            .values()
            .filter(|l| l.creator_address.as_deref() == Some(address))
            .cloned()
            .collect())
    }

    async fn find_by_tx_refs(&self, tx_refs: &[String]) -> AppResult<Vec<PaymentLink>> {
        let links = self.links.read().await;
        Ok(links
            .values()
            .filter(|l| tx_refs.iter().any(|tx| l.references_tx(tx)))
            .cloned()
            .collect())
    }

    async fn record_anomaly(&self, anomaly: &ReconciliationAnomaly) -> AppResult<()> {
        let mut anomalies = self.anomalies.write().await;
        anomalies.push(anomaly.clone());
        Ok(())
    }

    async fn list_anomalies(&self, open_only: bool) -> AppResult<Vec<ReconciliationAnomaly>> {
        let anomalies = self.anomalies.read().await;
        let mut result: Vec<_> = anomalies
            .iter()
            .filter(|a| !open_only || a.is_open())
            .cloned()
            .collect();
        result.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        Ok(result)
    }

    async fn has_open_anomaly(&self, link_id: Uuid) -> AppResult<bool> {
        let anomalies = self.anomalies.read().await;
        Ok(anomalies.iter().any(|a| a.link_id == link_id && a.is_open()))
    }

    async fn acknowledge_anomaly(
        &self,
        id: Uuid,
        acknowledged_by: &str,
    ) -> AppResult<Option<ReconciliationAnomaly>> {
        let mut anomalies = self.anomalies.write().await;
        let Some(anomaly) = anomalies.iter_mut().find(|a| a.id == id) else {
            return Ok(None);
        };

        if anomaly.is_open() {
            anomaly.acknowledged_at = Some(Utc::now());
            anomaly.acknowledged_by = Some(acknowledged_by.to_string());
        }
        Ok(Some(anomaly.clone()))
    }
}
