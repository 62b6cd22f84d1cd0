use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{prelude::FromRow, PgPool};
use tracing::info;
use uuid::Uuid;

use super::models::*;
use super::store::LinkStore;
use crate::error::{AppError, AppResult};

const LINK_COLUMNS: &str = r#"
    id, amount, asset_type, creator_address, deposit_tx, claimed,
    withdraw_tx, created_at, claimed_at
"#;

const ANOMALY_COLUMNS: &str = r#"
    id, link_id, withdraw_tx, recipient, net_amount, asset_type,
    commit_outcome, detected_at, acknowledged_at, acknowledged_by
"#;

#[derive(Debug, FromRow)]
struct PaymentLinkRow {
    id: Uuid,
    amount: i64,
    asset_type: AssetType,
    creator_address: Option<String>,
    deposit_tx: Option<String>,
    claimed: bool,
    withdraw_tx: Option<String>,
    created_at: DateTime<Utc>,
    claimed_at: Option<DateTime<Utc>>,
}

impl TryFrom<PaymentLinkRow> for PaymentLink {
    type Error = AppError;

    fn try_from(row: PaymentLinkRow) -> Result<Self, Self::Error> {
        let amount = u64::try_from(row.amount).map_err(|_| {
            AppError::Internal(format!("Link {} has negative amount {}", row.id, row.amount))
        })?;

        Ok(PaymentLink {
            id: row.id,
            amount,
            asset_type: row.asset_type,
            creator_address: row.creator_address,
            deposit_tx: row.deposit_tx,
            claimed: row.claimed,
            withdraw_tx: row.withdraw_tx,
            created_at: row.created_at,
            claimed_at: row.claimed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AnomalyRow {
    id: Uuid,
    link_id: Uuid,
    withdraw_tx: String,
    recipient: String,
    net_amount: i64,
    asset_type: AssetType,
    commit_outcome: String,
    detected_at: DateTime<Utc>,
    acknowledged_at: Option<DateTime<Utc>>,
    acknowledged_by: Option<String>,
}

impl TryFrom<AnomalyRow> for ReconciliationAnomaly {
    type Error = AppError;

    fn try_from(row: AnomalyRow) -> Result<Self, Self::Error> {
        let net_amount = u64::try_from(row.net_amount).map_err(|_| {
            AppError::Internal(format!(
                "Anomaly {} has negative net amount {}",
                row.id, row.net_amount
            ))
        })?;

        Ok(ReconciliationAnomaly {
            id: row.id,
            link_id: row.link_id,
            withdraw_tx: row.withdraw_tx,
            recipient: row.recipient,
            net_amount,
            asset_type: row.asset_type,
            commit_outcome: row.commit_outcome,
            detected_at: row.detected_at,
            acknowledged_at: row.acknowledged_at,
            acknowledged_by: row.acknowledged_by,
        })
    }
}

fn to_db_amount(amount: u64) -> AppResult<i64> {
    i64::try_from(amount)
        .map_err(|_| AppError::InvalidInput(format!("Amount {} exceeds storage range", amount)))
}

/// Postgres-backed link store
pub struct PgLinkStore {
    pub pool: PgPool,
}

impl PgLinkStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn collect_links(rows: Vec<PaymentLinkRow>) -> AppResult<Vec<PaymentLink>> {
        rows.into_iter().map(PaymentLink::try_from).collect()
    }

    fn collect_anomalies(rows: Vec<AnomalyRow>) -> AppResult<Vec<ReconciliationAnomaly>> {
        rows.into_iter().map(ReconciliationAnomaly::try_from).collect()
    }

    async fn deposit_owner(&self, tx_ref: &str) -> AppResult<DepositUpdate> {
        let owner = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM payment_links WHERE deposit_tx = $1",
        )
        .bind(tx_ref)
        .fetch_optional(&self.pool)
        .await?;

        owner.map(DepositUpdate::HeldByOtherLink).ok_or_else(|| {
            AppError::Internal(format!("Unique violation on {} without an owning link", tx_ref))
        })
    }
}

#[async_trait]
impl LinkStore for PgLinkStore {
    async fn insert(&self, link: &PaymentLink) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_links (
                id, amount, asset_type, creator_address, deposit_tx, claimed,
                withdraw_tx, created_at, claimed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(link.id)
        .bind(to_db_amount(link.amount)?)
        .bind(link.asset_type)
        .bind(&link.creator_address)
        .bind(&link.deposit_tx)
        .bind(link.claimed)
        .bind(&link.withdraw_tx)
        .bind(link.created_at)
        .bind(link.claimed_at)
        .execute(&self.pool)
        .await?;

        info!("Stored payment link {}", link.id);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<PaymentLink>> {
        let row = sqlx::query_as::<_, PaymentLinkRow>(&format!(
            "SELECT {} FROM payment_links WHERE id = $1",
            LINK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PaymentLink::try_from).transpose()
    }

    async fn try_set_deposit(&self, id: Uuid, tx_ref: &str) -> AppResult<DepositUpdate> {
        let result = sqlx::query(
            r#"
            UPDATE payment_links
            SET deposit_tx = $2
            WHERE id = $1 AND deposit_tx IS NULL
            "#,
        )
        .bind(id)
        .bind(tx_ref)
        .execute(&self.pool)
        .await;

        let result = match result {
            Ok(result) => result,
            // uq_payment_links_deposit_tx: the reference already funds another link
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return self.deposit_owner(tx_ref).await;
            }
            Err(e) => return Err(e.into()),
        };

        if result.rows_affected() == 1 {
            return Ok(DepositUpdate::Applied);
        }

        // deposit_tx is write-once, so whatever we read now is final.
        let existing = sqlx::query_scalar::<_, Option<String>>(
            "SELECT deposit_tx FROM payment_links WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match existing {
            None => DepositUpdate::NotFound,
            Some(existing) => DepositUpdate::AlreadySet(existing.unwrap_or_default()),
        })
    }

    async fn try_mark_claimed(&self, id: Uuid, withdraw_tx: &str) -> AppResult<ClaimUpdate> {
        let result = sqlx::query(
            r#"
            UPDATE payment_links
            SET claimed = TRUE, withdraw_tx = $2, claimed_at = NOW()
            WHERE id = $1
              AND claimed = FALSE
              AND deposit_tx IS NOT NULL
              AND deposit_tx <> ''
            "#,
        )
        .bind(id)
        .bind(withdraw_tx)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(ClaimUpdate::Applied);
        }

        // claimed is monotonic, so a refused update can be classified afterwards.
        let row = sqlx::query_as::<_, (bool, Option<String>)>(
            "SELECT claimed, deposit_tx FROM payment_links WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            None => ClaimUpdate::NotFound,
            Some((true, _)) => ClaimUpdate::AlreadyClaimed,
            Some((false, _)) => ClaimUpdate::MissingDeposit,
        })
    }

    async fn find_by_creator(&self, address: &str) -> AppResult<Vec<PaymentLink>> {
        let rows = sqlx::query_as::<_, PaymentLinkRow>(&format!(
            "SELECT {} FROM payment_links WHERE creator_address = $1 ORDER BY created_at DESC",
            LINK_COLUMNS
        ))
        .bind(address)
        .fetch_all(&self.pool)
        .await?;

        Self::collect_links(rows)
    }

    async fn find_by_tx_refs(&self, tx_refs: &[String]) -> AppResult<Vec<PaymentLink>> {
        if tx_refs.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, PaymentLinkRow>(&format!(
            "SELECT {} FROM payment_links WHERE deposit_tx = ANY($1) OR withdraw_tx = ANY($1)",
            LINK_COLUMNS
        ))
        .bind(tx_refs.to_vec())
        .fetch_all(&self.pool)
        .await?;

        Self::collect_links(rows)
    }

    async fn record_anomaly(&self, anomaly: &ReconciliationAnomaly) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reconciliation_anomalies (
                id, link_id, withdraw_tx, recipient, net_amount, asset_type,
                commit_outcome, detected_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(anomaly.id)
        .bind(anomaly.link_id)
        .bind(&anomaly.withdraw_tx)
        .bind(&anomaly.recipient)
        .bind(to_db_amount(anomaly.net_amount)?)
        .bind(anomaly.asset_type)
        .bind(&anomaly.commit_outcome)
        .bind(anomaly.detected_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_anomalies(&self, open_only: bool) -> AppResult<Vec<ReconciliationAnomaly>> {
        let rows = sqlx::query_as::<_, AnomalyRow>(&format!(
            r#"
            SELECT {}
            FROM reconciliation_anomalies
            WHERE ($1 = FALSE OR acknowledged_at IS NULL)
            ORDER BY detected_at DESC
            "#,
            ANOMALY_COLUMNS
        ))
        .bind(open_only)
        .fetch_all(&self.pool)
        .await?;

        Self::collect_anomalies(rows)
    }

    async fn has_open_anomaly(&self, link_id: Uuid) -> AppResult<bool> {
        let open = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM reconciliation_anomalies
                WHERE link_id = $1 AND acknowledged_at IS NULL
            )
            "#,
        )
        .bind(link_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(open)
    }

    async fn acknowledge_anomaly(
        &self,
        id: Uuid,
        acknowledged_by: &str,
    ) -> AppResult<Option<ReconciliationAnomaly>> {
        let row = sqlx::query_as::<_, AnomalyRow>(&format!(
            r#"
            UPDATE reconciliation_anomalies
            SET acknowledged_at = COALESCE(acknowledged_at, NOW()),
                acknowledged_by = COALESCE(acknowledged_by, $2)
            WHERE id = $1
            RETURNING {}
            "#,
            ANOMALY_COLUMNS
        ))
        .bind(id)
        .bind(acknowledged_by)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ReconciliationAnomaly::try_from).transpose()
    }
}
