use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::fees::{FeeBreakdown, FeeDisplay};
use crate::ledger::models::{AssetType, ReconciliationAnomaly};
use crate::links::DepositRecorded;

// ========== REQUEST MODELS ==========

/// Create a payment link
#[derive(Debug, Deserialize, Validate)]
pub struct CreateLinkRequest {
    /// Decimal amount in the asset's display unit, as a string ("0.017")
    #[validate(length(min = 1, max = 40))]
    pub amount: String,
    #[validate(length(min = 3, max = 8))]
    pub asset_type: String,
    #[validate(length(min = 32, max = 44))]
    pub creator_address: Option<String>,
}

/// Push deposit recording from the settlement relay
#[derive(Debug, Deserialize, Validate)]
pub struct RecordDepositRequest {
    #[validate(length(min = 1, max = 128))]
    pub tx_ref: String,
}

/// Manual deposit recovery from a link holder
#[derive(Debug, Deserialize, Validate)]
pub struct RecoverDepositRequest {
    #[validate(length(min = 1, max = 128))]
    pub tx_hash: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ClaimRequest {
    #[validate(length(min = 1, max = 64))]
    pub recipient_address: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AcknowledgeAnomalyRequest {
    #[validate(length(min = 1, max = 64))]
    pub acknowledged_by: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnomalyQuery {
    #[serde(default)]
    pub open_only: bool,
}

/// Run derive-based validation, flattening field errors into one message
pub fn validated<T: Validate>(request: T) -> AppResult<T> {
    request.validate().map_err(|e| {
        let errors = e
            .field_errors()
            .into_iter()
            .map(|(field, errors)| {
                let codes: Vec<String> = errors.iter().map(|e| e.code.to_string()).collect();
                format!("{}: {}", field, codes.join(", "))
            })
            .collect::<Vec<String>>()
            .join("; ");

        AppError::InvalidInput(format!("Validation failed: {}", errors))
    })?;
    Ok(request)
}

// ========== RESPONSE MODELS ==========

#[derive(Debug, Serialize)]
pub struct CreateLinkResponse {
    pub link_id: Uuid,
    pub amount: u64,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount_display: Decimal,
    pub asset_type: AssetType,
    pub fee_breakdown: FeeBreakdown,
    pub fee_display: FeeDisplay,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct DepositResponse {
    pub link_id: String,
    pub deposit_tx: String,
    pub result: DepositRecorded,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub address: String,
    pub link_ids: Vec<Uuid>,
    pub truncated: bool,
}

#[derive(Debug, Serialize)]
pub struct AnomaliesResponse {
    pub count: usize,
    pub anomalies: Vec<ReconciliationAnomaly>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub open_anomalies: usize,
}
