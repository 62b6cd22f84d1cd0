use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use super::models::*;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult, LinkError};
use crate::ledger::models::{AssetType, ReconciliationAnomaly};
use crate::links::{ClaimOutcome, LinkService, LinkStatusView};

pub const RELAY_TOKEN_HEADER: &str = "x-relay-token";
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

#[derive(Clone)]
pub struct AppState {
    pub links: Arc<LinkService>,
    pub config: Arc<AppConfig>,
}

/// Compare a shared-secret header without short-circuiting on the first
/// differing byte
fn require_token(headers: &HeaderMap, header: &str, expected: &str) -> AppResult<()> {
    let provided = headers
        .get(header)
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let matches = provided.len() == expected.len()
        && provided
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0;

    if !matches {
        warn!("Rejected request with invalid {}", header);
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

/// Create a payment link
/// POST /api/v1/links
pub async fn create_link(
    State(state): State<AppState>,
    Json(request): Json<CreateLinkRequest>,
) -> AppResult<(StatusCode, Json<CreateLinkResponse>)> {
    let request = validated(request)?;

    let asset_type = AssetType::from_str(&request.asset_type)?;
    let amount = Decimal::from_str(request.amount.trim())
        .map_err(|_| LinkError::InvalidAmount(request.amount.clone()))?;
    let units = asset_type.to_units(amount)?;

    let link = state
        .links
        .create_link(units, asset_type, request.creator_address)
        .await?;
    let fees = state.links.fees().compute(link.amount, link.asset_type)?;

    Ok((
        StatusCode::CREATED,
        Json(CreateLinkResponse {
            link_id: link.id,
            amount: link.amount,
            amount_display: link.asset_type.to_display(link.amount),
            asset_type: link.asset_type,
            fee_breakdown: fees,
            fee_display: fees.display(link.asset_type),
            created_at: link.created_at,
        }),
    ))
}

/// GET /api/v1/links/:id
pub async fn get_link_status(
    State(state): State<AppState>,
    Path(link_id): Path<String>,
) -> AppResult<Json<LinkStatusView>> {
    Ok(Json(state.links.create_status(&link_id).await?))
}

/// Push deposit recording; only the settlement relay holds the token
/// POST /api/v1/links/:id/deposit
pub async fn record_deposit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(link_id): Path<String>,
    Json(request): Json<RecordDepositRequest>,
) -> AppResult<Json<DepositResponse>> {
    require_token(&headers, RELAY_TOKEN_HEADER, &state.config.relay_token)?;
    let request = validated(request)?;

    let result = state.links.record_deposit(&link_id, &request.tx_ref).await?;

    Ok(Json(DepositResponse {
        link_id,
        deposit_tx: request.tx_ref,
        result,
    }))
}

/// POST /api/v1/links/:id/recover
pub async fn recover_deposit(
    State(state): State<AppState>,
    Path(link_id): Path<String>,
    Json(request): Json<RecoverDepositRequest>,
) -> AppResult<Json<DepositResponse>> {
    let request = validated(request)?;
    info!("Manual deposit recovery for link {} with {}", link_id, request.tx_hash);

    let result = state.links.recover_deposit(&link_id, &request.tx_hash).await?;

    Ok(Json(DepositResponse {
        link_id,
        deposit_tx: request.tx_hash,
        result,
    }))
}

/// 200 when the link is claimed, 202 when the payout went out but needs
/// operator reconciliation
/// POST /api/v1/links/:id/claim
pub async fn claim_link(
    State(state): State<AppState>,
    Path(link_id): Path<String>,
    Json(request): Json<ClaimRequest>,
) -> AppResult<(StatusCode, Json<ClaimOutcome>)> {
    let request = validated(request)?;

    let outcome = state
        .links
        .claim(&link_id, &request.recipient_address)
        .await?;

    let status = if outcome.is_claimed() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(outcome)))
}

/// GET /api/v1/history/:address
pub async fn get_history(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> AppResult<Json<HistoryResponse>> {
    let history = state.links.history(&address).await?;
    Ok(Json(HistoryResponse {
        address,
        link_ids: history.link_ids,
        truncated: history.truncated,
    }))
}

/// GET /api/v1/admin/anomalies?open_only=true
pub async fn list_anomalies(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AnomalyQuery>,
) -> AppResult<Json<AnomaliesResponse>> {
    require_token(&headers, ADMIN_TOKEN_HEADER, &state.config.admin_token)?;

    let anomalies = state.links.anomalies(query.open_only).await?;
    Ok(Json(AnomaliesResponse {
        count: anomalies.len(),
        anomalies,
    }))
}

/// POST /api/v1/admin/anomalies/:id/acknowledge
pub async fn acknowledge_anomaly(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(anomaly_id): Path<String>,
    Json(request): Json<AcknowledgeAnomalyRequest>,
) -> AppResult<Json<ReconciliationAnomaly>> {
    require_token(&headers, ADMIN_TOKEN_HEADER, &state.config.admin_token)?;
    let request = validated(request)?;

    let anomaly = state
        .links
        .acknowledge_anomaly(&anomaly_id, &request.acknowledged_by)
        .await?;
    Ok(Json(anomaly))
}

/// Health check endpoint
/// GET /health
pub async fn health_check(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    let open_anomalies = state.links.open_anomaly_count().await?;

    Ok(Json(HealthResponse {
        status: if open_anomalies == 0 {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        timestamp: Utc::now(),
        open_anomalies,
    }))
}
