use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("External error: {0}")]
    ExternalError(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized")]
    Unauthorized,
}

/// Payment link errors, grouped by [`ErrorClass`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Malformed link id: {0}")]
    InvalidLinkId(String),

    #[error("Malformed recipient address: {0}")]
    InvalidRecipient(String),

    #[error("Malformed address: {0}")]
    InvalidAddress(String),

    #[error("Malformed transaction reference: {0}")]
    InvalidTxRef(String),

    #[error("Unsupported asset: {0}")]
    UnsupportedAsset(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Amount {amount} does not cover fees of {total_fees}")]
    InsufficientAmount { amount: u64, total_fees: u64 },

    #[error("Link not found: {0}")]
    NotFound(String),

    #[error("Link {0} has no recorded deposit yet")]
    DepositPending(Uuid),

    #[error("Link {0} is already claimed")]
    AlreadyClaimed(Uuid),

    #[error("Link {link_id} is funded by {existing}, refusing {attempted}")]
    DepositConflict {
        link_id: Uuid,
        existing: String,
        attempted: String,
    },

    #[error("Transaction {tx_ref} already funds link {owner}")]
    DepositReused { tx_ref: String, owner: Uuid },

    #[error("Link {0} has an unresolved payout awaiting reconciliation")]
    ReconciliationPending(Uuid),

    #[error("Transaction {tx_hash} could not be verified: {reason}")]
    TransactionNotVerifiable {
        tx_hash: String,
        reason: String,
        retryable: bool,
    },

    #[error("Settlement rejected: {0}")]
    SettlementRejected(String),

    #[error("Settlement unavailable: {0}")]
    SettlementUnavailable(String),

    #[error("Settlement for link {0} timed out; re-query the link before retrying")]
    SettlementTimeout(Uuid),
}

/// How a caller should react to a [`LinkError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Malformed input; fix and resubmit.
    Validation,
    /// Unknown link.
    NotFound,
    /// The requested transition is no longer valid.
    StateConflict,
    /// Not ready yet; retry after a delay.
    Pending,
    /// The settlement network failed or rejected the payout.
    ExternalExecution,
}

impl LinkError {
    pub fn class(&self) -> ErrorClass {
        match self {
            LinkError::InvalidLinkId(_)
            | LinkError::InvalidRecipient(_)
            | LinkError::InvalidAddress(_)
            | LinkError::InvalidTxRef(_)
            | LinkError::UnsupportedAsset(_)
            | LinkError::InvalidAmount(_)
            | LinkError::InsufficientAmount { .. } => ErrorClass::Validation,
            LinkError::NotFound(_) => ErrorClass::NotFound,
            LinkError::AlreadyClaimed(_)
            | LinkError::DepositConflict { .. }
            | LinkError::DepositReused { .. }
            | LinkError::ReconciliationPending(_) => ErrorClass::StateConflict,
            LinkError::DepositPending(_) => ErrorClass::Pending,
            LinkError::TransactionNotVerifiable { retryable, .. } => {
                if *retryable {
                    ErrorClass::Pending
                } else {
                    ErrorClass::Validation
                }
            }
            LinkError::SettlementRejected(_)
            | LinkError::SettlementUnavailable(_)
            | LinkError::SettlementTimeout(_) => ErrorClass::ExternalExecution,
        }
    }

    /// Whether repeating the same request later can succeed without changes.
    ///
    /// A rejected settlement is final for that attempt; unavailable and
    /// timed-out settlements left the link untouched.
    pub fn is_retryable(&self) -> bool {
        match self {
            LinkError::DepositPending(_) => true,
            LinkError::TransactionNotVerifiable { retryable, .. } => *retryable,
            LinkError::SettlementUnavailable(_) | LinkError::SettlementTimeout(_) => true,
            _ => false,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            LinkError::InvalidLinkId(_) => "INVALID_LINK_ID",
            LinkError::InvalidRecipient(_) => "INVALID_RECIPIENT",
            LinkError::InvalidAddress(_) => "INVALID_ADDRESS",
            LinkError::InvalidTxRef(_) => "INVALID_TX_REF",
            LinkError::UnsupportedAsset(_) => "UNSUPPORTED_ASSET",
            LinkError::InvalidAmount(_) => "INVALID_AMOUNT",
            LinkError::InsufficientAmount { .. } => "INSUFFICIENT_AMOUNT",
            LinkError::NotFound(_) => "LINK_NOT_FOUND",
            LinkError::DepositPending(_) => "DEPOSIT_PENDING",
            LinkError::AlreadyClaimed(_) => "ALREADY_CLAIMED",
            LinkError::DepositConflict { .. } => "DEPOSIT_CONFLICT",
            LinkError::DepositReused { .. } => "DEPOSIT_ALREADY_USED",
            LinkError::ReconciliationPending(_) => "RECONCILIATION_PENDING",
            LinkError::TransactionNotVerifiable { .. } => "TRANSACTION_NOT_VERIFIABLE",
            LinkError::SettlementRejected(_) => "SETTLEMENT_REJECTED",
            LinkError::SettlementUnavailable(_) => "SETTLEMENT_UNAVAILABLE",
            LinkError::SettlementTimeout(_) => "SETTLEMENT_TIMEOUT",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self.class() {
            ErrorClass::Validation => StatusCode::BAD_REQUEST,
            ErrorClass::NotFound => StatusCode::NOT_FOUND,
            ErrorClass::StateConflict => StatusCode::CONFLICT,
            ErrorClass::Pending => StatusCode::PRECONDITION_FAILED,
            ErrorClass::ExternalExecution => match self {
                LinkError::SettlementTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
                LinkError::SettlementUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_GATEWAY,
            },
        }
    }
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::Link(err) => (
                err.status_code(),
                err.code(),
                err.to_string(),
                Some(serde_json::json!({
                    "class": err.class(),
                    "retryable": err.is_retryable(),
                })),
            ),
            AppError::InvalidInput(message) => (
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                message,
                None,
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Missing or invalid credentials".to_string(),
                None,
            ),
            AppError::ExternalError(_) => (
                StatusCode::BAD_GATEWAY,
                "EXTERNAL_ERROR",
                "An upstream service failed".to_string(),
                None,
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::ExternalError(format!("HTTP request error: {:?}", error))
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
