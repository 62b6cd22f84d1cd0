use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::LinkError;

/// Asset a payment link is denominated in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "asset_type", rename_all = "lowercase")]
pub enum AssetType {
    Sol,
    Usdc,
    Usdt,
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AssetType {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sol" => Ok(AssetType::Sol),
            "usdc" => Ok(AssetType::Usdc),
            "usdt" => Ok(AssetType::Usdt),
            other => Err(LinkError::UnsupportedAsset(other.to_string())),
        }
    }
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Sol => "sol",
            AssetType::Usdc => "usdc",
            AssetType::Usdt => "usdt",
        }
    }

    pub fn all() -> Vec<AssetType> {
        vec![AssetType::Sol, AssetType::Usdc, AssetType::Usdt]
    }

    /// Decimal places of the smallest indivisible unit
    pub fn decimals(&self) -> u32 {
        match self {
            AssetType::Sol => 9,
            AssetType::Usdc | AssetType::Usdt => 6,
        }
    }

    /// SPL token mint; `None` for native SOL
    pub fn mint(&self) -> Option<&'static str> {
        match self {
            AssetType::Sol => None,
            AssetType::Usdc => Some("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"),
            AssetType::Usdt => Some("Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB"),
        }
    }

    /// Render smallest units as a decimal amount (17_000_000 lamports -> 0.017)
    pub fn to_display(&self, units: u64) -> Decimal {
        Decimal::from_i128_with_scale(units as i128, self.decimals())
    }

    /// Convert a decimal amount into smallest units, rejecting sub-unit precision.
    pub fn to_units(&self, amount: Decimal) -> Result<u64, LinkError> {
        if amount.is_sign_negative() || amount.is_zero() {
            return Err(LinkError::InvalidAmount(format!(
                "{} must be greater than zero",
                amount
            )));
        }

        let scaled = amount
            .checked_mul(Decimal::from(10u64.pow(self.decimals())))
            .ok_or_else(|| LinkError::InvalidAmount(format!("{} is too large", amount)))?;

        if scaled.fract() != Decimal::ZERO {
            return Err(LinkError::InvalidAmount(format!(
                "{} has more than {} decimal places",
                amount,
                self.decimals()
            )));
        }

        u64::try_from(scaled.trunc())
            .map_err(|_| LinkError::InvalidAmount(format!("{} is out of range", amount)))
    }
}

/// Payment link - the single-use transfer record
///
/// INVARIANTS:
/// - `deposit_tx` is written at most once
/// - `claimed` only moves false -> true, together with a non-empty `withdraw_tx`
/// - no claim without a non-empty `deposit_tx`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLink {
    pub id: Uuid,
    /// Gross amount in smallest units
    pub amount: u64,
    pub asset_type: AssetType,
    /// Absent on links created before attribution was recorded
    pub creator_address: Option<String>,
    pub deposit_tx: Option<String>,
    pub claimed: bool,
    pub withdraw_tx: Option<String>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
}

impl PaymentLink {
    pub fn new(amount: u64, asset_type: AssetType, creator_address: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            amount,
            asset_type,
            creator_address,
            deposit_tx: None,
            claimed: false,
            withdraw_tx: None,
            created_at: Utc::now(),
            claimed_at: None,
        }
    }

    pub fn has_deposit(&self) -> bool {
        self.deposit_tx
            .as_deref()
            .map(|tx| !tx.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn is_claimable(&self) -> bool {
        self.has_deposit() && !self.claimed
    }

    /// Whether `tx_ref` funded or paid out this link
    pub fn references_tx(&self, tx_ref: &str) -> bool {
        self.deposit_tx.as_deref() == Some(tx_ref) || self.withdraw_tx.as_deref() == Some(tx_ref)
    }
}

/// Result of the conditional deposit write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepositUpdate {
    Applied,
    AlreadySet(String),
    /// The reference already funds another link
    HeldByOtherLink(Uuid),
    NotFound,
}

/// Result of the conditional claim commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimUpdate {
    Applied,
    AlreadyClaimed,
    NotFound,
    MissingDeposit,
}

impl ClaimUpdate {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimUpdate::Applied => "applied",
            ClaimUpdate::AlreadyClaimed => "already_claimed",
            ClaimUpdate::NotFound => "not_found",
            ClaimUpdate::MissingDeposit => "missing_deposit",
        }
    }
}

/// An external payout that the store refused to commit.
///
/// The payout cannot be undone; an operator reconciles the funds and
/// acknowledges the record. Records are never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationAnomaly {
    pub id: Uuid,
    pub link_id: Uuid,
    pub withdraw_tx: String,
    pub recipient: String,
    pub net_amount: u64,
    pub asset_type: AssetType,
    pub commit_outcome: String,
    pub detected_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
}

impl ReconciliationAnomaly {
    pub fn new(
        link_id: Uuid,
        withdraw_tx: String,
        recipient: String,
        net_amount: u64,
        asset_type: AssetType,
        commit_outcome: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            link_id,
            withdraw_tx,
            recipient,
            net_amount,
            asset_type,
            commit_outcome,
            detected_at: Utc::now(),
            acknowledged_at: None,
            acknowledged_by: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.acknowledged_at.is_none()
    }
}
