use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::LinkError;
use crate::ledger::models::AssetType;

const BPS_DENOMINATOR: u128 = 10_000;

/// Fee schedule configuration
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    /// Protocol fee in basis points of the gross amount (0.35% = 35)
    pub protocol_fee_bps: u32,
    /// Settlement overhead for native SOL links, in lamports
    pub sol_base_fee: u64,
    /// Settlement overhead for SPL token links, in token base units
    pub token_base_fee: u64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            protocol_fee_bps: 35,
            sol_base_fee: 6_000_000,   // 0.006 SOL
            token_base_fee: 1_000_000, // 1.00 USDC / USDT
        }
    }
}

/// Fee breakdown in smallest units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub base_fee: u64,
    pub protocol_fee: u64,
    pub total_fees: u64,
    pub net_amount: u64,
}

/// Fee breakdown rendered in the asset's display unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeeDisplay {
    #[serde(with = "rust_decimal::serde::str")]
    pub base_fee: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub protocol_fee: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_fees: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub net_amount: Decimal,
}

impl FeeBreakdown {
    pub fn display(&self, asset: AssetType) -> FeeDisplay {
        FeeDisplay {
            base_fee: asset.to_display(self.base_fee),
            protocol_fee: asset.to_display(self.protocol_fee),
            total_fees: asset.to_display(self.total_fees),
            net_amount: asset.to_display(self.net_amount),
        }
    }
}

/// Pure fee computation; integer arithmetic only.
#[derive(Debug, Clone, Default)]
pub struct FeeCalculator {
    schedule: FeeSchedule,
}

impl FeeCalculator {
    pub fn new(schedule: FeeSchedule) -> Self {
        Self { schedule }
    }

    pub fn schedule(&self) -> &FeeSchedule {
        &self.schedule
    }

    pub fn base_fee(&self, asset: AssetType) -> u64 {
        match asset {
            AssetType::Sol => self.schedule.sol_base_fee,
            AssetType::Usdc | AssetType::Usdt => self.schedule.token_base_fee,
        }
    }

    /// Protocol fee truncates toward zero, so the payout never exceeds what
    /// the displayed breakdown promises.
    pub fn compute(&self, amount: u64, asset: AssetType) -> Result<FeeBreakdown, LinkError> {
        let protocol_fee =
            (amount as u128 * self.schedule.protocol_fee_bps as u128 / BPS_DENOMINATOR) as u64;
        let base_fee = self.base_fee(asset);
        let total_fees = base_fee.saturating_add(protocol_fee);

        if amount <= total_fees {
            return Err(LinkError::InsufficientAmount { amount, total_fees });
        }

        Ok(FeeBreakdown {
            base_fee,
            protocol_fee,
            total_fees,
            net_amount: amount - total_fees,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reference_breakdown() {
        let calculator = FeeCalculator::default();
        let fees = calculator.compute(17_000_000, AssetType::Sol).unwrap();

        assert_eq!(fees.base_fee, 6_000_000);
        assert_eq!(fees.protocol_fee, 59_500);
        assert_eq!(fees.total_fees, 6_059_500);
        assert_eq!(fees.net_amount, 10_940_500);

        let display = fees.display(AssetType::Sol);
        assert_eq!(display.base_fee, dec!(0.006));
        assert_eq!(display.protocol_fee, dec!(0.00005950));
        assert_eq!(display.total_fees, dec!(0.00605950));
        assert_eq!(display.net_amount, dec!(0.01094050));
    }

    #[test]
    fn test_computation_is_deterministic() {
        let calculator = FeeCalculator::default();
        let first = calculator.compute(17_000_000, AssetType::Sol).unwrap();
        let second = calculator.compute(17_000_000, AssetType::Sol).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_amount_must_exceed_fees() {
        let calculator = FeeCalculator::default();
        assert!(matches!(
            calculator.compute(6_000_000, AssetType::Sol),
            Err(LinkError::InsufficientAmount { .. })
        ));
        assert!(matches!(
            calculator.compute(0, AssetType::Usdc),
            Err(LinkError::InsufficientAmount { amount: 0, .. })
        ));
        // Just above the threshold still leaves a positive payout.
        let fees = calculator.compute(6_100_000, AssetType::Sol).unwrap();
        assert_eq!(fees.net_amount, 6_100_000 - 6_000_000 - 21_350);
    }

    #[test]
    fn test_token_links_use_token_base_fee() {
        let calculator = FeeCalculator::default();
        let fees = calculator.compute(10_000_000, AssetType::Usdc).unwrap();
        assert_eq!(fees.base_fee, 1_000_000);
        assert_eq!(fees.protocol_fee, 35_000);
        assert_eq!(fees.net_amount, 8_965_000);
    }

    #[test]
    fn test_large_amounts_do_not_overflow() {
        let calculator = FeeCalculator::default();
        let fees = calculator.compute(u64::MAX, AssetType::Sol).unwrap();
        assert_eq!(fees.total_fees + fees.net_amount, u64::MAX);
    }
}
