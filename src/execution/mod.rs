pub mod executor;
pub mod relayer;

pub use executor::{DepositContext, SettlementExecutor, SettlementFailure, SettlementReceipt};
pub use relayer::RelayerExecutor;
