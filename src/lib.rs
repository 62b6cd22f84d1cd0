pub mod api;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod execution;
pub mod fees;
pub mod ledger;
pub mod links;
pub mod probe;
pub mod server;
pub mod wallet;
