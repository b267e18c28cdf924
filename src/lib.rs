pub mod chain;
pub mod config;
pub mod database;
pub mod error;
pub mod server;
pub mod store;

pub use error::LedgerError;
