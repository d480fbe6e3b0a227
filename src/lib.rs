pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod redis_client;
pub mod services;
pub mod store;

#[cfg(feature = "http")]
pub mod controllers;
#[cfg(feature = "http")]
pub mod middleware;

pub use error::{LedgerError, LedgerResult};
pub use services::Ledger;

// Shared state для HTTP-обработчиков
#[derive(Clone)]
pub struct AppState {
    pub ledger: Ledger,
}
