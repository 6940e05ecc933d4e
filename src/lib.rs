pub mod adapters;
pub mod blockchain;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod risk;
pub mod services;
pub mod utils;

use std::sync::Arc;

pub use error::types::*;

use services::LendingService;

/// Shared state behind every HTTP handler
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<LendingService>,
}
