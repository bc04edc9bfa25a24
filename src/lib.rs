//! Brandreach backend library
//!
//! Core services for the Brandreach influencer marketplace: tracking-link
//! attribution, conversion recording with layered commission rates, and
//! payout aggregation with double-payment protection. The `brandreach-api`
//! and `brandreach-worker` binaries are thin shells over these modules.

use std::sync::Arc;

pub mod attribution;
pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod metrics;
pub mod models;
pub mod payments;
pub mod payouts;
pub mod rates;
pub mod secret;

use attribution::AttributionService;
use auth::AuthService;
use config::Config;
use database::Database;
use metrics::MetricsService;
use payouts::PayoutService;

/// Shared application state containing all service instances
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub database: Arc<Database>,
    pub attribution: Arc<AttributionService>,
    pub payouts: Arc<PayoutService>,
    pub auth: Arc<AuthService>,
    pub metrics: Arc<MetricsService>,
}
