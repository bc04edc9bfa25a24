//! Background payout worker
//!
//! Drives payouts through their settlement lifecycle: claims pending
//! payouts one at a time, submits a disbursement to the payment provider,
//! and marks the payout completed or failed. Nothing here retries a
//! submission with side effects re-applied; a failed disbursement is
//! surfaced on the payout for the influencer to re-request.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use brandreach_backend::{
    config::Config,
    database::Database,
    metrics::MetricsService,
    models::Payout,
    payments::PaymentProviderClient,
    payouts::PayoutService,
};

/// Main entry point for the background payout worker
#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.monitoring.log_level)),
        )
        .init();

    info!("Brandreach payout worker starting");

    let database = Arc::new(Database::new(&config.database_url, 5).await?);
    let metrics = Arc::new(MetricsService::new());
    let payouts = PayoutService::new(database, metrics);
    let provider = PaymentProviderClient::new(&config.payments)?;
    let poll_interval = Duration::from_secs(config.payments.poll_interval_secs);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down payout worker");
                break;
            }
            _ = run_once(&payouts, &provider, poll_interval) => {}
        }
    }

    Ok(())
}

/// Claims and processes one pending payout, or sleeps when the queue is
/// empty
async fn run_once(payouts: &PayoutService, provider: &PaymentProviderClient, poll_interval: Duration) {
    match payouts.claim_next_pending().await {
        Ok(Some(payout)) => process_payout(payouts, provider, payout).await,
        Ok(None) => tokio::time::sleep(poll_interval).await,
        Err(e) => {
            error!("Failed to claim pending payout: {}", e);
            tokio::time::sleep(poll_interval).await;
        }
    }
}

/// Submits one payout to the provider and records the outcome
async fn process_payout(payouts: &PayoutService, provider: &PaymentProviderClient, payout: Payout) {
    info!(
        "Processing payout {} ({} via {:?})",
        payout.id, payout.amount, payout.method
    );

    match provider.submit_disbursement(&payout).await {
        Ok(reference) => {
            if let Err(e) = payouts.complete_payout(payout.id, &reference).await {
                error!("Failed to mark payout {} completed: {}", payout.id, e);
            }
        }
        Err(e) => {
            if let Err(mark_err) = payouts.fail_payout(payout.id, &e.to_string()).await {
                error!("Failed to mark payout {} failed: {}", payout.id, mark_err);
            }
        }
    }
}
