//! Metrics collection for the Brandreach backend
//!
//! In-memory counters and latency tracking for the attribution and payout
//! pipelines, exposed as a JSON snapshot for observability tooling.

use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::sync::RwLock;
use tracing::debug;

/// Maximum latency samples retained per operation
const LATENCY_WINDOW: usize = 1000;

/// Core metrics collection service
#[derive(Clone)]
pub struct MetricsService {
    counters: Arc<RwLock<HashMap<String, AtomicU64>>>,
    latencies: Arc<RwLock<HashMap<String, Vec<Duration>>>>,
    start_time: Instant,
}

/// Aggregated latency view for one operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: usize,
    pub avg_ms: f64,
    pub max_ms: f64,
}

/// Point-in-time view of all collected metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    pub counters: HashMap<String, u64>,
    pub latencies: HashMap<String, LatencySummary>,
}

impl MetricsService {
    /// Creates a new metrics service with empty counters
    pub fn new() -> Self {
        Self {
            counters: Arc::new(RwLock::new(HashMap::new())),
            latencies: Arc::new(RwLock::new(HashMap::new())),
            start_time: Instant::now(),
        }
    }

    /// Increments a named counter metric by the specified value
    pub async fn increment_counter(&self, name: &str, value: u64) {
        let mut counters = self.counters.write().await;
        let counter = counters
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0));
        counter.fetch_add(value, Ordering::Relaxed);

        debug!("Incremented counter '{}' by {}", name, value);
    }

    /// Records a latency measurement for performance tracking
    pub async fn record_latency(&self, name: &str, duration: Duration) {
        let mut latencies = self.latencies.write().await;
        let samples = latencies.entry(name.to_string()).or_insert_with(Vec::new);

        // Bound memory growth to the most recent window
        if samples.len() >= LATENCY_WINDOW {
            samples.remove(0);
        }

        samples.push(duration);
    }

    /// Produces a snapshot of all counters and latency summaries
    pub async fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.counters.read().await;
        let latencies = self.latencies.read().await;

        let counter_values = counters
            .iter()
            .map(|(name, counter)| (name.clone(), counter.load(Ordering::Relaxed)))
            .collect();

        let latency_summaries = latencies
            .iter()
            .filter(|(_, samples)| !samples.is_empty())
            .map(|(name, samples)| {
                let total_ms: f64 = samples.iter().map(|d| d.as_secs_f64() * 1000.0).sum();
                let max_ms = samples
                    .iter()
                    .map(|d| d.as_secs_f64() * 1000.0)
                    .fold(0.0, f64::max);
                (
                    name.clone(),
                    LatencySummary {
                        count: samples.len(),
                        avg_ms: total_ms / samples.len() as f64,
                        max_ms,
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            counters: counter_values,
            latencies: latency_summaries,
        }
    }
}

impl Default for MetricsService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counters_accumulate() {
        let metrics = MetricsService::new();

        metrics.increment_counter("clicks_recorded", 1).await;
        metrics.increment_counter("clicks_recorded", 2).await;
        metrics.increment_counter("conversions_recorded", 1).await;

        let snapshot = metrics.snapshot().await;
        assert_eq!(snapshot.counters.get("clicks_recorded"), Some(&3));
        assert_eq!(snapshot.counters.get("conversions_recorded"), Some(&1));
    }

    #[tokio::test]
    async fn latency_summary_reports_count_and_average() {
        let metrics = MetricsService::new();

        metrics
            .record_latency("record_click", Duration::from_millis(10))
            .await;
        metrics
            .record_latency("record_click", Duration::from_millis(30))
            .await;

        let snapshot = metrics.snapshot().await;
        let summary = snapshot.latencies.get("record_click").unwrap();
        assert_eq!(summary.count, 2);
        assert!((summary.avg_ms - 20.0).abs() < 1.0);
        assert!(summary.max_ms >= 29.0);
    }
}
