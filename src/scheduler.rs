// Scheduler module - runs one independent polling loop per RabbitMQ node
//
// This module implements the core scheduling logic using Tokio tasks.
// Each node is polled on its own interval as specified in the configuration.
//
// # Architecture
// - Each node runs in its own async task for the lifetime of the process
// - A cycle is: fetch overview, fetch queues, extract, publish, sleep
// - Failures are logged and only skip the affected metric kinds
// - Tasks stop when the shared cancellation token is cancelled

use futures_util::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{parse_interval, FALLBACK_INTERVAL};
use crate::metrics::extract::{extract_overview, extract_queues, ExtractionError};
use crate::metrics::ObservationSet;
use crate::source::{BrokerSource, Resource};
use crate::storage::MetricStore;

/// A node to poll together with its effective interval string
///
/// The interval is kept unparsed: it is parsed again before every sleep.
pub struct PollTarget {
    pub source: Box<dyn BrokerSource>,
    pub interval: String,
}

impl PollTarget {
    pub fn new(source: Box<dyn BrokerSource>, interval: impl Into<String>) -> Self {
        PollTarget {
            source,
            interval: interval.into(),
        }
    }
}

/// Poll scheduler that owns the per-node collection tasks
///
/// Every task shares the same store, so the scrape endpoint sees the latest
/// values of all nodes. One node being slow or unreachable never delays the
/// others.
pub struct PollScheduler {
    /// Store the loops publish into
    store: Arc<MetricStore>,

    /// Cancelled on process shutdown
    shutdown: CancellationToken,
}

impl PollScheduler {
    /// Creates a new PollScheduler instance
    ///
    /// # Arguments
    /// * `store` - Metric store shared with the scrape endpoint
    /// * `shutdown` - Token that stops every loop when cancelled
    pub fn new(store: Arc<MetricStore>, shutdown: CancellationToken) -> Self {
        PollScheduler { store, shutdown }
    }

    /// Starts one polling task per target and waits for all of them
    ///
    /// The tasks only return once the shutdown token is cancelled, so this
    /// future normally runs for the lifetime of the process.
    pub async fn start(self, targets: Vec<PollTarget>) {
        info!("Starting poll scheduler for {} node(s)", targets.len());

        let mut handles = Vec::with_capacity(targets.len());

        for target in targets {
            info!(
                "Scheduling node '{}' with interval '{}'",
                target.source.name(),
                target.interval
            );

            let store = Arc::clone(&self.store);
            let shutdown = self.shutdown.clone();

            handles.push(tokio::spawn(async move {
                Self::run_node_loop(target, store, shutdown).await;
            }));
        }

        info!("Successfully started {} polling task(s)", handles.len());

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("Polling task panicked: {}", e);
            }
        }

        info!("All polling tasks have stopped");
    }

    /// Runs a single node's polling loop until shutdown
    ///
    /// The first cycle starts immediately. Cycles never overlap: the next one
    /// begins only after the previous sleep has elapsed.
    async fn run_node_loop(target: PollTarget, store: Arc<MetricStore>, shutdown: CancellationToken) {
        let name = target.source.name().to_string();
        info!("Starting polling loop for node '{}'", name);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = poll_cycle(target.source.as_ref(), &store) => {}
            }

            let delay = sleep_duration(&name, &target.interval);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        info!("Polling loop for node '{}' stopped", name);
    }

    /// Polls every target once, without sleeping
    ///
    /// # Returns
    /// Number of nodes for which at least one value was published
    pub async fn poll_once(&self, targets: &[PollTarget]) -> usize {
        info!("Running one-time poll of {} node(s)", targets.len());

        let mut success_count = 0;
        for target in targets {
            if !poll_cycle(target.source.as_ref(), &self.store).await.is_empty() {
                success_count += 1;
            }
        }

        info!(
            "One-time poll complete: {}/{} nodes succeeded",
            success_count,
            targets.len()
        );

        success_count
    }
}

/// Runs one fetch-extract-publish cycle for a node
///
/// The two resources are handled independently: a failure on one of them
/// leaves the store untouched for its kinds only.
///
/// # Returns
/// The observations that were published (empty if the cycle failed entirely)
pub async fn poll_cycle(source: &dyn BrokerSource, store: &MetricStore) -> ObservationSet {
    let overview = fetch_and_extract(source, Resource::Overview, extract_overview).await;
    let queues = fetch_and_extract(source, Resource::Queues, extract_queues)
        .await
        .flatten();

    let observations = ObservationSet::from_parts(overview, queues);
    if observations.is_empty() {
        warn!("No metrics updated for node '{}' this cycle", source.name());
        return observations;
    }

    let published = store.publish_all(&observations);
    info!(
        "Metrics updated successfully for node '{}' ({}, {} value(s))",
        source.name(),
        observations.node().unwrap_or("unknown"),
        published
    );

    observations
}

async fn fetch_and_extract<T>(
    source: &dyn BrokerSource,
    resource: Resource,
    extract: fn(&Value) -> Result<T, ExtractionError>,
) -> Option<T> {
    let payload = match source.fetch(resource).await {
        Ok(payload) => payload,
        Err(e) => {
            error!("Failed to fetch {} from node '{}': {}", resource, source.name(), e);
            return None;
        }
    };

    match extract(&payload) {
        Ok(extracted) => Some(extracted),
        Err(e) => {
            error!(
                "Failed to extract metrics from {} of node '{}': {}",
                resource,
                source.name(),
                e
            );
            None
        }
    }
}

/// Parses the interval for the upcoming sleep
///
/// A malformed interval is never cached or corrected: every cycle parses it
/// again and falls back to 30 seconds for that sleep only.
pub fn sleep_duration(node: &str, interval: &str) -> Duration {
    match parse_interval(interval) {
        Some(duration) => duration,
        None => {
            warn!(
                "Invalid interval '{}' for node '{}', sleeping {}s instead",
                interval,
                node,
                FALLBACK_INTERVAL.as_secs()
            );
            FALLBACK_INTERVAL
        }
    }
}
