// Storage module - holds the latest published value per (kind, node)
//
// This module is responsible for:
// 1. Owning the Prometheus registry and one gauge family per metric kind
// 2. Accepting concurrent publishes from every poll loop
// 3. Producing snapshots and the text exposition for the scrape endpoint
//
// The store only keeps the most recent sample. Entries are created on first
// publish and never removed, so a node that stops answering keeps its last
// values.

use prometheus::proto::MetricFamily;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use crate::metrics::{MetricKind, ObservationSet, NAMESPACE};

/// Label carrying the broker's self-reported node name
pub const NODE_LABEL: &str = "node";

/// Errors that can occur while registering or encoding gauges
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Prometheus registry error: {0}")]
    RegistryError(#[from] prometheus::Error),

    #[error("Encoded metrics are not valid UTF-8: {0}")]
    EncodingError(#[from] std::string::FromUtf8Error),
}

/// One (kind, node, value) entry of a snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub kind: MetricKind,
    pub node: String,
    pub value: f64,
}

/// Concurrently writable set of labeled gauges
///
/// Constructed once at startup and shared through an `Arc` by the poll loops
/// and the scrape handler. Each `GaugeVec` synchronizes its own children, so
/// different (kind, node) pairs never contend with each other beyond the
/// brief lookup of the child gauge.
pub struct MetricStore {
    registry: Registry,
    gauges: HashMap<MetricKind, GaugeVec>,
}

impl MetricStore {
    /// Creates a store with a private registry and one gauge per kind
    ///
    /// # Returns
    /// * `Ok(MetricStore)` - All gauge families registered
    /// * `Err(StoreError)` - A gauge definition was rejected by the registry
    pub fn new() -> Result<Self, StoreError> {
        let registry = Registry::new();
        let mut gauges = HashMap::with_capacity(MetricKind::ALL.len());

        for kind in MetricKind::ALL {
            let opts = Opts::new(kind.metric_name(), kind.help()).namespace(NAMESPACE);
            let gauge = GaugeVec::new(opts, &[NODE_LABEL])?;
            registry.register(Box::new(gauge.clone()))?;
            gauges.insert(kind, gauge);
        }

        Ok(MetricStore { registry, gauges })
    }

    /// Sets the gauge for `(kind, node)` to `value`, last write wins
    pub fn publish(&self, kind: MetricKind, node: &str, value: f64) {
        if let Some(gauge) = self.gauges.get(&kind) {
            gauge.with_label_values(&[node]).set(value);
        }
    }

    /// Publishes every observation in a set under its own node label
    ///
    /// # Returns
    /// Number of values written
    pub fn publish_all(&self, observations: &ObservationSet) -> usize {
        for observation in observations.iter() {
            self.publish(observation.kind, &observation.node, observation.value);
        }
        debug!(
            "Published {} value(s) for node {:?}",
            observations.len(),
            observations.node()
        );
        observations.len()
    }

    /// Returns every stored value, ordered by metric name then node
    pub fn snapshot(&self) -> Vec<Sample> {
        self.registry
            .gather()
            .iter()
            .filter_map(|family| {
                MetricKind::from_fq_name(family.get_name()).map(|kind| (kind, family))
            })
            .flat_map(|(kind, family)| samples(kind, family))
            .collect()
    }

    /// Latest value for one `(kind, node)` pair, if it was ever published
    pub fn get(&self, kind: MetricKind, node: &str) -> Option<f64> {
        self.snapshot()
            .into_iter()
            .find(|sample| sample.kind == kind && sample.node == node)
            .map(|sample| sample.value)
    }

    /// Renders the registry in the Prometheus text exposition format
    pub fn encode(&self) -> Result<String, StoreError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Content type matching [`MetricStore::encode`]
    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }
}

fn samples(kind: MetricKind, family: &MetricFamily) -> Vec<Sample> {
    family
        .get_metric()
        .iter()
        .filter_map(|metric| {
            let node = metric
                .get_label()
                .iter()
                .find(|label| label.get_name() == NODE_LABEL)?
                .get_value()
                .to_string();
            Some(Sample {
                kind,
                node,
                value: metric.get_gauge().get_value(),
            })
        })
        .collect()
}
