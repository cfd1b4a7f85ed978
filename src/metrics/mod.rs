// Metrics module - defines the fixed metric schema published by the exporter
//
// Every poll cycle produces an ObservationSet: a handful of named numeric values
// together with the identity the broker reported about itself. The scheduler
// hands each observation to the store, which keeps one gauge family per kind.

use std::fmt;
use tracing::debug;

pub mod extract;

/// Prefix shared by every exported metric name
pub const NAMESPACE: &str = "rabbitmq";

/// The kinds of observations extracted from the management API
///
/// The first five are read from the overview resource, `Messages` is
/// aggregated from the queues resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetricKind {
    Connections,
    Channels,
    Queues,
    Consumers,
    Exchanges,
    Messages,
}

impl MetricKind {
    /// All kinds, in exposition order
    pub const ALL: [MetricKind; 6] = [
        MetricKind::Connections,
        MetricKind::Channels,
        MetricKind::Queues,
        MetricKind::Consumers,
        MetricKind::Exchanges,
        MetricKind::Messages,
    ];

    /// Kinds read from `object_totals` in the overview resource
    pub const OVERVIEW: [MetricKind; 5] = [
        MetricKind::Connections,
        MetricKind::Channels,
        MetricKind::Queues,
        MetricKind::Consumers,
        MetricKind::Exchanges,
    ];

    /// Short name, also the key inside `object_totals`
    pub fn key(self) -> &'static str {
        match self {
            MetricKind::Connections => "connections",
            MetricKind::Channels => "channels",
            MetricKind::Queues => "queues",
            MetricKind::Consumers => "consumers",
            MetricKind::Exchanges => "exchanges",
            MetricKind::Messages => "messages",
        }
    }

    /// Gauge name without the namespace (e.g. "connections_total")
    pub fn metric_name(self) -> String {
        format!("{}_total", self.key())
    }

    /// Fully qualified gauge name as it appears on the scrape endpoint
    pub fn fq_name(self) -> String {
        format!("{}_{}", NAMESPACE, self.metric_name())
    }

    pub fn help(self) -> &'static str {
        match self {
            MetricKind::Connections => "Total number of open connections.",
            MetricKind::Channels => "Total number of open channels.",
            MetricKind::Queues => "Total number of queues in use.",
            MetricKind::Consumers => "Total number of message consumers.",
            MetricKind::Exchanges => "Total number of exchanges in use.",
            MetricKind::Messages => "Total number of messages in all queues.",
        }
    }

    /// Reverse lookup from a fully qualified gauge name
    pub fn from_fq_name(name: &str) -> Option<MetricKind> {
        MetricKind::ALL.into_iter().find(|kind| kind.fq_name() == name)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A single value reported by a node
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub kind: MetricKind,

    /// Node identity that accompanied the payload this value came from
    pub node: String,

    pub value: f64,
}

/// Everything one poll cycle learned about a node
///
/// Built fresh each cycle and discarded after publishing. Kinds that could not
/// be extracted are simply missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationSet {
    node: Option<String>,
    observations: Vec<Observation>,
}

impl ObservationSet {
    /// Combines the per-resource results of one cycle
    ///
    /// The queues identity wins when both are present; a disagreement between
    /// the two is tolerated since each observation keeps its own label.
    pub fn from_parts(
        overview: Option<extract::OverviewObservations>,
        queues: Option<extract::QueueObservations>,
    ) -> Self {
        let mut set = ObservationSet::default();

        if let Some(overview) = overview {
            set.node = Some(overview.node.clone());
            for (kind, value) in overview.totals {
                set.observations.push(Observation {
                    kind,
                    node: overview.node.clone(),
                    value,
                });
            }
        }

        if let Some(queues) = queues {
            if let Some(previous) = set.node.as_deref() {
                if previous != queues.node {
                    debug!(
                        "Overview reported node '{}' but queues reported '{}'",
                        previous,
                        queues.node
                    );
                }
            }
            set.node = Some(queues.node.clone());
            set.observations.push(Observation {
                kind: MetricKind::Messages,
                node: queues.node,
                value: queues.messages,
            });
        }

        set
    }

    /// Self-reported identity of the node, if any payload carried one
    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    pub fn get(&self, kind: MetricKind) -> Option<f64> {
        self.observations
            .iter()
            .find(|observation| observation.kind == kind)
            .map(|observation| observation.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter()
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}
