//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Own a process-wide set of named instruments (counter, histogram, gauge)
//! - Keep label cardinality bounded before a series is created
//! - Render a Prometheus text snapshot for the scrape endpoint
//!
//! # Metrics
//! - `http_server_requests_total` (counter): inbound requests by operation, outcome
//! - `http_server_request_duration_seconds` (histogram): inbound latency
//! - `http_server_requests_in_flight` (gauge): requests currently executing
//! - `http_server_errors_total` (counter): failures by kind
//! - `http_client_requests_total` / `http_client_request_duration_seconds`:
//!   outbound peer calls by peer, operation, outcome
//!
//! # Design Decisions
//! - One recorder per registry, never installed globally, so tests stay isolated
//! - Series handles are atomics; the hot path never takes a registry-wide lock
//! - Histogram buckets tuned for typical web latencies

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use metrics::{Key, KeyName, Label, Level, Metadata, Recorder, SharedString};
use metrics_exporter_prometheus::{
    BuildError, Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const HTTP_SERVER_REQUESTS: &str = "http_server_requests_total";
pub const HTTP_SERVER_DURATION: &str = "http_server_request_duration_seconds";
pub const HTTP_SERVER_IN_FLIGHT: &str = "http_server_requests_in_flight";
pub const HTTP_SERVER_ERRORS: &str = "http_server_errors_total";
pub const HTTP_CLIENT_REQUESTS: &str = "http_client_requests_total";
pub const HTTP_CLIENT_DURATION: &str = "http_client_request_duration_seconds";

/// Replacement value once a label has seen too many distinct values.
pub const OVERFLOW_LABEL_VALUE: &str = "__overflow__";

const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Label set for a single observation: `(name, value)` pairs.
pub type Labels<'a> = &'a [(&'a str, &'a str)];

/// Errors raised while building a registry.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("invalid histogram configuration: {0}")]
    Build(#[from] BuildError),
}

/// Bounds applied to label values before a series is created.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LabelPolicy {
    /// Values longer than this are truncated.
    pub max_value_len: usize,
    /// Distinct values tracked per (metric, label) before collapsing to overflow.
    pub max_values_per_label: usize,
}

impl Default for LabelPolicy {
    fn default() -> Self {
        Self {
            max_value_len: 64,
            max_values_per_label: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InstrumentKind {
    Counter,
    Histogram,
    Gauge,
}

struct Inner {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
    instruments: DashMap<String, InstrumentKind>,
    seen_values: DashMap<(String, String), HashSet<String>>,
    policy: LabelPolicy,
}

/// Handle to a set of instruments. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MetricsRegistry {
    inner: Arc<Inner>,
}

impl fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("instruments", &self.inner.instruments.len())
            .field("policy", &self.inner.policy)
            .finish()
    }
}

impl MetricsRegistry {
    /// Create a registry with its own Prometheus recorder.
    pub fn new(policy: LabelPolicy) -> Result<Self, MetricsError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(Matcher::Suffix("_seconds".to_string()), LATENCY_BUCKETS)?
            .build_recorder();
        let handle = recorder.handle();

        Ok(Self {
            inner: Arc::new(Inner {
                recorder,
                handle,
                instruments: DashMap::new(),
                seen_values: DashMap::new(),
                policy,
            }),
        })
    }

    /// Look up or create a counter.
    pub fn counter(&self, name: &str) -> Counter {
        self.declare(name, InstrumentKind::Counter);
        Counter {
            registry: self.clone(),
            name: Arc::from(name),
        }
    }

    /// Look up or create a histogram.
    pub fn histogram(&self, name: &str) -> Histogram {
        self.declare(name, InstrumentKind::Histogram);
        Histogram {
            registry: self.clone(),
            name: Arc::from(name),
        }
    }

    /// Look up or create an up/down counter.
    pub fn gauge(&self, name: &str) -> Gauge {
        self.declare(name, InstrumentKind::Gauge);
        Gauge {
            registry: self.clone(),
            name: Arc::from(name),
        }
    }

    /// Render every instrument in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.inner.handle.render()
    }

    /// Parsed view of [`render`](Self::render).
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot::parse(&self.render())
    }

    fn declare(&self, name: &str, kind: InstrumentKind) {
        let existing = *self
            .inner
            .instruments
            .entry(name.to_string())
            .or_insert(kind);
        if existing != kind {
            tracing::warn!(
                metric = name,
                registered = ?existing,
                requested = ?kind,
                "Instrument requested with a different kind than registered"
            );
        }
    }

    fn describe(&self, name: &str, kind: InstrumentKind, help: &str) {
        let key = KeyName::from(name.to_string());
        let description = SharedString::from(help.to_string());
        match kind {
            InstrumentKind::Counter => self.inner.recorder.describe_counter(key, None, description),
            InstrumentKind::Histogram => {
                self.inner.recorder.describe_histogram(key, None, description)
            }
            InstrumentKind::Gauge => self.inner.recorder.describe_gauge(key, None, description),
        }
    }

    fn key(&self, name: &str, labels: Labels<'_>) -> Key {
        let mut bounded: Vec<(&str, String)> = labels
            .iter()
            .map(|(label, value)| (*label, self.bound_value(name, label, value)))
            .collect();
        bounded.sort_by(|a, b| a.0.cmp(b.0));

        let labels: Vec<Label> = bounded
            .into_iter()
            .map(|(label, value)| Label::new(label.to_string(), value))
            .collect();
        Key::from_parts(name.to_string(), labels)
    }

    /// Apply the label policy to a single value.
    fn bound_value(&self, metric: &str, label: &str, value: &str) -> String {
        let policy = &self.inner.policy;
        if value.is_empty() {
            return "unknown".to_string();
        }

        let value = truncate(value, policy.max_value_len);
        let mut seen = self
            .inner
            .seen_values
            .entry((metric.to_string(), label.to_string()))
            .or_default();

        if seen.contains(value) {
            return value.to_string();
        }
        if seen.len() >= policy.max_values_per_label {
            tracing::debug!(metric, label, "Label value budget exhausted, collapsing to overflow");
            return OVERFLOW_LABEL_VALUE.to_string();
        }
        seen.insert(value.to_string());
        value.to_string()
    }
}

fn truncate(value: &str, max_len: usize) -> &str {
    if value.len() <= max_len {
        return value;
    }
    let mut end = max_len;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

fn metadata() -> Metadata<'static> {
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()))
}

/// Monotonic counter instrument.
#[derive(Debug, Clone)]
pub struct Counter {
    registry: MetricsRegistry,
    name: Arc<str>,
}

impl Counter {
    pub fn describe(self, help: &str) -> Self {
        self.registry.describe(&self.name, InstrumentKind::Counter, help);
        self
    }

    pub fn add(&self, delta: u64, labels: Labels<'_>) {
        let key = self.registry.key(&self.name, labels);
        self.registry
            .inner
            .recorder
            .register_counter(&key, &metadata())
            .increment(delta);
    }
}

/// Distribution instrument.
#[derive(Debug, Clone)]
pub struct Histogram {
    registry: MetricsRegistry,
    name: Arc<str>,
}

impl Histogram {
    pub fn describe(self, help: &str) -> Self {
        self.registry.describe(&self.name, InstrumentKind::Histogram, help);
        self
    }

    pub fn observe(&self, value: f64, labels: Labels<'_>) {
        let key = self.registry.key(&self.name, labels);
        self.registry
            .inner
            .recorder
            .register_histogram(&key, &metadata())
            .record(value);
    }
}

/// Up/down counter instrument.
#[derive(Debug, Clone)]
pub struct Gauge {
    registry: MetricsRegistry,
    name: Arc<str>,
}

impl Gauge {
    pub fn describe(self, help: &str) -> Self {
        self.registry.describe(&self.name, InstrumentKind::Gauge, help);
        self
    }

    pub fn add(&self, delta: i64, labels: Labels<'_>) {
        let key = self.registry.key(&self.name, labels);
        let gauge = self
            .registry
            .inner
            .recorder
            .register_gauge(&key, &metadata());
        if delta >= 0 {
            gauge.increment(delta as f64);
        } else {
            gauge.decrement(delta.unsigned_abs() as f64);
        }
    }
}

/// One exported series.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

/// Point-in-time view of all exported series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    samples: Vec<Sample>,
}

impl MetricsSnapshot {
    /// Parse Prometheus text exposition output. Comment lines are skipped.
    pub fn parse(text: &str) -> Self {
        let samples = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(parse_sample)
            .collect();
        Self { samples }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Sum of every series named `name` whose labels include `labels`.
    pub fn value(&self, name: &str, labels: Labels<'_>) -> f64 {
        self.samples
            .iter()
            .filter(|s| s.name == name)
            .filter(|s| {
                labels
                    .iter()
                    .all(|(k, v)| s.labels.get(*k).map(String::as_str) == Some(*v))
            })
            .fold(0.0, |total, s| total + s.value)
    }
}

fn parse_sample(line: &str) -> Option<Sample> {
    let (series, value) = line.rsplit_once(' ')?;
    let value = match value {
        "+Inf" => f64::INFINITY,
        "-Inf" => f64::NEG_INFINITY,
        other => other.parse().ok()?,
    };

    let (name, labels) = match series.split_once('{') {
        Some((name, rest)) => (name, parse_labels(rest.strip_suffix('}')?)?),
        None => (series, BTreeMap::new()),
    };

    Some(Sample {
        name: name.to_string(),
        labels,
        value,
    })
}

fn parse_labels(body: &str) -> Option<BTreeMap<String, String>> {
    let mut labels = BTreeMap::new();
    let mut rest = body;
    while !rest.is_empty() {
        let (key, after_key) = rest.split_once("=\"")?;
        let mut value = String::new();
        let mut chars = after_key.char_indices();
        let mut end = None;
        while let Some((idx, c)) = chars.next() {
            match c {
                '\\' => {
                    if let Some((_, escaped)) = chars.next() {
                        value.push(if escaped == 'n' { '\n' } else { escaped });
                    }
                }
                '"' => {
                    end = Some(idx);
                    break;
                }
                other => value.push(other),
            }
        }
        let end = end?;
        labels.insert(key.trim_start_matches(',').to_string(), value);
        rest = after_key[end + 1..].trim_start_matches(',');
    }
    Some(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> MetricsRegistry {
        MetricsRegistry::new(LabelPolicy::default()).unwrap()
    }

    #[test]
    fn test_counter_increments_by_label_set() {
        let metrics = registry();
        let counter = metrics.counter("user_requests_total");
        counter.add(1, &[("endpoint", "get_user"), ("method", "GET")]);
        counter.add(2, &[("method", "GET"), ("endpoint", "get_user")]);
        counter.add(1, &[("endpoint", "get_users"), ("method", "GET")]);

        let snapshot = metrics.snapshot();
        assert_eq!(
            snapshot.value("user_requests_total", &[("endpoint", "get_user")]),
            3.0
        );
        assert_eq!(snapshot.value("user_requests_total", &[]), 4.0);
    }

    #[test]
    fn test_gauge_returns_to_zero() {
        let metrics = registry();
        let gauge = metrics.gauge(HTTP_SERVER_IN_FLIGHT);
        gauge.add(1, &[("operation", "get_user")]);
        gauge.add(1, &[("operation", "get_user")]);
        assert_eq!(metrics.snapshot().value(HTTP_SERVER_IN_FLIGHT, &[]), 2.0);

        gauge.add(-2, &[("operation", "get_user")]);
        assert_eq!(metrics.snapshot().value(HTTP_SERVER_IN_FLIGHT, &[]), 0.0);
    }

    #[test]
    fn test_histogram_exports_count_and_sum() {
        let metrics = registry();
        let histogram = metrics.histogram(HTTP_SERVER_DURATION);
        histogram.observe(0.02, &[("operation", "get_user")]);
        histogram.observe(0.2, &[("operation", "get_user")]);

        let snapshot = metrics.snapshot();
        let count_name = format!("{HTTP_SERVER_DURATION}_count");
        assert_eq!(snapshot.value(&count_name, &[("operation", "get_user")]), 2.0);
    }

    #[test]
    fn test_export_is_idempotent_without_writes() {
        let metrics = registry();
        metrics.counter("orders_created_total").add(5, &[("status", "created")]);

        let first = metrics.snapshot();
        let second = metrics.snapshot();
        assert_eq!(
            first.value("orders_created_total", &[]),
            second.value("orders_created_total", &[])
        );
        assert_eq!(first.value("orders_created_total", &[]), 5.0);
    }

    #[test]
    fn test_label_values_are_bounded() {
        let metrics = MetricsRegistry::new(LabelPolicy {
            max_value_len: 8,
            max_values_per_label: 2,
        })
        .unwrap();
        let counter = metrics.counter("bounded_total");
        counter.add(1, &[("path", "a")]);
        counter.add(1, &[("path", "b")]);
        counter.add(1, &[("path", "c")]);
        counter.add(1, &[("path", "d")]);
        counter.add(1, &[("path", "a")]);
        counter.add(1, &[("other", "a-very-long-value")]);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.value("bounded_total", &[("path", "a")]), 2.0);
        assert_eq!(
            snapshot.value("bounded_total", &[("path", OVERFLOW_LABEL_VALUE)]),
            2.0
        );
        assert_eq!(snapshot.value("bounded_total", &[("other", "a-very-l")]), 1.0);
    }

    #[test]
    fn test_registries_are_isolated() {
        let a = registry();
        let b = registry();
        a.counter("isolated_total").add(1, &[]);
        assert_eq!(b.snapshot().value("isolated_total", &[]), 0.0);
    }

    #[test]
    fn test_missing_series_reads_as_positive_zero() {
        let value = registry().snapshot().value("never_written_total", &[]);
        assert_eq!(value, 0.0);
        assert!(value.is_sign_positive());
        assert_eq!(value.to_string(), "0");
    }

    #[test]
    fn test_parse_handles_escaped_labels() {
        let snapshot = MetricsSnapshot::parse(
            "# TYPE x counter\nx{a=\"q\\\"uote\",b=\"2\"} 7\ny 1.5\n",
        );
        assert_eq!(snapshot.value("x", &[("a", "q\"uote"), ("b", "2")]), 7.0);
        assert_eq!(snapshot.value("y", &[]), 1.5);
    }
}
