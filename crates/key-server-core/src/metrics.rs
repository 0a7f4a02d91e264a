//! Prometheus collectors owned by a single application instance.
//!
//! Every [`PrometheusMetrics`] holds its own [`Registry`], so two instances in
//! the same process (or two tests running in parallel) never observe each
//! other's samples. The collectors are atomics under the hood and can be
//! updated concurrently without any external locking.
//!
//! ## Collectors
//!
//! | Exposed name                                  | Kind      | Labels           |
//! |-----------------------------------------------|-----------|------------------|
//! | `http_requests_total`                         | counter   | `code`           |
//! | `key_generation_duration_seconds`             | histogram | `length`         |
//! | `key_generations_total`                       | counter   | `length, status` |
//! | `key_server_generated_key_length_bytes`       | histogram | -                |
//! | `key_server_key_generation_requests_total`    | counter   | -                |
//! | `key_server_invalid_key_length_errors_total`  | counter   | -                |
//! | `key_server_key_generation_errors_total`      | counter   | -                |
//!
//! Counters are registered without the `_total` suffix; the OpenMetrics text
//! encoder appends it.

use crate::{Error, Result};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::{Family, MetricConstructor};
use prometheus_client::metrics::histogram::{Histogram, linear_buckets};
use prometheus_client::registry::{Metric, Registry};
use std::collections::HashSet;

const DURATION_BUCKETS: u16 = 20;
const KEY_LENGTH_BUCKETS: u16 = 10;

/// Metric sink used by the key service and the HTTP handlers.
///
/// The production implementation is [`PrometheusMetrics`]; tests plug in
/// counting sinks.
pub trait Metrics: Send + Sync {
    /// Counts one completed HTTP request under its status code.
    fn inc_http_status(&self, code: u16);

    /// Records how long a single random draw took.
    fn observe_generation_duration(&self, seconds: f64, length: i64);

    /// Counts a finished key generation attempt by length and outcome.
    fn record_key_generation(&self, length: i64, success: bool);

    /// Records the raw byte length of a key that was produced.
    fn observe_generated_key_length(&self, length: i64);

    /// Counts one invocation of the key service.
    fn record_generation_request(&self);

    /// Counts a length rejected by the policy check.
    fn record_invalid_length(&self);

    /// Counts a CSPRNG failure.
    fn record_generation_error(&self);
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StatusLabels {
    /// HTTP status code, e.g. `"200"`.
    pub code: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct LengthLabels {
    /// Requested key length in raw bytes.
    pub length: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct GenerationLabels {
    /// Requested key length in raw bytes.
    pub length: String,
    /// `"success"` or `"failure"`.
    pub status: String,
}

/// Builds histograms with linear buckets `0, width, 2*width, ...`.
#[derive(Clone, Copy, Debug)]
pub struct LinearBuckets {
    width: f64,
    count: u16,
}

impl LinearBuckets {
    /// Buckets spanning `max_size` in `count` equal steps.
    pub fn spanning(max_size: usize, count: u16) -> Self {
        Self {
            width: max_size as f64 / f64::from(count),
            count,
        }
    }

    pub fn bounds(&self) -> impl Iterator<Item = f64> {
        linear_buckets(0.0, self.width, self.count)
    }
}

impl MetricConstructor<Histogram> for LinearBuckets {
    fn new_metric(&self) -> Histogram {
        Histogram::new(self.bounds())
    }
}

/// Registers collectors while refusing duplicate names.
struct Registrar<'a> {
    registry: &'a mut Registry,
    names: HashSet<&'static str>,
}

impl<'a> Registrar<'a> {
    fn new(registry: &'a mut Registry) -> Self {
        Self {
            registry,
            names: HashSet::new(),
        }
    }

    fn register(&mut self, name: &'static str, help: &str, metric: impl Metric) -> Result<()> {
        if !self.names.insert(name) {
            return Err(Error::DuplicateCollector { name });
        }
        self.registry.register(name, help, metric);
        Ok(())
    }
}

/// Prometheus-backed [`Metrics`] with its own isolated registry.
#[derive(Debug)]
pub struct PrometheusMetrics {
    registry: Registry,
    http_requests: Family<StatusLabels, Counter>,
    generation_duration: Family<LengthLabels, Histogram, LinearBuckets>,
    generations: Family<GenerationLabels, Counter>,
    generated_key_length: Histogram,
    generation_requests: Counter,
    invalid_length_errors: Counter,
    generation_errors: Counter,
}

impl PrometheusMetrics {
    /// Creates a fresh registry and registers every collector in it.
    ///
    /// Bucket widths are derived from `max_size`: the duration histogram uses
    /// 20 linear buckets of `max_size / 20`, the key length histogram 10
    /// linear buckets of `max_size / 10`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateCollector`] if a collector name is
    /// registered twice.
    pub fn new(max_size: usize) -> Result<Self> {
        let mut registry = Registry::default();

        let http_requests = Family::<StatusLabels, Counter>::default();
        let generation_duration = Family::new_with_constructor(LinearBuckets::spanning(
            max_size,
            DURATION_BUCKETS,
        ));
        let generations = Family::<GenerationLabels, Counter>::default();
        let generated_key_length =
            LinearBuckets::spanning(max_size, KEY_LENGTH_BUCKETS).new_metric();
        let generation_requests = Counter::default();
        let invalid_length_errors = Counter::default();
        let generation_errors = Counter::default();

        {
            let mut registrar = Registrar::new(&mut registry);
            registrar.register(
                "http_requests",
                "Total number of HTTP requests by status code.",
                http_requests.clone(),
            )?;
            registrar.register(
                "key_generation_duration_seconds",
                "Time taken to generate a key.",
                generation_duration.clone(),
            )?;
            registrar.register(
                "key_generations",
                "Total number of key generation attempts by length and success status.",
                generations.clone(),
            )?;
            registrar.register(
                "key_server_generated_key_length_bytes",
                "Raw byte length of successfully generated keys.",
                generated_key_length.clone(),
            )?;
            registrar.register(
                "key_server_key_generation_requests",
                "Total number of key generation requests handled by the key service.",
                generation_requests.clone(),
            )?;
            registrar.register(
                "key_server_invalid_key_length_errors",
                "Total number of requests rejected for an out-of-range key length.",
                invalid_length_errors.clone(),
            )?;
            registrar.register(
                "key_server_key_generation_errors",
                "Total number of key generations that failed in the random source.",
                generation_errors.clone(),
            )?;
        }

        Ok(Self {
            registry,
            http_requests,
            generation_duration,
            generations,
            generated_key_length,
            generation_requests,
            invalid_length_errors,
            generation_errors,
        })
    }

    /// Renders the registry in the OpenMetrics text format.
    pub fn encode(&self) -> Result<String> {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.registry).map_err(|e| {
            Error::Exposition {
                reason: e.to_string(),
            }
        })?;
        Ok(buffer)
    }

    /// Content type of the exposition produced by [`Self::encode`].
    pub const CONTENT_TYPE: &'static str =
        "application/openmetrics-text; version=1.0.0; charset=utf-8";

    /// Current value of `http_requests_total{code}`, or 0 if that series was
    /// never touched. Reading does not create the series.
    pub fn http_requests(&self, code: u16) -> u64 {
        self.http_requests
            .get(&StatusLabels {
                code: code.to_string(),
            })
            .map_or(0, |counter| counter.get())
    }

    /// Current value of `key_generations_total{length,status}`, or 0 if that
    /// series was never touched.
    pub fn key_generations(&self, length: i64, success: bool) -> u64 {
        self.generations
            .get(&generation_labels(length, success))
            .map_or(0, |counter| counter.get())
    }

    /// Current value of `key_server_key_generation_requests_total`.
    pub fn generation_requests(&self) -> u64 {
        self.generation_requests.get()
    }

    /// Current value of `key_server_invalid_key_length_errors_total`.
    pub fn invalid_length_errors(&self) -> u64 {
        self.invalid_length_errors.get()
    }

    /// Current value of `key_server_key_generation_errors_total`.
    pub fn generation_errors(&self) -> u64 {
        self.generation_errors.get()
    }
}

fn generation_labels(length: i64, success: bool) -> GenerationLabels {
    GenerationLabels {
        length: length.to_string(),
        status: if success { "success" } else { "failure" }.to_string(),
    }
}

impl Metrics for PrometheusMetrics {
    fn inc_http_status(&self, code: u16) {
        self.http_requests
            .get_or_create(&StatusLabels {
                code: code.to_string(),
            })
            .inc();
    }

    fn observe_generation_duration(&self, seconds: f64, length: i64) {
        self.generation_duration
            .get_or_create(&LengthLabels {
                length: length.to_string(),
            })
            .observe(seconds);
    }

    fn record_key_generation(&self, length: i64, success: bool) {
        self.generations
            .get_or_create(&generation_labels(length, success))
            .inc();
    }

    fn observe_generated_key_length(&self, length: i64) {
        self.generated_key_length.observe(length as f64);
    }

    fn record_generation_request(&self) {
        self.generation_requests.inc();
    }

    fn record_invalid_length(&self) {
        self.invalid_length_errors.inc();
    }

    fn record_generation_error(&self) {
        self.generation_errors.inc();
    }
}

impl<T: Metrics + ?Sized> Metrics for std::sync::Arc<T> {
    fn inc_http_status(&self, code: u16) {
        (**self).inc_http_status(code);
    }

    fn observe_generation_duration(&self, seconds: f64, length: i64) {
        (**self).observe_generation_duration(seconds, length);
    }

    fn record_key_generation(&self, length: i64, success: bool) {
        (**self).record_key_generation(length, success);
    }

    fn observe_generated_key_length(&self, length: i64) {
        (**self).observe_generated_key_length(length);
    }

    fn record_generation_request(&self) {
        (**self).record_generation_request();
    }

    fn record_invalid_length(&self) {
        (**self).record_invalid_length();
    }

    fn record_generation_error(&self) {
        (**self).record_generation_error();
    }
}
