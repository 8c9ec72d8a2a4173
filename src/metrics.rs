//! Metric instruments fed by the telemetry consumer.

use std::time::Duration;

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

use crate::config::TelemetryConfig;

pub const QUERY_DURATION: &str = "db.client.operation.duration";
pub const QUERY_REQUESTS: &str = "db.client.requests";
pub const QUERY_ERRORS: &str = "db.client.errors";
pub const CONNECTIONS: &str = "db.client.connections";
pub const CONNECTION_DURATION: &str = "db.client.connection.duration";

/// Query and connection instruments.
#[derive(Clone)]
pub struct QueryMetrics {
    requests: Counter<u64>,
    errors: Counter<u64>,
    duration: Option<Histogram<f64>>,
    connections: Counter<u64>,
    connection_duration: Histogram<f64>,
}

impl QueryMetrics {
    /// Create the instruments on `meter`.
    ///
    /// The duration histogram is skipped when disabled in `config`.
    pub fn new(meter: &Meter, config: &TelemetryConfig) -> Self {
        let requests = meter
            .u64_counter(QUERY_REQUESTS)
            .with_description("Queries executed")
            .with_unit("{query}")
            .build();

        let errors = meter
            .u64_counter(QUERY_ERRORS)
            .with_description("Failed queries by error type")
            .with_unit("{error}")
            .build();

        let duration = config.duration_histogram.then(|| {
            meter
                .f64_histogram(QUERY_DURATION)
                .with_description("Query execution latency")
                .with_unit("s")
                .with_boundaries(config.histogram_boundaries.clone())
                .build()
        });

        let connections = meter
            .u64_counter(CONNECTIONS)
            .with_description("Reserved connections")
            .with_unit("{connection}")
            .build();

        let connection_duration = meter
            .f64_histogram(CONNECTION_DURATION)
            .with_description("Reserved connection lifetime")
            .with_unit("s")
            .with_boundaries(config.histogram_boundaries.clone())
            .build();

        Self {
            requests,
            errors,
            duration,
            connections,
            connection_duration,
        }
    }

    /// Record one query execution.
    pub fn record_query(&self, duration: Duration, attributes: &[KeyValue]) {
        if let Some(histogram) = &self.duration {
            histogram.record(duration.as_secs_f64(), attributes);
        }
        self.requests.add(1, attributes);
    }

    /// Record a failed query, tagged with its error type.
    pub fn record_error(&self, error_type: &str, attributes: &[KeyValue]) {
        let mut tagged = attributes.to_vec();
        tagged.push(KeyValue::new("error.type", error_type.to_string()));
        self.errors.add(1, &tagged);
    }

    pub fn record_connection(&self, attributes: &[KeyValue]) {
        self.connections.add(1, attributes);
    }

    pub fn record_connection_duration(&self, duration: Duration, attributes: &[KeyValue]) {
        self.connection_duration
            .record(duration.as_secs_f64(), attributes);
    }
}
