//! Turns published events into spans and metrics.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use opentelemetry::global::{self, BoxedSpan, BoxedTracer};
use opentelemetry::metrics::Meter;
use opentelemetry::trace::{Span, SpanKind, Status, Tracer};
use opentelemetry::KeyValue;
use parking_lot::Mutex;

use crate::analyzer::{sanitize_statement, QueryShape};
use crate::channel::{EventChannel, Subscription};
use crate::config::{EndedSpanHook, SpanHook, TelemetryConfig};
use crate::error::guarded;
use crate::events::{ConnectionEvent, ConnectionEventKind, ConnectionId, QueryEvent, QueryOutcome};
use crate::metrics::QueryMetrics;

/// Instrumentation scope name used with the global providers.
pub const INSTRUMENTATION_NAME: &str = "query-telemetry";

struct Attachment {
    channel: Arc<EventChannel>,
    queries: Subscription,
    connections: Subscription,
}

impl Attachment {
    fn detach(self) {
        self.channel.unsubscribe(&self.queries);
        self.channel.unsubscribe(&self.connections);
    }
}

/// Consumer of query and connection events.
///
/// While enabled it turns every [`QueryEvent`] into a client span plus request,
/// error and duration metrics, and measures reserved connection lifetimes from
/// [`ConnectionEvent`]s. Faults inside the consumer are logged and contained.
///
/// # Example
///
/// ```rust,ignore
/// use query_telemetry::{EventChannel, QueryTelemetry, TelemetryConfig};
///
/// let channel = EventChannel::shared();
/// let telemetry = QueryTelemetry::new(TelemetryConfig::default().with_service_name("api"));
/// telemetry.enable(&channel);
/// ```
pub struct QueryTelemetry {
    recorder: Arc<Recorder>,
    attachment: Mutex<Option<Attachment>>,
}

impl QueryTelemetry {
    /// Create a consumer using the global tracer and meter providers.
    pub fn new(config: TelemetryConfig) -> Self {
        let tracer = global::tracer(INSTRUMENTATION_NAME);
        let meter = global::meter(INSTRUMENTATION_NAME);
        Self::with_providers(config, tracer, &meter)
    }

    /// Create a consumer with an explicit tracer and meter.
    pub fn with_providers(config: TelemetryConfig, tracer: BoxedTracer, meter: &Meter) -> Self {
        let metrics = QueryMetrics::new(meter, &config);
        Self {
            recorder: Arc::new(Recorder {
                config,
                tracer,
                metrics,
                connection_starts: DashMap::new(),
            }),
            attachment: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.recorder.config
    }

    /// Subscribe to `channel`.
    ///
    /// Enabling again first detaches the previous subscriptions, so handlers are
    /// never registered twice.
    pub fn enable(&self, channel: &Arc<EventChannel>) {
        let mut attachment = self.attachment.lock();
        if let Some(previous) = attachment.take() {
            previous.detach();
        }

        let recorder = Arc::clone(&self.recorder);
        let queries = channel.subscribe(move |event: &QueryEvent| recorder.on_query(event));
        let recorder = Arc::clone(&self.recorder);
        let connections =
            channel.subscribe(move |event: &ConnectionEvent| recorder.on_connection(event));

        *attachment = Some(Attachment {
            channel: Arc::clone(channel),
            queries,
            connections,
        });
        tracing::debug!("Query telemetry enabled");
    }

    /// Unsubscribe from the channel. Does nothing when already disabled.
    pub fn disable(&self) {
        if let Some(previous) = self.attachment.lock().take() {
            previous.detach();
            tracing::debug!("Query telemetry disabled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.attachment.lock().is_some()
    }

    /// Reserved connections seen connecting but not yet disconnecting.
    pub fn tracked_connections(&self) -> usize {
        self.recorder.connection_starts.len()
    }
}

impl Drop for QueryTelemetry {
    fn drop(&mut self) {
        self.disable();
    }
}

impl fmt::Debug for QueryTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryTelemetry")
            .field("config", &self.recorder.config)
            .field("enabled", &self.is_enabled())
            .field("tracked_connections", &self.tracked_connections())
            .finish()
    }
}

struct Recorder {
    config: TelemetryConfig,
    tracer: BoxedTracer,
    metrics: QueryMetrics,
    connection_starts: DashMap<ConnectionId, Instant>,
}

impl Recorder {
    fn on_query(&self, event: &QueryEvent) {
        let shape = QueryShape::analyze(&event.statement);

        let attributes =
            guarded("span attributes", || self.span_attributes(event, &shape)).unwrap_or_default();
        let mut span = self
            .tracer
            .span_builder(shape.operation.as_str())
            .with_kind(SpanKind::Client)
            .with_start_time(event.started_at)
            .with_attributes(attributes)
            .start(&self.tracer);

        run_span_hook("before_span hook", &self.config.hooks.before_span, &mut span, event);

        if self.config.collect_parameters && !event.parameters.is_empty() {
            let sanitizer = &self.config.parameter_sanitizer;
            guarded("parameter sanitizer", || {
                for (index, param) in event.parameters.iter().enumerate() {
                    span.set_attribute(KeyValue::new(
                        format!("db.query.parameter.{index}"),
                        sanitizer(param),
                    ));
                }
            });
        }

        guarded("metrics", || self.record_query_metrics(event, &shape));

        match &event.outcome {
            QueryOutcome::Failure(failure) => {
                span.set_status(Status::error(failure.message.clone()));
                span.record_error(failure);
                span.set_attribute(KeyValue::new("error.type", failure.error_type.clone()));
            }
            QueryOutcome::Success { rows } => {
                if self.config.record_row_counts {
                    if let Some(rows) = rows {
                        span.set_attribute(KeyValue::new("db.response.returned_rows", *rows as i64));
                    }
                }
                run_span_hook("response hook", &self.config.hooks.response, &mut span, event);
                span.set_status(Status::Ok);
            }
        }

        if event.duration > self.config.slow_query_threshold {
            span.set_attribute(KeyValue::new("slow_query", true));
            tracing::warn!(
                operation = %shape.operation,
                duration_ms = event.duration_ms(),
                threshold_ms = self.config.slow_query_threshold.as_millis() as u64,
                "Slow query detected"
            );
        }

        span.end_with_timestamp(event.finished_at());
        run_ended_span_hook("after_span hook", &self.config.hooks.after_span, &span, event);
    }

    fn on_connection(&self, event: &ConnectionEvent) {
        match event.kind {
            ConnectionEventKind::Connect => {
                guarded("metrics", || {
                    self.metrics.record_connection(&self.connection_attributes())
                });
                self.connection_starts
                    .insert(event.connection_id, event.timestamp);
            }
            ConnectionEventKind::Disconnect => {
                // A missing start means we were disabled when the connect fired.
                let Some((_, started)) = self.connection_starts.remove(&event.connection_id)
                else {
                    return;
                };
                let lifetime = event.timestamp.saturating_duration_since(started);
                guarded("metrics", || {
                    self.metrics
                        .record_connection_duration(lifetime, &self.connection_attributes())
                });
            }
        }
    }

    fn span_attributes(&self, event: &QueryEvent, shape: &QueryShape) -> Vec<KeyValue> {
        let config = &self.config;
        let mut attributes = vec![
            KeyValue::new("db.system", config.db_system),
            KeyValue::new("db.operation", shape.operation.as_str()),
            KeyValue::new("db.query.parameter_count", shape.parameter_count as i64),
            KeyValue::new("db.query.has_where", shape.has_where),
            KeyValue::new("db.query.has_join", shape.has_join),
            KeyValue::new("db.query.has_order_by", shape.has_order_by),
            KeyValue::new("db.query.has_limit", shape.has_limit),
            KeyValue::new("db.query.complexity", shape.complexity.as_str()),
            KeyValue::new("db.query.type", shape.query_type().as_str()),
            KeyValue::new("db.duration_ms", event.duration_ms()),
            KeyValue::new("db.duration_seconds", event.duration.as_secs_f64()),
        ];

        if let Some(service) = &config.service_name {
            attributes.push(KeyValue::new("service.name", service.clone()));
        }
        if let Some(address) = &config.server_address {
            attributes.push(KeyValue::new("server.address", address.clone()));
        }
        if let Some(port) = config.server_port {
            attributes.push(KeyValue::new("server.port", i64::from(port)));
        }
        if let Some(name) = event.database_name.as_ref().or(config.database_name.as_ref()) {
            attributes.push(KeyValue::new("db.name", name.clone()));
        }
        if config.record_statements {
            attributes.push(KeyValue::new(
                "db.statement",
                sanitize_statement(&event.statement),
            ));
        }
        if let Some(table) = &shape.table {
            attributes.push(KeyValue::new("db.sql.table", table.clone()));
        }
        if let Some(connection_id) = event.connection_id {
            attributes.push(KeyValue::new("db.connection.id", connection_id.to_string()));
        }

        attributes
    }

    fn metric_attributes(&self, shape: &QueryShape) -> Vec<KeyValue> {
        let mut attributes = vec![
            KeyValue::new("db.system", self.config.db_system),
            KeyValue::new("db.operation", shape.operation.as_str()),
            KeyValue::new("db.query.complexity", shape.complexity.as_str()),
            KeyValue::new("db.query.type", shape.query_type().as_str()),
        ];
        if let Some(table) = &shape.table {
            attributes.push(KeyValue::new("db.sql.table", table.clone()));
        }
        if let Some(service) = &self.config.service_name {
            attributes.push(KeyValue::new("service.name", service.clone()));
        }
        attributes
    }

    fn connection_attributes(&self) -> Vec<KeyValue> {
        let mut attributes = vec![KeyValue::new("db.system", self.config.db_system)];
        if let Some(service) = &self.config.service_name {
            attributes.push(KeyValue::new("service.name", service.clone()));
        }
        attributes
    }

    fn record_query_metrics(&self, event: &QueryEvent, shape: &QueryShape) {
        let attributes = self.metric_attributes(shape);
        self.metrics.record_query(event.duration, &attributes);
        if let Some(failure) = event.outcome.failure() {
            self.metrics.record_error(&failure.error_type, &attributes);
        }
    }
}

fn run_span_hook(
    stage: &'static str,
    hook: &Option<SpanHook>,
    span: &mut BoxedSpan,
    event: &QueryEvent,
) {
    if let Some(hook) = hook {
        guarded(stage, || hook(span, event));
    }
}

fn run_ended_span_hook(
    stage: &'static str,
    hook: &Option<EndedSpanHook>,
    span: &BoxedSpan,
    event: &QueryEvent,
) {
    if let Some(hook) = hook {
        guarded(stage, || hook(span, event));
    }
}
