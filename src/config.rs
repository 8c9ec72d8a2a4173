//! Configuration for query telemetry.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use opentelemetry::global::BoxedSpan;
use regex::Regex;

use crate::error::TelemetryError;
use crate::events::{Param, QueryEvent};

/// Turns a parameter value into the string attached to a span.
pub type ParameterSanitizer = Arc<dyn Fn(&Param) -> String + Send + Sync>;

/// Hook receiving the live span of a query.
pub type SpanHook = Arc<dyn Fn(&mut BoxedSpan, &QueryEvent) + Send + Sync>;

/// Hook receiving the span after it has ended.
pub type EndedSpanHook = Arc<dyn Fn(&BoxedSpan, &QueryEvent) + Send + Sync>;

/// Parameter values longer than this are truncated by [`sanitize_parameter`].
pub const MAX_PARAMETER_LENGTH: usize = 100;

/// Replacement for parameter values that look like credentials.
pub const REDACTED: &str = "[REDACTED]";

/// Default bucket boundaries (seconds) for the query duration histogram.
pub const DEFAULT_DURATION_BOUNDARIES: [f64; 9] = [0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0];

static SENSITIVE_VALUE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)password|passwd|secret|token|api[_-]?key").expect("valid sensitive value regex")
});

/// Default parameter sanitizer.
///
/// Values mentioning passwords, secrets or tokens are replaced by [`REDACTED`];
/// anything longer than [`MAX_PARAMETER_LENGTH`] characters is truncated.
pub fn sanitize_parameter(param: &Param) -> String {
    let rendered = param.to_string();
    if SENSITIVE_VALUE_REGEX.is_match(&rendered) {
        return REDACTED.to_string();
    }
    if rendered.chars().count() > MAX_PARAMETER_LENGTH {
        let truncated: String = rendered.chars().take(MAX_PARAMETER_LENGTH).collect();
        return format!("{truncated}...");
    }
    rendered
}

/// Optional callbacks invoked while a query span is built.
///
/// A panicking hook is logged and skipped; it never breaks the pipeline.
#[derive(Clone, Default)]
pub struct TelemetryHooks {
    /// Runs after the standard attributes are set, before the outcome is recorded.
    pub before_span: Option<SpanHook>,
    /// Runs for successful queries, before the span ends.
    pub response: Option<SpanHook>,
    /// Runs once the span has ended.
    pub after_span: Option<EndedSpanHook>,
}

impl fmt::Debug for TelemetryHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryHooks")
            .field("before_span", &self.before_span.is_some())
            .field("response", &self.response.is_some())
            .field("after_span", &self.after_span.is_some())
            .finish()
    }
}

/// Configuration options for query telemetry.
///
/// # Example
///
/// ```rust
/// use query_telemetry::TelemetryConfig;
/// use std::time::Duration;
///
/// let config = TelemetryConfig::default()
///     .with_service_name("billing-api")
///     .with_parameter_collection(true)
///     .with_slow_query_threshold(Duration::from_millis(100));
/// ```
#[derive(Clone)]
pub struct TelemetryConfig {
    /// Recorded as `service.name` on spans and metrics.
    pub service_name: Option<String>,

    pub server_address: Option<String>,
    pub server_port: Option<u16>,

    /// Database name used when an event carries none.
    pub database_name: Option<String>,

    /// Value of the `db.system` attribute.
    /// Default: `"postgresql"`
    pub db_system: &'static str,

    /// Whether to include the sanitized statement in spans.
    /// Default: `true` (string literals are replaced before recording)
    pub record_statements: bool,

    /// Whether to attach each sanitized parameter as a span attribute.
    /// Default: `false` (parameters may contain sensitive data)
    pub collect_parameters: bool,

    /// Whether to record the number of rows returned.
    /// Default: `true`
    pub record_row_counts: bool,

    /// Whether to record the query duration histogram.
    /// Default: `true`
    pub duration_histogram: bool,

    /// Bucket boundaries in seconds for the duration histograms.
    pub histogram_boundaries: Vec<f64>,

    /// Queries slower than this are flagged with `slow_query` and logged at WARN.
    /// Default: 500ms
    pub slow_query_threshold: Duration,

    pub parameter_sanitizer: ParameterSanitizer,

    pub hooks: TelemetryHooks,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: None,
            server_address: None,
            server_port: None,
            database_name: None,
            db_system: "postgresql",
            record_statements: true,
            collect_parameters: false,
            record_row_counts: true,
            duration_histogram: true,
            histogram_boundaries: DEFAULT_DURATION_BOUNDARIES.to_vec(),
            slow_query_threshold: Duration::from_millis(500),
            parameter_sanitizer: Arc::new(sanitize_parameter),
            hooks: TelemetryHooks::default(),
        }
    }
}

impl fmt::Debug for TelemetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryConfig")
            .field("service_name", &self.service_name)
            .field("server_address", &self.server_address)
            .field("server_port", &self.server_port)
            .field("database_name", &self.database_name)
            .field("db_system", &self.db_system)
            .field("record_statements", &self.record_statements)
            .field("collect_parameters", &self.collect_parameters)
            .field("record_row_counts", &self.record_row_counts)
            .field("duration_histogram", &self.duration_histogram)
            .field("histogram_boundaries", &self.histogram_boundaries)
            .field("slow_query_threshold", &self.slow_query_threshold)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl TelemetryConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Set the server address and port recorded on every span.
    pub fn with_server(mut self, address: impl Into<String>, port: u16) -> Self {
        self.server_address = Some(address.into());
        self.server_port = Some(port);
        self
    }

    /// Set a database name to include in spans.
    ///
    /// Events that carry their own database name take precedence.
    pub fn with_database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = Some(name.into());
        self
    }

    pub fn with_db_system(mut self, system: &'static str) -> Self {
        self.db_system = system;
        self
    }

    /// Enable or disable statement recording in spans.
    pub fn with_statement_recording(mut self, enabled: bool) -> Self {
        self.record_statements = enabled;
        self
    }

    /// Enable or disable parameter collection in spans.
    ///
    /// **Security Warning**: Query parameters often contain user input. The
    /// sanitizer redacts obvious credentials but cannot catch everything.
    pub fn with_parameter_collection(mut self, enabled: bool) -> Self {
        self.collect_parameters = enabled;
        self
    }

    /// Enable or disable row count recording.
    pub fn with_row_count_recording(mut self, enabled: bool) -> Self {
        self.record_row_counts = enabled;
        self
    }

    pub fn with_duration_histogram(mut self, enabled: bool) -> Self {
        self.duration_histogram = enabled;
        self
    }

    /// Use custom histogram bucket boundaries, in seconds.
    ///
    /// Boundaries must be finite, non-empty and strictly increasing.
    pub fn with_histogram_boundaries(mut self, boundaries: Vec<f64>) -> Result<Self, TelemetryError> {
        let valid = !boundaries.is_empty()
            && boundaries.iter().all(|b| b.is_finite())
            && boundaries.windows(2).all(|pair| pair[0] < pair[1]);
        if !valid {
            return Err(TelemetryError::InvalidHistogramBoundaries(boundaries));
        }
        self.histogram_boundaries = boundaries;
        Ok(self)
    }

    /// Set the threshold for slow query warnings.
    pub fn with_slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = threshold;
        self
    }

    pub fn with_parameter_sanitizer<F>(mut self, sanitizer: F) -> Self
    where
        F: Fn(&Param) -> String + Send + Sync + 'static,
    {
        self.parameter_sanitizer = Arc::new(sanitizer);
        self
    }

    pub fn with_before_span<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut BoxedSpan, &QueryEvent) + Send + Sync + 'static,
    {
        self.hooks.before_span = Some(Arc::new(hook));
        self
    }

    pub fn with_response_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut BoxedSpan, &QueryEvent) + Send + Sync + 'static,
    {
        self.hooks.response = Some(Arc::new(hook));
        self
    }

    pub fn with_after_span<F>(mut self, hook: F) -> Self
    where
        F: Fn(&BoxedSpan, &QueryEvent) + Send + Sync + 'static,
    {
        self.hooks.after_span = Some(Arc::new(hook));
        self
    }

    /// Create a development-friendly configuration with full recording enabled.
    ///
    /// **Warning**: Do not use in production as it records parameters.
    pub fn development() -> Self {
        Self {
            collect_parameters: true,
            slow_query_threshold: Duration::from_millis(100),
            ..Self::default()
        }
    }

    /// Create a production-safe configuration.
    pub fn production() -> Self {
        Self {
            collect_parameters: false,
            slow_query_threshold: Duration::from_secs(1),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = TelemetryConfig::default()
            .with_service_name("orders")
            .with_server("db.internal", 5432)
            .with_database_name("test_db");

        assert_eq!(config.service_name.as_deref(), Some("orders"));
        assert_eq!(config.server_address.as_deref(), Some("db.internal"));
        assert_eq!(config.server_port, Some(5432));
        assert_eq!(config.database_name, Some("test_db".to_string()));
        assert_eq!(config.db_system, "postgresql");
    }

    #[test]
    fn test_development_config() {
        let config = TelemetryConfig::development();
        assert!(config.record_statements);
        assert!(config.collect_parameters);
    }

    #[test]
    fn test_production_config() {
        let config = TelemetryConfig::production();
        assert!(!config.collect_parameters);
        assert_eq!(config.slow_query_threshold, Duration::from_secs(1));
    }

    #[test]
    fn test_histogram_boundaries_validation() {
        assert!(TelemetryConfig::new()
            .with_histogram_boundaries(vec![0.01, 0.1, 1.0])
            .is_ok());
        assert!(TelemetryConfig::new().with_histogram_boundaries(vec![]).is_err());
        assert!(TelemetryConfig::new()
            .with_histogram_boundaries(vec![0.1, 0.1])
            .is_err());
        assert!(matches!(
            TelemetryConfig::new().with_histogram_boundaries(vec![1.0, f64::NAN]),
            Err(TelemetryError::InvalidHistogramBoundaries(_))
        ));
    }

    #[test]
    fn test_sanitize_parameter_redacts_secrets() {
        assert_eq!(sanitize_parameter(&Param::from("my_password_is_hunter2")), REDACTED);
        assert_eq!(sanitize_parameter(&Param::from("Bearer TOKEN abc")), REDACTED);
        assert_eq!(sanitize_parameter(&Param::from("alice")), "alice");
        assert_eq!(sanitize_parameter(&Param::Int(42)), "42");
    }

    #[test]
    fn test_sanitize_parameter_truncates() {
        let long = "x".repeat(150);
        let sanitized = sanitize_parameter(&Param::from(long));
        assert_eq!(sanitized.len(), MAX_PARAMETER_LENGTH + 3);
        assert!(sanitized.ends_with("..."));

        let exact = "y".repeat(MAX_PARAMETER_LENGTH);
        assert_eq!(sanitize_parameter(&Param::from(exact.clone())), exact);
    }

    #[test]
    fn test_custom_sanitizer() {
        let config = TelemetryConfig::new().with_parameter_sanitizer(|_| "*".to_string());
        assert_eq!((config.parameter_sanitizer)(&Param::from("alice")), "*");
    }
}
