//! Events published by instrumented connections.

use std::any::type_name;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

/// A query parameter value.
///
/// Parameters are opaque to the instrumentation; they are only rendered through
/// the configured sanitizer when parameter collection is enabled.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Null => write!(f, "NULL"),
            Param::Bool(v) => write!(f, "{v}"),
            Param::Int(v) => write!(f, "{v}"),
            Param::Float(v) => write!(f, "{v}"),
            Param::Text(v) => write!(f, "{v}"),
            Param::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl From<bool> for Param {
    fn from(value: bool) -> Self {
        Param::Bool(value)
    }
}

impl From<i32> for Param {
    fn from(value: i32) -> Self {
        Param::Int(value.into())
    }
}

impl From<i64> for Param {
    fn from(value: i64) -> Self {
        Param::Int(value)
    }
}

impl From<f64> for Param {
    fn from(value: f64) -> Self {
        Param::Float(value)
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Param::Text(value.to_string())
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Param::Text(value)
    }
}

impl From<Vec<u8>> for Param {
    fn from(value: Vec<u8>) -> Self {
        Param::Bytes(value)
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(value: Option<T>) -> Self {
        value.map_or(Param::Null, Into::into)
    }
}

/// Category used when a failure's concrete type is erased.
pub const OTHER_ERROR_TYPE: &str = "_OTHER";

/// Summary of a failed query invocation.
///
/// The original error is returned to the caller untouched; the event keeps the
/// type name and message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFailure {
    pub error_type: String,
    pub message: String,
}

impl QueryFailure {
    pub fn from_error<E: std::error::Error + 'static>(error: &E) -> Self {
        Self {
            error_type: short_type_name(type_name::<E>()),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for QueryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}

impl std::error::Error for QueryFailure {}

/// `sea_orm::error::DbErr` becomes `DbErr`; trait objects become [`OTHER_ERROR_TYPE`].
fn short_type_name(full: &str) -> String {
    if full.contains("dyn ") {
        return OTHER_ERROR_TYPE.to_string();
    }
    let base = full.split('<').next().unwrap_or(full);
    match base.rsplit("::").next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => OTHER_ERROR_TYPE.to_string(),
    }
}

/// How a query invocation settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    /// The invocation returned a value; `rows` is set when the value was a row sequence.
    Success { rows: Option<u64> },
    Failure(QueryFailure),
}

impl QueryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, QueryOutcome::Success { .. })
    }

    pub fn failure(&self) -> Option<&QueryFailure> {
        match self {
            QueryOutcome::Failure(failure) => Some(failure),
            QueryOutcome::Success { .. } => None,
        }
    }
}

/// One measured query invocation.
#[derive(Debug, Clone)]
pub struct QueryEvent {
    pub statement: String,
    pub parameters: Vec<Param>,
    pub outcome: QueryOutcome,
    pub started_at: SystemTime,
    pub duration: Duration,
    pub database_name: Option<String>,
    /// Set when the query ran on a reserved connection.
    pub connection_id: Option<ConnectionId>,
}

impl QueryEvent {
    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }

    pub fn finished_at(&self) -> SystemTime {
        self.started_at + self.duration
    }
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of one reservation, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEventKind {
    Connect,
    Disconnect,
}

/// Reservation lifecycle event.
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    pub kind: ConnectionEventKind,
    pub timestamp: Instant,
    pub connection_id: ConnectionId,
}

impl ConnectionEvent {
    pub fn connect(connection_id: ConnectionId) -> Self {
        Self {
            kind: ConnectionEventKind::Connect,
            timestamp: Instant::now(),
            connection_id,
        }
    }

    pub fn disconnect(connection_id: ConnectionId) -> Self {
        Self {
            kind: ConnectionEventKind::Disconnect,
            timestamp: Instant::now(),
            connection_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct PoolTimeout;

    impl fmt::Display for PoolTimeout {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "pool timed out")
        }
    }

    impl std::error::Error for PoolTimeout {}

    #[test]
    fn test_failure_uses_short_type_name() {
        let failure = QueryFailure::from_error(&PoolTimeout);
        assert_eq!(failure.error_type, "PoolTimeout");
        assert_eq!(failure.message, "pool timed out");
    }

    #[test]
    fn test_erased_error_is_other() {
        let erased: std::sync::Arc<dyn std::error::Error + Send + Sync> =
            std::sync::Arc::new(PoolTimeout);
        let failure = QueryFailure::from_error(&erased);
        assert_eq!(failure.error_type, OTHER_ERROR_TYPE);
        assert_eq!(failure.message, "pool timed out");
    }

    #[test]
    fn test_generic_type_name_is_trimmed() {
        assert_eq!(short_type_name("my_crate::errors::Wrapped<u8>"), "Wrapped");
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("conn-"));
    }

    #[test]
    fn test_param_display_and_conversions() {
        assert_eq!(Param::from(Some(3i64)).to_string(), "3");
        assert_eq!(Param::from(None::<&str>), Param::Null);
        assert_eq!(Param::from(vec![1u8, 2]).to_string(), "<2 bytes>");
    }
}
