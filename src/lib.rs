//! # query-telemetry
//!
//! OpenTelemetry spans and metrics for every query issued through a database client.
//!
//! Wrap a client once and keep issuing queries exactly as before. The wrapper times
//! each query-shaped statement and publishes an event on an in-process channel; a
//! telemetry consumer subscribed to that channel turns events into client spans and
//! metrics. Results and errors reach the caller untouched.
//!
//! ## Features
//!
//! - **Transparent Interception**: Any [`DatabaseClient`] can be wrapped; reserved
//!   connections are wrapped too, with their lifetime measured
//! - **Statement Shape Analysis**: Operation, table, clauses and complexity are inferred
//!   from the SQL text (lexical heuristics, not a parser)
//! - **OpenTelemetry Compatible**: Spans and instruments use semantic convention names
//! - **Fault Isolation**: Telemetry faults and hook panics are logged, never propagated
//! - **SeaORM Support**: `DatabaseConnection` works out of the box
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sea_orm::Database;
//! use query_telemetry::prelude::*;
//!
//! let channel = EventChannel::shared();
//! let telemetry = QueryTelemetry::new(TelemetryConfig::default().with_service_name("api"));
//! telemetry.enable(&channel);
//!
//! let db = Database::connect("postgres://localhost/mydb").await?.with_telemetry(&channel);
//! let rows = db.invoke("SELECT * FROM users WHERE id = ?", &[42.into()]).await?;
//! ```
//!
//! ## Span Attributes
//!
//! | Attribute | Description |
//! |-----------|-------------|
//! | `db.system` | Configured database system, default "postgresql" |
//! | `db.operation` | SQL operation (SELECT, INSERT, UPDATE, DELETE, CREATE, ALTER, DROP) |
//! | `db.sql.table` | Target table name (when detectable) |
//! | `db.name` | Database name from the connection or the configuration |
//! | `db.statement` | Statement with comments removed and string literals masked |
//! | `db.query.*` | Parameter count, clause flags, complexity, read/write/schema type |
//! | `db.query.parameter.<i>` | Sanitized parameters (when enabled) |
//! | `db.response.returned_rows` | Number of rows returned |
//! | `db.duration_ms` / `db.duration_seconds` | Query duration |
//! | `error.type` | Error type name (on failure) |

mod analyzer;
mod channel;
mod client;
mod config;
mod connection;
mod error;
mod events;
mod metrics;
mod seaorm;
mod telemetry;

#[cfg(test)]
mod testing;

pub use analyzer::{extract_table, is_query, sanitize_statement, Complexity, Operation, QueryShape, QueryType};
pub use channel::{ChannelEvent, EventChannel, Subscription, Topic, TopicKind};
pub use client::{DatabaseClient, Release, Reserve, RowCount};
pub use config::{
    sanitize_parameter, EndedSpanHook, ParameterSanitizer, SpanHook, TelemetryConfig, TelemetryHooks,
    DEFAULT_DURATION_BOUNDARIES, MAX_PARAMETER_LENGTH, REDACTED,
};
pub use connection::{InstrumentExt, InstrumentedConnection};
pub use error::TelemetryError;
pub use events::{
    ConnectionEvent, ConnectionEventKind, ConnectionId, Param, QueryEvent, QueryFailure, QueryOutcome,
    OTHER_ERROR_TYPE,
};
pub use metrics::QueryMetrics;
pub use telemetry::{QueryTelemetry, INSTRUMENTATION_NAME};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        DatabaseClient, EventChannel, InstrumentExt, InstrumentedConnection, Param, QueryTelemetry,
        Release, Reserve, TelemetryConfig,
    };
}
