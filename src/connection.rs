//! Instrumented database client wrapper.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::analyzer::is_query;
use crate::channel::EventChannel;
use crate::client::{DatabaseClient, Release, Reserve, RowCount};
use crate::events::{ConnectionEvent, ConnectionId, Param, QueryEvent, QueryFailure, QueryOutcome};

/// State shared by a root connection and every handle reserved from it.
struct Interceptor {
    channel: Arc<EventChannel>,
    /// Reserved handle key -> connection id, removed on release.
    reservations: DashMap<u64, ConnectionId>,
    next_handle: AtomicU64,
}

/// Ties a reserved handle to its connection id.
struct Reservation {
    handle: u64,
    connection_id: ConnectionId,
    interceptor: Arc<Interceptor>,
}

impl Reservation {
    fn open(interceptor: &Arc<Interceptor>) -> Self {
        let handle = interceptor.next_handle.fetch_add(1, Ordering::Relaxed);
        let connection_id = ConnectionId::next();
        interceptor.reservations.insert(handle, connection_id);
        interceptor
            .channel
            .publish(ConnectionEvent::connect(connection_id));

        Self {
            handle,
            connection_id,
            interceptor: Arc::clone(interceptor),
        }
    }

    /// Publish the disconnect event, once. Returns false if already closed.
    fn close(&self) -> bool {
        match self.interceptor.reservations.remove(&self.handle) {
            Some((_, connection_id)) => {
                self.interceptor
                    .channel
                    .publish(ConnectionEvent::disconnect(connection_id));
                true
            }
            None => false,
        }
    }
}

impl Drop for Reservation {
    // A dropped handle goes back to its pool, so it counts as disconnected.
    fn drop(&mut self) {
        if self.close() {
            tracing::debug!(
                connection_id = %self.connection_id,
                "Reserved connection dropped without release"
            );
        }
    }
}

/// An instrumented wrapper around any [`DatabaseClient`].
///
/// Statements whose first keyword is a recognized operation are timed and
/// published as [`QueryEvent`]s; everything else is passed straight through.
/// The wrapped client's results and errors are returned unchanged.
///
/// When the inner client supports [`Reserve`], reserved connections come back
/// wrapped as well: reserving publishes a connect event, releasing publishes the
/// matching disconnect event.
///
/// # Example
///
/// ```rust,ignore
/// use query_telemetry::{EventChannel, InstrumentExt};
///
/// let channel = EventChannel::shared();
/// let db = client.with_telemetry(&channel);
///
/// let rows = db.invoke("SELECT * FROM users WHERE id = ?", &[42.into()]).await?;
/// ```
pub struct InstrumentedConnection<C> {
    inner: C,
    database_name: Option<Arc<str>>,
    interceptor: Arc<Interceptor>,
    reservation: Option<Reservation>,
}

impl<C> InstrumentedConnection<C> {
    /// Wrap `inner`, publishing its events to `channel`.
    pub fn new(inner: C, channel: Arc<EventChannel>) -> Self {
        Self {
            inner,
            database_name: None,
            interceptor: Arc::new(Interceptor {
                channel,
                reservations: DashMap::new(),
                next_handle: AtomicU64::new(1),
            }),
            reservation: None,
        }
    }

    /// Wrap `inner` using the process-wide channel.
    pub fn wrap(inner: C) -> Self {
        Self::new(inner, EventChannel::global())
    }

    /// Set the database name recorded on this connection's events.
    ///
    /// Connections reserved afterwards inherit the name; ones already reserved
    /// keep theirs.
    pub fn with_database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = Some(Arc::from(name.into()));
        self
    }

    fn reserved(inner: C, database_name: Option<Arc<str>>, interceptor: &Arc<Interceptor>) -> Self {
        Self {
            inner,
            database_name,
            reservation: Some(Reservation::open(interceptor)),
            interceptor: Arc::clone(interceptor),
        }
    }

    /// Get a reference to the wrapped client.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn channel(&self) -> &Arc<EventChannel> {
        &self.interceptor.channel
    }

    pub fn database_name(&self) -> Option<&str> {
        self.database_name.as_deref()
    }

    /// The connection id, for reserved connections.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.reservation.as_ref().map(|r| r.connection_id)
    }

    /// Number of reservations made through this connection tree that are not
    /// yet released.
    pub fn reserved_connections(&self) -> usize {
        self.interceptor.reservations.len()
    }

    /// Consume the wrapper and return the wrapped client.
    ///
    /// For a reserved connection this ends the reservation and publishes its
    /// disconnect event; the returned client is no longer tracked.
    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: fmt::Debug> fmt::Debug for InstrumentedConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentedConnection")
            .field("inner", &self.inner)
            .field("database_name", &self.database_name)
            .field("connection_id", &self.connection_id())
            .finish()
    }
}

#[async_trait]
impl<C: DatabaseClient> DatabaseClient for InstrumentedConnection<C> {
    type Output = C::Output;
    type Error = C::Error;

    async fn invoke(&self, statement: &str, params: &[Param]) -> Result<C::Output, C::Error> {
        if !is_query(statement) {
            return self.inner.invoke(statement, params).await;
        }

        let started_at = SystemTime::now();
        let start = Instant::now();
        let result = self.inner.invoke(statement, params).await;
        let duration = start.elapsed();

        let outcome = match &result {
            Ok(output) => QueryOutcome::Success {
                rows: output.row_count(),
            },
            Err(e) => QueryOutcome::Failure(QueryFailure::from_error(e)),
        };

        self.interceptor.channel.publish(QueryEvent {
            statement: statement.to_string(),
            parameters: params.to_vec(),
            outcome,
            started_at,
            duration,
            database_name: self.database_name.as_deref().map(str::to_string),
            connection_id: self.connection_id(),
        });

        result
    }
}

#[async_trait]
impl<C: Reserve> Reserve for InstrumentedConnection<C> {
    type Reserved = InstrumentedConnection<C::Reserved>;

    async fn reserve(&self) -> Result<Self::Reserved, C::Error> {
        let reserved = self.inner.reserve().await?;
        Ok(InstrumentedConnection::reserved(
            reserved,
            self.database_name.clone(),
            &self.interceptor,
        ))
    }
}

#[async_trait]
impl<C: Release> Release for InstrumentedConnection<C> {
    async fn release(self) -> Result<(), C::Error> {
        let InstrumentedConnection {
            inner, reservation, ..
        } = self;

        let result = inner.release().await;
        if let Some(reservation) = &reservation {
            reservation.close();
        }
        result
    }

    async fn discard(self) -> Result<(), C::Error> {
        let InstrumentedConnection {
            inner, reservation, ..
        } = self;

        let result = inner.discard().await;
        if let Some(reservation) = &reservation {
            reservation.close();
        }
        result
    }
}

/// Extension trait for easy wrapping of database clients.
pub trait InstrumentExt: DatabaseClient + Sized {
    /// Wrap this client, publishing events to `channel`.
    fn with_telemetry(self, channel: &Arc<EventChannel>) -> InstrumentedConnection<Self> {
        InstrumentedConnection::new(self, Arc::clone(channel))
    }

    /// Wrap this client, publishing events to the process-wide channel.
    fn with_global_telemetry(self) -> InstrumentedConnection<Self> {
        InstrumentedConnection::wrap(self)
    }
}

impl<C: DatabaseClient> InstrumentExt for C {}
