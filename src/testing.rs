//! Scripted client and event recorder shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::channel::EventChannel;
use crate::client::{DatabaseClient, Release, Reserve, RowCount};
use crate::events::{ConnectionEvent, Param, QueryEvent};

#[derive(Debug, Clone)]
pub(crate) struct MockRows(pub Arc<Vec<i64>>);

impl RowCount for MockRows {
    fn row_count(&self) -> Option<u64> {
        Some(self.0.len() as u64)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("relation \"{0}\" does not exist")]
pub(crate) struct MockError(pub String);

/// Statements mentioning `missing` fail; statements mentioning `slow` take 30ms.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockClient {
    pub calls: Arc<Mutex<Vec<String>>>,
    pub last_rows: Arc<Mutex<Option<Arc<Vec<i64>>>>>,
    pub releases: Arc<AtomicUsize>,
    pub discards: Arc<AtomicUsize>,
}

impl MockClient {
    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn discard_count(&self) -> usize {
        self.discards.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseClient for MockClient {
    type Output = MockRows;
    type Error = MockError;

    async fn invoke(&self, statement: &str, _params: &[Param]) -> Result<MockRows, MockError> {
        self.calls.lock().push(statement.to_string());
        if statement.contains("slow") {
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        if statement.contains("missing") {
            return Err(MockError("missing".to_string()));
        }
        let rows = Arc::new(vec![1, 2, 3]);
        *self.last_rows.lock() = Some(Arc::clone(&rows));
        Ok(MockRows(rows))
    }
}

#[async_trait]
impl Reserve for MockClient {
    type Reserved = MockClient;

    async fn reserve(&self) -> Result<MockClient, MockError> {
        Ok(self.clone())
    }
}

#[async_trait]
impl Release for MockClient {
    async fn release(self) -> Result<(), MockError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn discard(self) -> Result<(), MockError> {
        self.discards.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Recorded {
    Query(QueryEvent),
    Connection(ConnectionEvent),
}

/// Records everything published on a channel, across both topics, in order.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventLog(Arc<Mutex<Vec<Recorded>>>);

impl EventLog {
    pub fn attach(channel: &EventChannel) -> Self {
        let log = Self::default();
        let queries = log.clone();
        channel.subscribe(move |event: &QueryEvent| {
            queries.0.lock().push(Recorded::Query(event.clone()))
        });
        let connections = log.clone();
        channel.subscribe(move |event: &ConnectionEvent| {
            connections.0.lock().push(Recorded::Connection(event.clone()))
        });
        log
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.0.lock().clone()
    }

    pub fn queries(&self) -> Vec<QueryEvent> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Recorded::Query(query) => Some(query),
                Recorded::Connection(_) => None,
            })
            .collect()
    }
}
