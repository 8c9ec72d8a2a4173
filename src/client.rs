//! Capabilities a database client handle exposes to the instrumentation.

use async_trait::async_trait;

use crate::events::Param;

/// Number of rows in a query result, when the result is a row sequence.
pub trait RowCount {
    fn row_count(&self) -> Option<u64> {
        None
    }
}

impl<T> RowCount for Vec<T> {
    fn row_count(&self) -> Option<u64> {
        Some(self.len() as u64)
    }
}

impl RowCount for () {}

/// A handle that can run statements.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    type Output: RowCount + Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Run `statement` with positional `params`.
    async fn invoke(&self, statement: &str, params: &[Param]) -> Result<Self::Output, Self::Error>;
}

/// A pooled client that can hand out a dedicated connection.
#[async_trait]
pub trait Reserve: DatabaseClient {
    type Reserved: Release<Output = Self::Output, Error = Self::Error>;

    async fn reserve(&self) -> Result<Self::Reserved, Self::Error>;
}

/// A reserved connection that must be given back to its pool.
#[async_trait]
pub trait Release: DatabaseClient + Sized {
    async fn release(self) -> Result<(), Self::Error>;

    /// Give the connection back without keeping its work, e.g. roll back.
    ///
    /// Defaults to dropping the handle.
    async fn discard(self) -> Result<(), Self::Error> {
        drop(self);
        Ok(())
    }
}
