//! SeaORM connections as instrumentable clients.
//!
//! A `DatabaseConnection` runs statements through `query_all`. Reserving one
//! begins a transaction, which pins a single pooled connection until it is
//! released (committed) or discarded (rolled back).

use async_trait::async_trait;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbErr, QueryResult, Statement,
    TransactionTrait, Value,
};

use crate::client::{DatabaseClient, Release, Reserve};
use crate::connection::InstrumentedConnection;
use crate::events::Param;

fn to_value(param: &Param) -> Value {
    match param {
        Param::Null => Value::from(None::<String>),
        Param::Bool(v) => Value::from(*v),
        Param::Int(v) => Value::from(*v),
        Param::Float(v) => Value::from(*v),
        Param::Text(v) => Value::from(v.clone()),
        Param::Bytes(v) => Value::from(v.clone()),
    }
}

fn statement<C: ConnectionTrait>(conn: &C, sql: &str, params: &[Param]) -> Statement {
    Statement::from_sql_and_values(
        conn.get_database_backend(),
        sql,
        params.iter().map(to_value),
    )
}

#[async_trait]
impl DatabaseClient for DatabaseConnection {
    type Output = Vec<QueryResult>;
    type Error = DbErr;

    async fn invoke(&self, sql: &str, params: &[Param]) -> Result<Vec<QueryResult>, DbErr> {
        self.query_all(statement(self, sql, params)).await
    }
}

#[async_trait]
impl Reserve for DatabaseConnection {
    type Reserved = DatabaseTransaction;

    async fn reserve(&self) -> Result<DatabaseTransaction, DbErr> {
        self.begin().await
    }
}

#[async_trait]
impl DatabaseClient for DatabaseTransaction {
    type Output = Vec<QueryResult>;
    type Error = DbErr;

    async fn invoke(&self, sql: &str, params: &[Param]) -> Result<Vec<QueryResult>, DbErr> {
        self.query_all(statement(self, sql, params)).await
    }
}

#[async_trait]
impl Release for DatabaseTransaction {
    async fn release(self) -> Result<(), DbErr> {
        self.commit().await
    }

    async fn discard(self) -> Result<(), DbErr> {
        self.rollback().await
    }
}

impl From<DatabaseConnection> for InstrumentedConnection<DatabaseConnection> {
    fn from(connection: DatabaseConnection) -> Self {
        Self::wrap(connection)
    }
}
