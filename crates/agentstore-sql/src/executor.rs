//! Statement execution against the pool or a named transaction session.

use std::sync::Arc;

use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::{MySql, Postgres, Sqlite};

use agentstore_core::{Result, Row, StoreError};

use crate::backend::{StoreKind, StorePool};
use crate::builder::SqlQuery;
use crate::txn::{TransactionManager, TxnSession};
use crate::value::{mysql_row_to_json, pg_row_to_json, sqlite_row_to_json, SqlParam};

/// Runs built statements. When a txn id is supplied, the statement runs on
/// that transaction's session; otherwise on a pooled connection.
#[derive(Clone)]
pub struct Executor {
    pool: StorePool,
    txns: Arc<TransactionManager>,
}

impl Executor {
    pub fn new(pool: StorePool) -> Self {
        Self {
            pool,
            txns: Arc::new(TransactionManager::new()),
        }
    }

    pub fn kind(&self) -> StoreKind {
        self.pool.kind()
    }

    pub fn pool(&self) -> &StorePool {
        &self.pool
    }

    pub fn transactions(&self) -> &Arc<TransactionManager> {
        &self.txns
    }

    pub async fn fetch_all(&self, txn: Option<&str>, query: &SqlQuery) -> Result<Vec<Row>> {
        match txn {
            None => self.fetch_all_pool(query).await,
            Some(id) => {
                let mut session = self.txns.take(id).await?;
                let result = fetch_all_session(&mut session, query).await;
                self.txns.restore(id.to_string(), session).await;
                result
            }
        }
    }

    pub async fn fetch_optional(&self, txn: Option<&str>, query: &SqlQuery) -> Result<Option<Row>> {
        let mut rows = self.fetch_all(txn, query).await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    /// Execute a write; returns the number of affected rows.
    pub async fn execute(&self, txn: Option<&str>, query: &SqlQuery) -> Result<u64> {
        match txn {
            None => self.execute_pool(query).await,
            Some(id) => {
                let mut session = self.txns.take(id).await?;
                let result = execute_session(&mut session, query).await;
                self.txns.restore(id.to_string(), session).await;
                result
            }
        }
    }

    async fn fetch_all_pool(&self, query: &SqlQuery) -> Result<Vec<Row>> {
        match &self.pool {
            StorePool::Postgres(pool) => {
                let rows = bind_pg(query)?.fetch_all(pool).await.map_err(map_db_err)?;
                Ok(rows.iter().map(pg_row_to_json).collect())
            }
            StorePool::MySql(pool) => {
                let rows = bind_mysql(query)?
                    .fetch_all(pool)
                    .await
                    .map_err(map_db_err)?;
                Ok(rows.iter().map(mysql_row_to_json).collect())
            }
            StorePool::Sqlite(pool) => {
                let rows = bind_sqlite(query)?
                    .fetch_all(pool)
                    .await
                    .map_err(map_db_err)?;
                Ok(rows.iter().map(sqlite_row_to_json).collect())
            }
        }
    }

    async fn execute_pool(&self, query: &SqlQuery) -> Result<u64> {
        match &self.pool {
            StorePool::Postgres(pool) => Ok(bind_pg(query)?
                .execute(pool)
                .await
                .map_err(map_db_err)?
                .rows_affected()),
            StorePool::MySql(pool) => Ok(bind_mysql(query)?
                .execute(pool)
                .await
                .map_err(map_db_err)?
                .rows_affected()),
            StorePool::Sqlite(pool) => Ok(bind_sqlite(query)?
                .execute(pool)
                .await
                .map_err(map_db_err)?
                .rows_affected()),
        }
    }
}

async fn fetch_all_session(session: &mut TxnSession, query: &SqlQuery) -> Result<Vec<Row>> {
    match session {
        TxnSession::Postgres(tx) => {
            let rows = bind_pg(query)?
                .fetch_all(&mut **tx)
                .await
                .map_err(map_db_err)?;
            Ok(rows.iter().map(pg_row_to_json).collect())
        }
        TxnSession::MySql(tx) => {
            let rows = bind_mysql(query)?
                .fetch_all(&mut **tx)
                .await
                .map_err(map_db_err)?;
            Ok(rows.iter().map(mysql_row_to_json).collect())
        }
        TxnSession::Sqlite(tx) => {
            let rows = bind_sqlite(query)?
                .fetch_all(&mut **tx)
                .await
                .map_err(map_db_err)?;
            Ok(rows.iter().map(sqlite_row_to_json).collect())
        }
    }
}

async fn execute_session(session: &mut TxnSession, query: &SqlQuery) -> Result<u64> {
    match session {
        TxnSession::Postgres(tx) => Ok(bind_pg(query)?
            .execute(&mut **tx)
            .await
            .map_err(map_db_err)?
            .rows_affected()),
        TxnSession::MySql(tx) => Ok(bind_mysql(query)?
            .execute(&mut **tx)
            .await
            .map_err(map_db_err)?
            .rows_affected()),
        TxnSession::Sqlite(tx) => Ok(bind_sqlite(query)?
            .execute(&mut **tx)
            .await
            .map_err(map_db_err)?
            .rows_affected()),
    }
}

/// Unique-constraint violations surface as duplicate identifiers; anything
/// else bubbles as a backend error.
pub fn map_db_err(e: sqlx::Error) -> StoreError {
    if let Some(db) = e.as_database_error() {
        if db.is_unique_violation() {
            return StoreError::DuplicateId(db.message().to_string());
        }
    }
    StoreError::Backend(e.into())
}

fn bind_pg<'q>(
    query: &'q SqlQuery,
) -> Result<sqlx::query::Query<'q, Postgres, PgArguments>> {
    let mut q = sqlx::query(&query.sql);
    for param in &query.params {
        q = match param {
            SqlParam::Null => q.bind(None::<String>),
            SqlParam::Bool(b) => q.bind(*b),
            SqlParam::Int(i) => q.bind(*i),
            SqlParam::Float(f) => q.bind(*f),
            SqlParam::Text(s) => q.bind(s.as_str()),
            SqlParam::Vector(v) => q.bind(pgvector::Vector::from(v.clone())),
        };
    }
    Ok(q)
}

fn bind_mysql<'q>(
    query: &'q SqlQuery,
) -> Result<sqlx::query::Query<'q, MySql, MySqlArguments>> {
    let mut q = sqlx::query(&query.sql);
    for param in &query.params {
        q = match param {
            SqlParam::Null => q.bind(None::<String>),
            SqlParam::Bool(b) => q.bind(*b),
            SqlParam::Int(i) => q.bind(*i),
            SqlParam::Float(f) => q.bind(*f),
            SqlParam::Text(s) => q.bind(s.as_str()),
            SqlParam::Vector(_) => {
                return Err(StoreError::Unsupported(
                    "vector parameters require the postgres backend".to_string(),
                ))
            }
        };
    }
    Ok(q)
}

fn bind_sqlite<'q>(
    query: &'q SqlQuery,
) -> Result<sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>> {
    let mut q = sqlx::query(&query.sql);
    for param in &query.params {
        q = match param {
            SqlParam::Null => q.bind(None::<String>),
            SqlParam::Bool(b) => q.bind(*b),
            SqlParam::Int(i) => q.bind(*i),
            SqlParam::Float(f) => q.bind(*f),
            SqlParam::Text(s) => q.bind(s.as_str()),
            SqlParam::Vector(_) => {
                return Err(StoreError::Unsupported(
                    "vector parameters require the postgres backend".to_string(),
                ))
            }
        };
    }
    Ok(q)
}
