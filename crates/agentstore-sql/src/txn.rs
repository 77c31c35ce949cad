//! Named transactions keyed by opaque ids.
//!
//! The opaque id is the only value callers pass around; the manager owns the
//! underlying session. Only `begin` and the two closers touch the map, and
//! the mutex is never held across a database await.

use std::collections::HashMap;

use sqlx::{MySql, Postgres, Sqlite, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, error};
use uuid::Uuid;

use agentstore_core::{Result, StoreError};

use crate::backend::StorePool;

/// A live transaction on a dedicated connection.
pub enum TxnSession {
    Postgres(Transaction<'static, Postgres>),
    MySql(Transaction<'static, MySql>),
    Sqlite(Transaction<'static, Sqlite>),
}

/// Map from opaque txn id to its live session.
#[derive(Default)]
pub struct TransactionManager {
    sessions: Mutex<HashMap<String, TxnSession>>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a transaction on a fresh session from the pool and hand back
    /// its opaque id.
    pub async fn begin(&self, pool: &StorePool) -> Result<String> {
        let session = match pool {
            StorePool::Postgres(pool) => TxnSession::Postgres(
                pool.begin().await.map_err(|e| StoreError::Backend(e.into()))?,
            ),
            StorePool::MySql(pool) => {
                TxnSession::MySql(pool.begin().await.map_err(|e| StoreError::Backend(e.into()))?)
            }
            StorePool::Sqlite(pool) => TxnSession::Sqlite(
                pool.begin().await.map_err(|e| StoreError::Backend(e.into()))?,
            ),
        };
        let id = Uuid::new_v4().to_string();
        self.sessions.lock().await.insert(id.clone(), session);
        debug!(txn = %id, "transaction started");
        Ok(id)
    }

    /// Check a session out of the map for the duration of one statement.
    /// Callers must `restore` it afterwards; a session that is never
    /// restored rolls back on drop.
    pub async fn take(&self, id: &str) -> Result<TxnSession> {
        self.sessions
            .lock()
            .await
            .remove(id)
            .ok_or_else(|| StoreError::TransactionNotFound(id.to_string()))
    }

    pub async fn restore(&self, id: String, session: TxnSession) {
        self.sessions.lock().await.insert(id, session);
    }

    pub async fn commit(&self, id: &str) -> Result<()> {
        let session = self.take(id).await?;
        let result = match session {
            TxnSession::Postgres(tx) => tx.commit().await,
            TxnSession::MySql(tx) => tx.commit().await,
            TxnSession::Sqlite(tx) => tx.commit().await,
        };
        result.map_err(|e| {
            error!(txn = %id, error = %e, "commit failed");
            StoreError::Backend(e.into())
        })?;
        debug!(txn = %id, "transaction committed");
        Ok(())
    }

    /// Roll back and release. The session is removed from the map on every
    /// exit path; a failed rollback still drops the connection.
    pub async fn rollback(&self, id: &str) -> Result<()> {
        let session = self.take(id).await?;
        let result = match session {
            TxnSession::Postgres(tx) => tx.rollback().await,
            TxnSession::MySql(tx) => tx.rollback().await,
            TxnSession::Sqlite(tx) => tx.rollback().await,
        };
        result.map_err(|e| {
            error!(txn = %id, error = %e, "rollback failed");
            StoreError::Backend(e.into())
        })?;
        debug!(txn = %id, "transaction rolled back");
        Ok(())
    }

    pub async fn is_active(&self, id: &str) -> bool {
        self.sessions.lock().await.contains_key(id)
    }
}
