//! Backend pools and SQL dialect details.

use anyhow::Context;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{MySqlPool, PgPool, SqlitePool};
use tracing::info;

use agentstore_core::{Result, StoreError};

use crate::settings::{SqliteTuning, StoreSettings, StoreType};

/// Which SQL dialect the engine is talking to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    MySql,
    Sqlite,
}

impl StoreKind {
    /// Positional placeholder for the `n`-th parameter (1-based).
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Self::Postgres => format!("${n}"),
            Self::MySql | Self::Sqlite => "?".to_string(),
        }
    }

    pub fn quote(self, ident: &str) -> String {
        match self {
            Self::MySql => format!("`{ident}`"),
            _ => format!("\"{ident}\""),
        }
    }

    pub fn qualify(self, table: &str, column: &str) -> String {
        format!("{}.{}", self.quote(table), self.quote(column))
    }

    /// Only Postgres carries the pgvector column type.
    pub fn supports_vector(self) -> bool {
        matches!(self, Self::Postgres)
    }
}

/// Connection pool for the active backend.
#[derive(Clone)]
pub enum StorePool {
    Postgres(PgPool),
    MySql(MySqlPool),
    Sqlite(SqlitePool),
}

impl StorePool {
    pub fn kind(&self) -> StoreKind {
        match self {
            Self::Postgres(_) => StoreKind::Postgres,
            Self::MySql(_) => StoreKind::MySql,
            Self::Sqlite(_) => StoreKind::Sqlite,
        }
    }

    pub fn as_postgres(&self) -> Option<&PgPool> {
        match self {
            Self::Postgres(pool) => Some(pool),
            _ => None,
        }
    }

    /// Open a pool per the settings. SQLite applies the engine tuning
    /// PRAGMAs from config on every new connection.
    pub async fn connect(settings: &StoreSettings) -> Result<Self> {
        info!(url = %settings.masked_url(), "connecting to row store");
        match settings.store_type {
            StoreType::Postgres => {
                let pool = PgPoolOptions::new()
                    .max_connections(settings.pool_size)
                    .acquire_timeout(settings.connection_timeout)
                    .connect(&settings.connection_url())
                    .await
                    .context("failed to connect to postgres")?;
                Ok(Self::Postgres(pool))
            }
            StoreType::MySql => {
                let pool = MySqlPoolOptions::new()
                    .max_connections(settings.pool_size)
                    .acquire_timeout(settings.connection_timeout)
                    .connect(&settings.connection_url())
                    .await
                    .context("failed to connect to mysql")?;
                Ok(Self::MySql(pool))
            }
            StoreType::Sqlite => {
                let opts = sqlite_options(&settings.sqlite_path, &settings.sqlite)?;
                let pool = SqlitePoolOptions::new()
                    .max_connections(settings.pool_size)
                    .acquire_timeout(settings.connection_timeout)
                    .connect_with(opts)
                    .await
                    .context("failed to open sqlite database")?;
                Ok(Self::Sqlite(pool))
            }
        }
    }

    pub async fn close(&self) {
        match self {
            Self::Postgres(pool) => pool.close().await,
            Self::MySql(pool) => pool.close().await,
            Self::Sqlite(pool) => pool.close().await,
        }
    }
}

fn sqlite_options(path: &str, tuning: &SqliteTuning) -> Result<SqliteConnectOptions> {
    let journal = match tuning.journal_mode.to_lowercase().as_str() {
        "delete" => SqliteJournalMode::Delete,
        "truncate" => SqliteJournalMode::Truncate,
        "persist" => SqliteJournalMode::Persist,
        "memory" => SqliteJournalMode::Memory,
        "wal" => SqliteJournalMode::Wal,
        "off" => SqliteJournalMode::Off,
        other => {
            return Err(StoreError::InvalidInput(format!(
                "unknown sqlite journal mode: {other}"
            )))
        }
    };
    let synchronous = match tuning.synchronous.to_lowercase().as_str() {
        "off" => SqliteSynchronous::Off,
        "normal" => SqliteSynchronous::Normal,
        "full" => SqliteSynchronous::Full,
        "extra" => SqliteSynchronous::Extra,
        other => {
            return Err(StoreError::InvalidInput(format!(
                "unknown sqlite synchronous mode: {other}"
            )))
        }
    };
    Ok(SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(journal)
        .synchronous(synchronous)
        .busy_timeout(tuning.busy_timeout)
        .pragma("cache_size", tuning.cache_size.to_string())
        .pragma("temp_store", tuning.temp_store.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_follow_dialect() {
        assert_eq!(StoreKind::Postgres.placeholder(3), "$3");
        assert_eq!(StoreKind::Sqlite.placeholder(3), "?");
        assert_eq!(StoreKind::MySql.placeholder(1), "?");
    }

    #[test]
    fn identifier_quoting_follows_dialect() {
        assert_eq!(StoreKind::Postgres.qualify("t", "c"), "\"t\".\"c\"");
        assert_eq!(StoreKind::MySql.qualify("t", "c"), "`t`.`c`");
    }

    #[test]
    fn bad_tuning_is_rejected() {
        let tuning = SqliteTuning {
            journal_mode: "bogus".into(),
            ..SqliteTuning::default()
        };
        assert!(sqlite_options(":memory:", &tuning).is_err());
    }
}
