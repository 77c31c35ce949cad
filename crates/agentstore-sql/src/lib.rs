//! Agentstore SQL engine.
//!
//! Implements the `agentstore-core` resolver port over sqlx: a dialect-aware
//! query builder, the per-row auth gate, the named-transaction manager, the
//! relational vector index, and the concrete [`SqlResolver`]. Three row-store
//! backends are supported - PostgreSQL, MySQL, and embedded SQLite - selected
//! by configuration. All SQL is runtime-checked (`sqlx::query`, not
//! `sqlx::query!`) so no live database is needed at compile time.

pub mod auth;
pub mod backend;
pub mod builder;
pub mod executor;
pub mod resolver;
pub mod schema;
pub mod settings;
pub mod txn;
pub mod value;
pub mod vector;

pub use auth::{AuthGate, CrudOp, ReadIntent, DEFAULT_TENANT};
pub use backend::{StoreKind, StorePool};
pub use builder::{ColRef, JoinClause, JoinKind, OnExpr, SqlBuilder, SqlQuery};
pub use executor::Executor;
pub use resolver::{SqlResolver, VectorBackend};
pub use schema::{apply_schema_sql, ensure_schema};
pub use settings::{
    EmbeddingSettings, SqliteTuning, StoreSettings, StoreType, VectorSettings, VectorStoreType,
};
pub use txn::TransactionManager;
pub use value::SqlParam;
pub use vector::RelationalVectorIndex;
