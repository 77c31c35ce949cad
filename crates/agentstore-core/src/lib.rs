//! Agentstore core - pure domain types and port traits.
//!
//! This crate holds everything the persistence engine needs that does not
//! touch a database driver: the schema catalog, the path/identity scheme,
//! the per-request instance model, the declarative query description, the
//! request context, the error taxonomy, and the `EntityResolver` port that
//! the SQL engine implements. Core logic depends only on these types, never
//! on sqlx directly.

pub mod callback;
pub mod catalog;
pub mod context;
pub mod error;
pub mod instance;
pub mod path;
pub mod ports;
pub mod query;

pub use callback::CallbackResolver;
pub use catalog::{
    AttrType, AttributeMeta, CatalogBuilder, CrudFlags, EmbeddingConfig, EntityMeta, RbacSpec,
    RelationshipKind, RelationshipMeta, SchemaCatalog, DELETED_ATTR, PARENT_ATTR, PATH_ATTR,
    TENANT_ATTR,
};
pub use context::DbContext;
pub use error::{Result, StoreError};
pub use instance::{AttrMap, Instance};
pub use ports::{EntityResolver, LinkRequest, Row, SearchRequest};
pub use query::{Aggregate, AggFunc, JoinInfo, JoinQuery, QueryOp, QuerySpec, RawJoinSpec, WhereClause};
