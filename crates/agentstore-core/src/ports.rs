//! Resolver port - the CRUD contract callers invoke.
//!
//! Implemented by the SQL engine and by the callback-based variant; callers
//! depend only on this trait, never on a concrete backend.

use async_trait::async_trait;
use serde_json::Value;

use crate::context::DbContext;
use crate::error::Result;
use crate::instance::{AttrMap, Instance};
use crate::query::JoinQuery;

/// Row shape returned by join queries: projected column alias → value.
pub type Row = serde_json::Map<String, Value>;

/// Create or update a relationship between two existing instances.
#[derive(Debug, Clone)]
pub struct LinkRequest {
    pub node1: Instance,
    pub node2: Instance,
    /// Fully qualified relationship name.
    pub relationship: String,
    /// Replace an existing between link instead of failing on it.
    pub or_update: bool,
    /// Sever the relationship instead of establishing it.
    pub delete_mode: bool,
}

impl LinkRequest {
    pub fn new(node1: Instance, node2: Instance, relationship: impl Into<String>) -> Self {
        Self {
            node1,
            node2,
            relationship: relationship.into(),
            or_update: false,
            delete_mode: false,
        }
    }

    pub fn or_update(mut self) -> Self {
        self.or_update = true;
        self
    }

    pub fn delete_mode(mut self) -> Self {
        self.delete_mode = true;
        self
    }
}

/// Semantic lookup request against the vector index.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub module: String,
    pub entity: String,
    pub query: String,
    pub limit: Option<usize>,
}

impl SearchRequest {
    pub fn new(
        module: impl Into<String>,
        entity: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            module: module.into(),
            entity: entity.into(),
            query: query.into(),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// The capability set of a persistence resolver.
///
/// Every operation is asynchronous and carries the explicit [`DbContext`];
/// there is no ambient identity or transaction state. Transactions travel
/// as opaque ids returned by `start_transaction`.
#[async_trait]
pub trait EntityResolver: Send + Sync {
    /// Insert a new instance, allocate its path, grant the caller full CRUD
    /// on it, and index it for semantic lookup when configured.
    async fn create_instance(&self, ctx: &DbContext, inst: &Instance) -> Result<Instance>;

    /// Idempotent insert: like create, but uses the backend upsert and
    /// writes no ownership rows. Used for schema-seeded rows.
    async fn upsert_instance(&self, ctx: &DbContext, inst: &Instance) -> Result<Instance>;

    /// Apply `new_attrs` to the row identified by the instance's path and
    /// return a fresh instance with the merged attributes.
    async fn update_instance(
        &self,
        ctx: &DbContext,
        inst: &Instance,
        new_attrs: AttrMap,
    ) -> Result<Instance>;

    /// Run the instance's query map. `query_all` drops the predicates and
    /// returns every visible row.
    async fn query_instances(
        &self,
        ctx: &DbContext,
        inst: &Instance,
        query_all: bool,
        distinct: bool,
    ) -> Result<Vec<Instance>>;

    /// Query restricted to rows contained under `parent_path`.
    async fn query_child_instances(
        &self,
        ctx: &DbContext,
        parent_path: &str,
        inst: &Instance,
    ) -> Result<Vec<Instance>>;

    /// Instances of `target`'s entity connected to `connected` through the
    /// named relationship.
    async fn query_connected_instances(
        &self,
        ctx: &DbContext,
        relationship: &str,
        connected: &Instance,
        target: &Instance,
    ) -> Result<Vec<Instance>>;

    /// The most expressive read path: joins driven by relationship metadata
    /// or spelled out raw, always with an explicit projection.
    async fn query_by_join(&self, ctx: &DbContext, query: &JoinQuery) -> Result<Vec<Row>>;

    /// Soft-delete (default) or purge the row identified by the instance's
    /// path. Purging also removes the vector entry first.
    async fn delete_instance(&self, ctx: &DbContext, inst: &Instance, purge: bool)
        -> Result<Instance>;

    /// Create, replace, or sever a relationship between two instances.
    async fn link_instances(&self, ctx: &DbContext, req: &LinkRequest) -> Result<Instance>;

    /// Embed the query text and return the nearest paths, up to the
    /// requested limit (default 5).
    async fn full_text_search(&self, ctx: &DbContext, req: &SearchRequest) -> Result<Vec<String>>;

    async fn start_transaction(&self, ctx: &DbContext) -> Result<String>;
    async fn commit_transaction(&self, ctx: &DbContext, txn_id: &str) -> Result<String>;
    async fn rollback_transaction(&self, ctx: &DbContext, txn_id: &str) -> Result<String>;
}
