//! Callback-based resolver - routes each capability to a user-supplied
//! async function.
//!
//! This is the generic counterpart of the SQL resolver: integrations that
//! persist somewhere the SQL engine cannot reach register closures for the
//! capabilities they support, and every unregistered capability fails with
//! [`StoreError::Unsupported`].

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::context::DbContext;
use crate::error::{Result, StoreError};
use crate::instance::{AttrMap, Instance};
use crate::ports::{EntityResolver, LinkRequest, Row, SearchRequest};
use crate::query::JoinQuery;

type CreateFn =
    dyn Fn(DbContext, Instance) -> BoxFuture<'static, Result<Instance>> + Send + Sync;
type UpdateFn = dyn Fn(DbContext, Instance, AttrMap) -> BoxFuture<'static, Result<Instance>>
    + Send
    + Sync;
type QueryFn = dyn Fn(DbContext, Instance, bool, bool) -> BoxFuture<'static, Result<Vec<Instance>>>
    + Send
    + Sync;
type ChildQueryFn = dyn Fn(DbContext, String, Instance) -> BoxFuture<'static, Result<Vec<Instance>>>
    + Send
    + Sync;
type ConnectedQueryFn = dyn Fn(DbContext, String, Instance, Instance) -> BoxFuture<'static, Result<Vec<Instance>>>
    + Send
    + Sync;
type JoinQueryFn =
    dyn Fn(DbContext, JoinQuery) -> BoxFuture<'static, Result<Vec<Row>>> + Send + Sync;
type DeleteFn =
    dyn Fn(DbContext, Instance, bool) -> BoxFuture<'static, Result<Instance>> + Send + Sync;
type LinkFn =
    dyn Fn(DbContext, LinkRequest) -> BoxFuture<'static, Result<Instance>> + Send + Sync;
type SearchFn =
    dyn Fn(DbContext, SearchRequest) -> BoxFuture<'static, Result<Vec<String>>> + Send + Sync;
type TxnFn = dyn Fn(DbContext, Option<String>) -> BoxFuture<'static, Result<String>> + Send + Sync;

/// Resolver variant whose capabilities are user-supplied functions.
#[derive(Default, Clone)]
pub struct CallbackResolver {
    create: Option<Arc<CreateFn>>,
    upsert: Option<Arc<CreateFn>>,
    update: Option<Arc<UpdateFn>>,
    query: Option<Arc<QueryFn>>,
    query_children: Option<Arc<ChildQueryFn>>,
    query_connected: Option<Arc<ConnectedQueryFn>>,
    query_by_join: Option<Arc<JoinQueryFn>>,
    delete: Option<Arc<DeleteFn>>,
    link: Option<Arc<LinkFn>>,
    search: Option<Arc<SearchFn>>,
    start_txn: Option<Arc<TxnFn>>,
    commit_txn: Option<Arc<TxnFn>>,
    rollback_txn: Option<Arc<TxnFn>>,
}

impl CallbackResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_create<F>(mut self, f: F) -> Self
    where
        F: Fn(DbContext, Instance) -> BoxFuture<'static, Result<Instance>> + Send + Sync + 'static,
    {
        self.create = Some(Arc::new(f));
        self
    }

    pub fn on_upsert<F>(mut self, f: F) -> Self
    where
        F: Fn(DbContext, Instance) -> BoxFuture<'static, Result<Instance>> + Send + Sync + 'static,
    {
        self.upsert = Some(Arc::new(f));
        self
    }

    pub fn on_update<F>(mut self, f: F) -> Self
    where
        F: Fn(DbContext, Instance, AttrMap) -> BoxFuture<'static, Result<Instance>>
            + Send
            + Sync
            + 'static,
    {
        self.update = Some(Arc::new(f));
        self
    }

    pub fn on_query<F>(mut self, f: F) -> Self
    where
        F: Fn(DbContext, Instance, bool, bool) -> BoxFuture<'static, Result<Vec<Instance>>>
            + Send
            + Sync
            + 'static,
    {
        self.query = Some(Arc::new(f));
        self
    }

    pub fn on_query_children<F>(mut self, f: F) -> Self
    where
        F: Fn(DbContext, String, Instance) -> BoxFuture<'static, Result<Vec<Instance>>>
            + Send
            + Sync
            + 'static,
    {
        self.query_children = Some(Arc::new(f));
        self
    }

    pub fn on_query_connected<F>(mut self, f: F) -> Self
    where
        F: Fn(DbContext, String, Instance, Instance) -> BoxFuture<'static, Result<Vec<Instance>>>
            + Send
            + Sync
            + 'static,
    {
        self.query_connected = Some(Arc::new(f));
        self
    }

    pub fn on_query_by_join<F>(mut self, f: F) -> Self
    where
        F: Fn(DbContext, JoinQuery) -> BoxFuture<'static, Result<Vec<Row>>> + Send + Sync + 'static,
    {
        self.query_by_join = Some(Arc::new(f));
        self
    }

    pub fn on_delete<F>(mut self, f: F) -> Self
    where
        F: Fn(DbContext, Instance, bool) -> BoxFuture<'static, Result<Instance>>
            + Send
            + Sync
            + 'static,
    {
        self.delete = Some(Arc::new(f));
        self
    }

    pub fn on_link<F>(mut self, f: F) -> Self
    where
        F: Fn(DbContext, LinkRequest) -> BoxFuture<'static, Result<Instance>>
            + Send
            + Sync
            + 'static,
    {
        self.link = Some(Arc::new(f));
        self
    }

    pub fn on_search<F>(mut self, f: F) -> Self
    where
        F: Fn(DbContext, SearchRequest) -> BoxFuture<'static, Result<Vec<String>>>
            + Send
            + Sync
            + 'static,
    {
        self.search = Some(Arc::new(f));
        self
    }

    pub fn on_start_transaction<F>(mut self, f: F) -> Self
    where
        F: Fn(DbContext, Option<String>) -> BoxFuture<'static, Result<String>>
            + Send
            + Sync
            + 'static,
    {
        self.start_txn = Some(Arc::new(f));
        self
    }

    pub fn on_commit_transaction<F>(mut self, f: F) -> Self
    where
        F: Fn(DbContext, Option<String>) -> BoxFuture<'static, Result<String>>
            + Send
            + Sync
            + 'static,
    {
        self.commit_txn = Some(Arc::new(f));
        self
    }

    pub fn on_rollback_transaction<F>(mut self, f: F) -> Self
    where
        F: Fn(DbContext, Option<String>) -> BoxFuture<'static, Result<String>>
            + Send
            + Sync
            + 'static,
    {
        self.rollback_txn = Some(Arc::new(f));
        self
    }
}

fn unsupported<T>(capability: &str) -> Result<T> {
    Err(StoreError::Unsupported(capability.to_string()))
}

#[async_trait]
impl EntityResolver for CallbackResolver {
    async fn create_instance(&self, ctx: &DbContext, inst: &Instance) -> Result<Instance> {
        match &self.create {
            Some(f) => f(ctx.clone(), inst.clone()).await,
            None => unsupported("create"),
        }
    }

    async fn upsert_instance(&self, ctx: &DbContext, inst: &Instance) -> Result<Instance> {
        match &self.upsert {
            Some(f) => f(ctx.clone(), inst.clone()).await,
            None => unsupported("upsert"),
        }
    }

    async fn update_instance(
        &self,
        ctx: &DbContext,
        inst: &Instance,
        new_attrs: AttrMap,
    ) -> Result<Instance> {
        match &self.update {
            Some(f) => f(ctx.clone(), inst.clone(), new_attrs).await,
            None => unsupported("update"),
        }
    }

    async fn query_instances(
        &self,
        ctx: &DbContext,
        inst: &Instance,
        query_all: bool,
        distinct: bool,
    ) -> Result<Vec<Instance>> {
        match &self.query {
            Some(f) => f(ctx.clone(), inst.clone(), query_all, distinct).await,
            None => unsupported("query"),
        }
    }

    async fn query_child_instances(
        &self,
        ctx: &DbContext,
        parent_path: &str,
        inst: &Instance,
    ) -> Result<Vec<Instance>> {
        match &self.query_children {
            Some(f) => f(ctx.clone(), parent_path.to_string(), inst.clone()).await,
            None => unsupported("query-children"),
        }
    }

    async fn query_connected_instances(
        &self,
        ctx: &DbContext,
        relationship: &str,
        connected: &Instance,
        target: &Instance,
    ) -> Result<Vec<Instance>> {
        match &self.query_connected {
            Some(f) => {
                f(
                    ctx.clone(),
                    relationship.to_string(),
                    connected.clone(),
                    target.clone(),
                )
                .await
            }
            None => unsupported("query-connected"),
        }
    }

    async fn query_by_join(&self, ctx: &DbContext, query: &JoinQuery) -> Result<Vec<Row>> {
        match &self.query_by_join {
            Some(f) => f(ctx.clone(), query.clone()).await,
            None => unsupported("query-by-join"),
        }
    }

    async fn delete_instance(
        &self,
        ctx: &DbContext,
        inst: &Instance,
        purge: bool,
    ) -> Result<Instance> {
        match &self.delete {
            Some(f) => f(ctx.clone(), inst.clone(), purge).await,
            None => unsupported("delete"),
        }
    }

    async fn link_instances(&self, ctx: &DbContext, req: &LinkRequest) -> Result<Instance> {
        match &self.link {
            Some(f) => f(ctx.clone(), req.clone()).await,
            None => unsupported("link"),
        }
    }

    async fn full_text_search(&self, ctx: &DbContext, req: &SearchRequest) -> Result<Vec<String>> {
        match &self.search {
            Some(f) => f(ctx.clone(), req.clone()).await,
            None => unsupported("full-text-search"),
        }
    }

    async fn start_transaction(&self, ctx: &DbContext) -> Result<String> {
        match &self.start_txn {
            Some(f) => f(ctx.clone(), None).await,
            None => unsupported("start-transaction"),
        }
    }

    async fn commit_transaction(&self, ctx: &DbContext, txn_id: &str) -> Result<String> {
        match &self.commit_txn {
            Some(f) => f(ctx.clone(), Some(txn_id.to_string())).await,
            None => unsupported("commit-transaction"),
        }
    }

    async fn rollback_transaction(&self, ctx: &DbContext, txn_id: &str) -> Result<String> {
        match &self.rollback_txn {
            Some(f) => f(ctx.clone(), Some(txn_id.to_string())).await,
            None => unsupported("rollback-transaction"),
        }
    }
}
