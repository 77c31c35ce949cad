//! The concrete SQL resolver.
//!
//! Orchestrates the schema catalog, auth gate, query builder, transaction
//! manager, and vector adapter behind the `EntityResolver` port. Write
//! ordering on create: permission check, path allocation, one-to-one
//! counterpart placeholders, row insert, owner row, then best-effort
//! embedding indexing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use agentstore_core::catalog::{sanitize_identifier, vector_table};
use agentstore_core::query::{JoinQuery, QuerySpec, WhereClause};
use agentstore_core::{
    path, AttrMap, AttrType, AttributeMeta, DbContext, EntityMeta, EntityResolver, Instance,
    LinkRequest, QueryOp, RelationshipKind, Result, Row, SchemaCatalog, SearchRequest, StoreError,
    DELETED_ATTR, PARENT_ATTR, PATH_ATTR, TENANT_ATTR,
};
use agentstore_vector::{embed_chunked, Chunker, SharedEmbedder, VectorDoc, VectorIndex};

use crate::auth::{AuthGate, CrudOp, ReadIntent};
use crate::backend::StorePool;
use crate::builder::{ColRef, JoinClause, OnExpr, SqlBuilder};
use crate::executor::Executor;
use crate::schema;
use crate::settings::{
    EmbeddingSettings, StoreSettings, VectorSettings, VectorStoreType,
};
use crate::value::SqlParam;
use crate::vector::RelationalVectorIndex;
use agentstore_vector::{EmbeddedVectorStore, HashingEmbedder, HttpEmbedder};

/// Default result count for `full_text_search`.
const DEFAULT_SEARCH_LIMIT: usize = 5;
/// Candidate pool for the vector half of a hybrid query.
const HYBRID_LIMIT: usize = 10;

/// Which auxiliary index backs semantic lookup.
#[derive(Clone)]
pub enum VectorBackend {
    Disabled,
    /// pgvector tables next to each entity table; requires Postgres.
    Relational,
    /// Per-module embedded LMDB store.
    Embedded(Arc<EmbeddedVectorStore>),
}

pub struct SqlResolver {
    catalog: Arc<SchemaCatalog>,
    exec: Executor,
    gate: AuthGate,
    vector_backend: VectorBackend,
    embedder: Option<SharedEmbedder>,
    chunker: Chunker,
    /// At most one transaction per resolver.
    active_txn: Mutex<Option<String>>,
}

impl SqlResolver {
    pub fn new(pool: StorePool, catalog: Arc<SchemaCatalog>) -> Self {
        Self {
            gate: AuthGate::new(Arc::clone(&catalog)),
            catalog,
            exec: Executor::new(pool),
            vector_backend: VectorBackend::Disabled,
            embedder: None,
            chunker: Chunker::default(),
            active_txn: Mutex::new(None),
        }
    }

    /// Wire up the resolver from the environment-driven settings: connect
    /// the pool and configure the vector backend and embedding provider.
    pub async fn from_settings(
        catalog: Arc<SchemaCatalog>,
        store: &StoreSettings,
        vector: &VectorSettings,
        embedding: &EmbeddingSettings,
    ) -> Result<Self> {
        let pool = StorePool::connect(store).await?;
        let mut resolver = Self::new(pool, catalog);

        resolver.vector_backend = match vector.store_type {
            VectorStoreType::Disabled => VectorBackend::Disabled,
            VectorStoreType::Relational => VectorBackend::Relational,
            VectorStoreType::Embedded => {
                VectorBackend::Embedded(Arc::new(EmbeddedVectorStore::new(&vector.path)))
            }
        };
        if !matches!(resolver.vector_backend, VectorBackend::Disabled) {
            let embedder: SharedEmbedder = match embedding.provider.as_str() {
                "hashing" => Arc::new(HashingEmbedder::new(embedding.dimension)),
                _ => Arc::new(HttpEmbedder::new(
                    &embedding.api_base,
                    embedding.api_key.clone().unwrap_or_default(),
                    &embedding.model,
                    embedding.dimension,
                )),
            };
            resolver.embedder = Some(embedder);
            resolver.chunker = Chunker::new(embedding.chunk_size, embedding.chunk_overlap)?;
        }
        Ok(resolver)
    }

    pub fn with_vector_backend(mut self, backend: VectorBackend) -> Self {
        self.vector_backend = backend;
        self
    }

    pub fn with_embedder(mut self, embedder: SharedEmbedder) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_chunker(mut self, chunker: Chunker) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn catalog(&self) -> &Arc<SchemaCatalog> {
        &self.catalog
    }

    pub fn executor(&self) -> &Executor {
        &self.exec
    }

    pub fn auth_gate(&self) -> &AuthGate {
        &self.gate
    }

    /// Create the catalog's tables on first boot.
    pub async fn ensure_schema(&self) -> Result<()> {
        let dim = self.embedder.as_ref().map(|e| e.dimension());
        schema::ensure_schema(&self.exec, &self.catalog, dim).await
    }

    // ── internals ─────────────────────────────────────────────

    fn builder(&self) -> SqlBuilder<'_> {
        SqlBuilder::new(&self.catalog, self.exec.kind())
    }

    async fn txn_id(&self) -> Option<String> {
        self.active_txn.lock().await.clone()
    }

    fn table_for(&self, meta: &EntityMeta) -> String {
        self.catalog.table_reference(&meta.module, &meta.name)
    }

    fn vector_index_for(&self, meta: &EntityMeta) -> Option<Box<dyn VectorIndex>> {
        if !meta.has_fts() {
            return None;
        }
        match &self.vector_backend {
            VectorBackend::Disabled => None,
            VectorBackend::Relational => {
                let pool = self.exec.pool().as_postgres()?.clone();
                Some(Box::new(RelationalVectorIndex::new(
                    pool,
                    vector_table(&self.table_for(meta)),
                )))
            }
            VectorBackend::Embedded(store) => {
                Some(Box::new(store.index_for(meta.module.as_str())))
            }
        }
    }

    /// Provider for an entity: the entity's own embedding config overrides
    /// the resolver-wide provider, falling back to environment defaults for
    /// credentials. No config → the resolver's provider as-is.
    fn embedder_for(&self, meta: &EntityMeta) -> Option<SharedEmbedder> {
        let base = self.embedder.clone()?;
        let Some(cfg) = &meta.embedding else {
            return Some(base);
        };
        if cfg.provider.is_none() && cfg.model.is_none() {
            return Some(base);
        }
        let dimension = cfg.dimension.unwrap_or_else(|| base.dimension());
        if cfg.provider.as_deref() == Some("hashing") {
            return Some(Arc::new(HashingEmbedder::new(dimension)));
        }
        let defaults = EmbeddingSettings::default();
        let model = cfg.model.clone().unwrap_or(defaults.model);
        Some(Arc::new(HttpEmbedder::new(
            defaults.api_base,
            defaults.api_key.unwrap_or_default(),
            model,
            dimension,
        )))
    }

    /// Concatenated full-text-search text of a row, or nothing when no
    /// configured attribute carries a string.
    fn fts_text(meta: &EntityMeta, attrs: &AttrMap) -> Option<String> {
        let parts: Vec<&str> = meta
            .fts_columns()
            .iter()
            .filter_map(|name| attrs.get(name).and_then(Value::as_str))
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }

    /// Best-effort embedding upsert; the row store is the source of truth
    /// and failures here only warn.
    async fn index_embedding(&self, meta: &EntityMeta, row_path: &str, tenant: &str, attrs: &AttrMap) {
        let Some(index) = self.vector_index_for(meta) else {
            return;
        };
        if !index.is_supported() {
            return;
        }
        let Some(embedder) = self.embedder_for(meta) else {
            warn!(entity = %meta.fq_name(), "fts entity without an embedding provider");
            return;
        };
        let Some(text) = Self::fts_text(meta, attrs) else {
            return;
        };
        let embedding = match embed_chunked(embedder.as_ref(), &self.chunker, &text).await {
            Ok(v) => v,
            Err(e) => {
                warn!(path = row_path, error = %e, "embedding computation failed");
                return;
            }
        };
        let doc = VectorDoc {
            id: row_path.to_string(),
            embedding,
            tenant: tenant.to_string(),
        };
        if let Err(e) = index.add_embedding(&doc).await {
            warn!(path = row_path, error = %e, "embedding upsert failed");
        }
    }

    /// Remove the vector entry for a row. Runs before the row delete so no
    /// dangling vector survives a purge.
    async fn drop_embedding(&self, meta: &EntityMeta, row_path: &str) {
        let Some(index) = self.vector_index_for(meta) else {
            return;
        };
        if !index.is_supported() {
            return;
        }
        if let Err(e) = index.delete(row_path).await {
            warn!(path = row_path, error = %e, "embedding delete failed");
        }
    }

    fn instance_from_row(&self, meta: &EntityMeta, row: Row) -> Instance {
        let by_column: HashMap<String, &AttributeMeta> = meta
            .attributes
            .iter()
            .map(|a| (sanitize_identifier(&a.name), a))
            .collect();
        let mut attrs = AttrMap::new();
        for (column, value) in row {
            match by_column.get(column.as_str()) {
                Some(attr) if attr.write_only => continue,
                Some(attr) => {
                    attrs.insert(attr.name.clone(), normalize_value(attr.ty, value));
                }
                None if column == DELETED_ATTR => {
                    attrs.insert(column, normalize_value(AttrType::Boolean, value));
                }
                None => {
                    attrs.insert(column, value);
                }
            }
        }
        Instance::new(&meta.module, &meta.name).with_attrs(attrs)
    }

    /// Run a select over an entity table: read restriction, guards,
    /// predicates, joins, then rows back into instances.
    async fn select_instances(
        &self,
        ctx: &DbContext,
        meta: &EntityMeta,
        spec: &QuerySpec,
        joins: Vec<JoinClause>,
    ) -> Result<Vec<Instance>> {
        let txn = self.txn_id().await;
        let txn = txn.as_deref();
        let fq = meta.fq_name();
        let table = self.table_for(meta);
        let tenant = self.gate.tenant_id(&self.exec, txn, ctx).await?;
        let mut restrictions = Vec::new();
        if let Some(restriction) = self
            .gate
            .read_restriction(&self.exec, txn, ctx, &fq, &table, &tenant, ReadIntent::Plain)
            .await?
        {
            restrictions.push(restriction);
        }
        let query = self
            .builder()
            .select(&table, spec, &tenant, &joins, &restrictions)?;
        let rows = self.exec.fetch_all(txn, &query).await?;
        Ok(rows
            .into_iter()
            .map(|row| self.instance_from_row(meta, row))
            .collect())
    }

    /// Vector half of a hybrid query: embed each term, search, intersect
    /// across terms preserving rank, then drop paths the caller may not
    /// read. Adapter failures degrade to an empty hit set with a warning.
    async fn vector_hits(
        &self,
        ctx: &DbContext,
        meta: &EntityMeta,
        tenant: &str,
        terms: &[(String, String)],
        limit: usize,
    ) -> Vec<String> {
        let Some(index) = self.vector_index_for(meta) else {
            return Vec::new();
        };
        if !index.is_supported() {
            return Vec::new();
        }
        let Some(embedder) = self.embedder_for(meta) else {
            return Vec::new();
        };
        let mut merged: Option<Vec<String>> = None;
        for (_, text) in terms {
            let embedding = match embed_chunked(embedder.as_ref(), &self.chunker, text).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "vector query embedding failed");
                    return Vec::new();
                }
            };
            let hits = match index.search(&embedding, tenant, limit).await {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(error = %e, "vector search failed");
                    return Vec::new();
                }
            };
            let ids: Vec<String> = hits.into_iter().map(|h| h.id).collect();
            merged = Some(match merged {
                None => ids,
                Some(prev) => prev.into_iter().filter(|p| ids.contains(p)).collect(),
            });
        }
        let paths = merged.unwrap_or_default();
        let txn = self.txn_id().await;
        match self
            .gate
            .filter_readable_paths(&self.exec, txn.as_deref(), ctx, &meta.fq_name(), paths)
            .await
        {
            Ok(paths) => paths,
            Err(e) => {
                warn!(error = %e, "owner filtering of vector hits failed");
                Vec::new()
            }
        }
    }

    async fn require_row(&self, txn: Option<&str>, row_path: &str, tenant: &str) -> Result<()> {
        let fq = path::leaf_entity(row_path)?;
        if self.catalog.lookup_entity(&fq).is_none() {
            return Err(StoreError::ForeignConstraint(format!(
                "unknown endpoint entity for {row_path}"
            )));
        }
        let table = self.catalog.table_for_fq(&fq)?;
        let query = self
            .builder()
            .select_by_paths(&table, &[row_path.to_string()], tenant);
        if self.exec.fetch_optional(txn, &query).await?.is_none() {
            return Err(StoreError::ForeignConstraint(format!(
                "no row at {row_path}"
            )));
        }
        Ok(())
    }

    async fn create_between_instance(&self, ctx: &DbContext, inst: &Instance) -> Result<Instance> {
        let fq = inst.fq_name();
        let rel = self
            .catalog
            .relationship(&fq)
            .ok_or_else(|| StoreError::NotFound(format!("relationship {fq}")))?
            .clone();
        let table = self.catalog.table_for_fq(&fq)?;
        let txn = self.txn_id().await;
        let txn = txn.as_deref();
        let tenant = self.gate.tenant_id(&self.exec, txn, ctx).await?;
        self.gate
            .ensure_permitted(&self.exec, txn, ctx, CrudOp::Create, &fq, None, None)
            .await?;

        let endpoint = |alias: &str| -> Result<String> {
            inst.attr_str(alias)
                .map(str::to_string)
                .ok_or_else(|| {
                    StoreError::InvalidInput(format!("between instance missing endpoint {alias}"))
                })
        };
        let a1 = endpoint(&rel.from_alias)?;
        let a2 = endpoint(&rel.to_alias)?;
        self.require_row(txn, &a1, &tenant).await?;
        self.require_row(txn, &a2, &tenant).await?;

        let link_path = path::root_path(&rel.module, &rel.name, &path::generate_id());
        let from_col = sanitize_identifier(&rel.from_alias);
        let to_col = sanitize_identifier(&rel.to_alias);
        let query = self.builder().insert(
            &table,
            &[
                (PATH_ATTR.to_string(), SqlParam::text(&link_path)),
                (TENANT_ATTR.to_string(), SqlParam::text(&tenant)),
                (DELETED_ATTR.to_string(), SqlParam::Bool(false)),
                (from_col.clone(), SqlParam::text(&a1)),
                (to_col.clone(), SqlParam::text(&a2)),
            ],
        );
        self.exec.execute(txn, &query).await?;
        info!(relationship = %fq, path = %link_path, "link row created");

        Ok(Instance::new(&rel.module, &rel.name).with_attrs(AttrMap::from([
            (PATH_ATTR.to_string(), Value::String(link_path)),
            (TENANT_ATTR.to_string(), Value::String(tenant)),
            (from_col, Value::String(a1)),
            (to_col, Value::String(a2)),
        ])))
    }

    /// Shared row-shaping for create and upsert.
    fn row_columns(
        &self,
        attrs: &AttrMap,
        row_path: &str,
        tenant: &str,
        parent: Option<&str>,
    ) -> Vec<(String, SqlParam)> {
        let mut columns: Vec<(String, SqlParam)> = vec![
            (PATH_ATTR.to_string(), SqlParam::text(row_path)),
            (TENANT_ATTR.to_string(), SqlParam::text(tenant)),
            (DELETED_ATTR.to_string(), SqlParam::Bool(false)),
        ];
        if let Some(parent) = parent {
            columns.push((PARENT_ATTR.to_string(), SqlParam::text(parent)));
        }
        for (name, value) in attrs {
            if is_reserved(name) {
                continue;
            }
            columns.push((sanitize_identifier(name), SqlParam::from_json(value)));
        }
        columns
    }

    async fn write_instance(&self, ctx: &DbContext, inst: &Instance, upsert: bool) -> Result<Instance> {
        let fq = inst.fq_name();
        if self.catalog.is_between(&fq) {
            return self.create_between_instance(ctx, inst).await;
        }
        let meta = self.catalog.entity(&fq)?.clone();
        let table = self.table_for(&meta);
        let txn = self.txn_id().await;
        let txn = txn.as_deref();
        let tenant = self.gate.tenant_id(&self.exec, txn, ctx).await?;

        let parent = inst.attr_str(PARENT_ATTR).map(str::to_string);
        self.gate
            .ensure_permitted(
                &self.exec,
                txn,
                ctx,
                CrudOp::Create,
                &fq,
                None,
                parent.as_deref(),
            )
            .await?;

        let mut attrs = inst.attributes_with_stringified_objects();
        let id = match meta.id_attribute() {
            Some(attr) => match attrs.get(&attr.name) {
                Some(value) => id_string(value),
                None => path::generate_id(),
            },
            None => path::generate_id(),
        };
        let row_path = path::allocate(&meta.module, &meta.name, &id, parent.as_deref());

        // one-to-one counterpart columns must exist before insert
        for rel in self.catalog.one_to_one_relationships_for(&fq) {
            attrs
                .entry(rel.pointer_column())
                .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        }

        let columns = self.row_columns(&attrs, &row_path, &tenant, parent.as_deref());
        let query = if upsert {
            self.builder()
                .upsert(&table, &columns, &[PATH_ATTR, TENANT_ATTR])
        } else {
            self.builder().insert(&table, &columns)
        };
        self.exec.execute(txn, &query).await?;

        if !upsert && !ctx.kernel_mode {
            self.gate
                .grant_owner(&self.exec, txn, &table, &row_path, &ctx.user_id, &tenant)
                .await?;
        }

        self.index_embedding(&meta, &row_path, &tenant, &attrs).await;
        info!(entity = %fq, path = %row_path, upsert, "instance written");

        attrs.insert(PATH_ATTR.to_string(), Value::String(row_path));
        attrs.insert(TENANT_ATTR.to_string(), Value::String(tenant));
        Ok(Instance::new(&meta.module, &meta.name).with_attrs(attrs))
    }
}

fn is_reserved(name: &str) -> bool {
    matches!(name, PATH_ATTR | TENANT_ATTR | DELETED_ATTR | PARENT_ATTR)
}

fn id_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn normalize_value(ty: AttrType, value: Value) -> Value {
    match (ty, value) {
        (AttrType::Boolean, Value::Number(n)) => Value::Bool(n.as_i64().unwrap_or(0) != 0),
        (AttrType::Json, Value::String(s)) => {
            serde_json::from_str(&s).unwrap_or(Value::String(s))
        }
        (_, v) => v,
    }
}

#[async_trait]
impl EntityResolver for SqlResolver {
    async fn create_instance(&self, ctx: &DbContext, inst: &Instance) -> Result<Instance> {
        self.write_instance(ctx, inst, false).await
    }

    async fn upsert_instance(&self, ctx: &DbContext, inst: &Instance) -> Result<Instance> {
        self.write_instance(ctx, inst, true).await
    }

    async fn update_instance(
        &self,
        ctx: &DbContext,
        inst: &Instance,
        new_attrs: AttrMap,
    ) -> Result<Instance> {
        let fq = inst.fq_name();
        let meta = self.catalog.entity(&fq)?.clone();
        let table = self.table_for(&meta);
        let row_path = inst
            .path()
            .ok_or_else(|| StoreError::InvalidInput("update requires a path".to_string()))?
            .to_string();
        let txn = self.txn_id().await;
        let txn = txn.as_deref();
        let tenant = self.gate.tenant_id(&self.exec, txn, ctx).await?;
        self.gate
            .ensure_permitted(
                &self.exec,
                txn,
                ctx,
                CrudOp::Update,
                &fq,
                Some(&row_path),
                None,
            )
            .await?;

        let overlay = Instance::new(&meta.module, &meta.name)
            .with_attrs(new_attrs.clone())
            .attributes_with_stringified_objects();
        let sets: Vec<(String, SqlParam)> = overlay
            .iter()
            .filter(|(name, _)| !is_reserved(name))
            .map(|(name, value)| (sanitize_identifier(name), SqlParam::from_json(value)))
            .collect();
        let merged = inst.merge_attributes(new_attrs);
        if sets.is_empty() {
            return Ok(merged);
        }
        let query = self
            .builder()
            .update_by_path(&table, &sets, &row_path, &tenant);
        if self.exec.execute(txn, &query).await? == 0 {
            return Err(StoreError::NotFound(row_path));
        }

        if meta.has_fts() {
            self.index_embedding(&meta, &row_path, &tenant, &merged.attributes)
                .await;
        }
        debug!(entity = %fq, path = %row_path, "instance updated");
        Ok(merged)
    }

    async fn query_instances(
        &self,
        ctx: &DbContext,
        inst: &Instance,
        query_all: bool,
        distinct: bool,
    ) -> Result<Vec<Instance>> {
        let fq = inst.fq_name();
        let meta = self.catalog.entity(&fq)?.clone();
        let mut spec = QuerySpec::from_instance(inst);
        if distinct {
            spec.distinct = true;
        }
        if query_all {
            spec.query_ops.clear();
            spec.query_vals.clear();
        }

        // attributes queried with a trailing `?` go through the vector index
        let vector_keys: Vec<String> = spec
            .query_ops
            .keys()
            .filter(|k| k.ends_with('?'))
            .cloned()
            .collect();
        let mut terms = Vec::new();
        for key in vector_keys {
            spec.query_ops.remove(&key);
            if let Some(Value::String(text)) = spec.query_vals.remove(&key) {
                terms.push((key.trim_end_matches('?').to_string(), text));
            }
        }

        let hits = if !terms.is_empty() && meta.has_fts() {
            let txn = self.txn_id().await;
            let tenant = self.gate.tenant_id(&self.exec, txn.as_deref(), ctx).await?;
            let limit = spec.limit.map(|l| l as usize).unwrap_or(HYBRID_LIMIT);
            Some(self.vector_hits(ctx, &meta, &tenant, &terms, limit).await)
        } else {
            None
        };

        let mut instances = self.select_instances(ctx, &meta, &spec, Vec::new()).await?;

        if let Some(hits) = hits {
            let rank: HashMap<&str, usize> = hits
                .iter()
                .enumerate()
                .map(|(i, p)| (p.as_str(), i))
                .collect();
            instances.retain(|i| i.path().map_or(false, |p| rank.contains_key(p)));
            instances.sort_by_key(|i| rank[i.path().unwrap_or_default()]);
        }
        Ok(instances)
    }

    async fn query_child_instances(
        &self,
        ctx: &DbContext,
        parent_path: &str,
        inst: &Instance,
    ) -> Result<Vec<Instance>> {
        let meta = self.catalog.entity(&inst.fq_name())?.clone();
        let mut spec = QuerySpec::from_instance(inst);
        spec.where_clauses.push(WhereClause {
            column: PATH_ATTR.to_string(),
            op: QueryOp::Like,
            value: Value::String(format!("{parent_path}/%")),
        });
        self.select_instances(ctx, &meta, &spec, Vec::new()).await
    }

    async fn query_connected_instances(
        &self,
        ctx: &DbContext,
        relationship: &str,
        connected: &Instance,
        target: &Instance,
    ) -> Result<Vec<Instance>> {
        let rel = self
            .catalog
            .relationship(relationship)
            .ok_or_else(|| StoreError::NotFound(format!("relationship {relationship}")))?
            .clone();
        let target_fq = target.fq_name();
        let meta = self.catalog.entity(&target_fq)?.clone();
        let target_table = self.table_for(&meta);
        let connected_path = connected
            .path()
            .ok_or_else(|| {
                StoreError::InvalidInput("connected instance requires a path".to_string())
            })?
            .to_string();
        let mut spec = QuerySpec::from_instance(target);

        let joins = match rel.kind {
            RelationshipKind::OneToOne => {
                let connected_table = self.catalog.table_for_fq(&connected.fq_name())?;
                let alias = if connected_table == target_table {
                    format!("{connected_table}_2")
                } else {
                    connected_table.clone()
                };
                vec![JoinClause::inner(
                    connected_table,
                    alias.clone(),
                    OnExpr::And(vec![
                        OnExpr::ColCol {
                            lhs: ColRef::new(&alias, rel.pointer_column()),
                            op: "=",
                            rhs: ColRef::new(&target_table, PATH_ATTR),
                        },
                        OnExpr::ColParam {
                            lhs: ColRef::new(&alias, PATH_ATTR),
                            op: "=",
                            param: SqlParam::text(&connected_path),
                        },
                    ]),
                )]
            }
            RelationshipKind::Between => {
                let link_table = self.catalog.table_for_fq(&rel.fq_name())?;
                let from_col = sanitize_identifier(&rel.from_alias);
                let to_col = sanitize_identifier(&rel.to_alias);
                vec![JoinClause::inner(
                    link_table.clone(),
                    link_table.clone(),
                    OnExpr::Or(vec![
                        OnExpr::And(vec![
                            OnExpr::ColParam {
                                lhs: ColRef::new(&link_table, &from_col),
                                op: "=",
                                param: SqlParam::text(&connected_path),
                            },
                            OnExpr::ColCol {
                                lhs: ColRef::new(&target_table, PATH_ATTR),
                                op: "=",
                                rhs: ColRef::new(&link_table, &to_col),
                            },
                        ]),
                        OnExpr::And(vec![
                            OnExpr::ColParam {
                                lhs: ColRef::new(&link_table, &to_col),
                                op: "=",
                                param: SqlParam::text(&connected_path),
                            },
                            OnExpr::ColCol {
                                lhs: ColRef::new(&target_table, PATH_ATTR),
                                op: "=",
                                rhs: ColRef::new(&link_table, &from_col),
                            },
                        ]),
                    ]),
                )]
            }
            RelationshipKind::Contains => {
                if rel.from != connected.fq_name() || rel.to != target_fq {
                    return Err(StoreError::Unsupported(format!(
                        "{relationship} cannot list {target_fq} from {}",
                        connected.fq_name()
                    )));
                }
                spec.where_clauses.push(WhereClause {
                    column: PARENT_ATTR.to_string(),
                    op: QueryOp::Eq,
                    value: Value::String(connected_path.clone()),
                });
                Vec::new()
            }
        };
        self.select_instances(ctx, &meta, &spec, joins).await
    }

    async fn query_by_join(&self, ctx: &DbContext, query: &JoinQuery) -> Result<Vec<Row>> {
        if query.into_spec.is_empty() {
            return Err(StoreError::MissingProjection);
        }
        let fq = query.instance.fq_name();
        let meta = self.catalog.entity(&fq)?.clone();
        let table = self.table_for(&meta);
        let txn = self.txn_id().await;
        let txn = txn.as_deref();
        let tenant = self.gate.tenant_id(&self.exec, txn, ctx).await?;

        let mut spec = QuerySpec::from_instance(&query.instance);
        spec.into_spec = query.into_spec.clone();
        spec.where_clauses.extend(query.where_clauses.clone());
        if query.distinct {
            spec.distinct = true;
        }

        let builder = self.builder();
        let mut joins = Vec::new();
        if let Some(info) = &query.join_info {
            joins.extend(builder.plan_joins(&fq, &table, info)?);
        }
        for raw in &query.raw_joins {
            joins.push(builder.raw_join(&fq, &table, raw)?);
        }
        let mut restrictions = Vec::new();
        if let Some(restriction) = self
            .gate
            .read_restriction(&self.exec, txn, ctx, &fq, &table, &tenant, ReadIntent::Plain)
            .await?
        {
            restrictions.push(restriction);
        }
        let sql_query = builder.select(&table, &spec, &tenant, &joins, &restrictions)?;
        self.exec.fetch_all(txn, &sql_query).await
    }

    async fn delete_instance(
        &self,
        ctx: &DbContext,
        inst: &Instance,
        purge: bool,
    ) -> Result<Instance> {
        let fq = inst.fq_name();
        let row_path = inst
            .path()
            .ok_or_else(|| StoreError::InvalidInput("delete requires a path".to_string()))?
            .to_string();
        let txn = self.txn_id().await;
        let txn = txn.as_deref();
        let tenant = self.gate.tenant_id(&self.exec, txn, ctx).await?;

        // between rows are purged, never soft-deleted
        if self.catalog.is_between(&fq) {
            self.gate
                .ensure_permitted(&self.exec, txn, ctx, CrudOp::Delete, &fq, None, None)
                .await?;
            let table = self.catalog.table_for_fq(&fq)?;
            let query = self.builder().hard_delete(&table, &row_path, &tenant);
            if self.exec.execute(txn, &query).await? == 0 {
                return Err(StoreError::NotFound(row_path));
            }
            return Ok(inst.clone());
        }

        let meta = self.catalog.entity(&fq)?.clone();
        let table = self.table_for(&meta);
        self.gate
            .ensure_permitted(
                &self.exec,
                txn,
                ctx,
                CrudOp::Delete,
                &fq,
                Some(&row_path),
                None,
            )
            .await?;

        // vector entry goes first so a purge can never leave it dangling
        self.drop_embedding(&meta, &row_path).await;

        let query = if purge {
            self.builder().hard_delete(&table, &row_path, &tenant)
        } else {
            self.builder().soft_delete(&table, &row_path, &tenant)
        };
        if self.exec.execute(txn, &query).await? == 0 {
            return Err(StoreError::NotFound(row_path));
        }
        if purge {
            self.gate
                .revoke_all(&self.exec, txn, &table, &row_path, &tenant)
                .await?;
        }
        info!(entity = %fq, path = %row_path, purge, "instance deleted");
        Ok(inst.clone())
    }

    async fn link_instances(&self, ctx: &DbContext, req: &LinkRequest) -> Result<Instance> {
        let rel = self
            .catalog
            .relationship(&req.relationship)
            .ok_or_else(|| StoreError::NotFound(format!("relationship {}", req.relationship)))?
            .clone();
        let path1 = req
            .node1
            .path()
            .ok_or_else(|| StoreError::InvalidInput("link endpoints require paths".to_string()))?
            .to_string();
        let path2 = req
            .node2
            .path()
            .ok_or_else(|| StoreError::InvalidInput("link endpoints require paths".to_string()))?
            .to_string();
        let txn = self.txn_id().await;
        let txn = txn.as_deref();
        let tenant = self.gate.tenant_id(&self.exec, txn, ctx).await?;

        match rel.kind {
            RelationshipKind::OneToOne => {
                for (node, node_path) in [(&req.node1, &path1), (&req.node2, &path2)] {
                    self.gate
                        .ensure_permitted(
                            &self.exec,
                            txn,
                            ctx,
                            CrudOp::Update,
                            &node.fq_name(),
                            Some(node_path),
                            None,
                        )
                        .await?;
                }
                let column = rel.pointer_column();
                // delete mode breaks both references with fresh placeholder
                // ids instead of nulls, so unique pointer indexes stay happy
                let (value1, value2) = if req.delete_mode {
                    (
                        Uuid::new_v4().to_string(),
                        Uuid::new_v4().to_string(),
                    )
                } else {
                    (path2.clone(), path1.clone())
                };
                for (node, node_path, value) in [
                    (&req.node1, &path1, &value1),
                    (&req.node2, &path2, &value2),
                ] {
                    let table = self.catalog.table_for_fq(&node.fq_name())?;
                    let query = self.builder().update_by_path(
                        &table,
                        &[(column.clone(), SqlParam::text(value.clone()))],
                        node_path,
                        &tenant,
                    );
                    if self.exec.execute(txn, &query).await? == 0 {
                        return Err(StoreError::NotFound(node_path.clone()));
                    }
                }
                Ok(req.node1.merge_attributes(AttrMap::from([(
                    column,
                    Value::String(value1),
                )])))
            }
            RelationshipKind::Between => {
                let fq = rel.fq_name();
                let table = self.catalog.table_for_fq(&fq)?;
                let from_col = sanitize_identifier(&rel.from_alias);
                let to_col = sanitize_identifier(&rel.to_alias);
                if req.or_update || req.delete_mode {
                    self.gate
                        .ensure_permitted(&self.exec, txn, ctx, CrudOp::Delete, &fq, None, None)
                        .await?;
                    let query = self.builder().delete_between_links(
                        &table, &from_col, &to_col, &path1, &path2, &tenant,
                    );
                    self.exec.execute(txn, &query).await?;
                }
                if req.delete_mode {
                    return Ok(req.node1.clone());
                }
                self.gate
                    .ensure_permitted(&self.exec, txn, ctx, CrudOp::Create, &fq, None, None)
                    .await?;
                let link_path = path::root_path(&rel.module, &rel.name, &path::generate_id());
                let query = self.builder().insert(
                    &table,
                    &[
                        (PATH_ATTR.to_string(), SqlParam::text(&link_path)),
                        (TENANT_ATTR.to_string(), SqlParam::text(&tenant)),
                        (DELETED_ATTR.to_string(), SqlParam::Bool(false)),
                        (from_col.clone(), SqlParam::text(&path1)),
                        (to_col.clone(), SqlParam::text(&path2)),
                    ],
                );
                self.exec.execute(txn, &query).await?;
                info!(relationship = %fq, path = %link_path, "instances linked");
                Ok(Instance::new(&rel.module, &rel.name).with_attrs(AttrMap::from([
                    (PATH_ATTR.to_string(), Value::String(link_path)),
                    (TENANT_ATTR.to_string(), Value::String(tenant)),
                    (from_col, Value::String(path1)),
                    (to_col, Value::String(path2)),
                ])))
            }
            RelationshipKind::Contains => Err(StoreError::Unsupported(format!(
                "{} is a containment relationship; create the child under its parent instead",
                req.relationship
            ))),
        }
    }

    async fn full_text_search(&self, ctx: &DbContext, req: &SearchRequest) -> Result<Vec<String>> {
        let fq = format!("{}/{}", req.module, req.entity);
        let meta = self.catalog.entity(&fq)?.clone();
        let Some(index) = self.vector_index_for(&meta) else {
            return Ok(Vec::new());
        };
        if !index.is_supported() {
            return Ok(Vec::new());
        }
        let Some(embedder) = self.embedder_for(&meta) else {
            warn!(entity = %fq, "full-text search without an embedding provider");
            return Ok(Vec::new());
        };
        let txn = self.txn_id().await;
        let txn = txn.as_deref();
        let tenant = self.gate.tenant_id(&self.exec, txn, ctx).await?;
        let limit = req.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);

        let embedding = match embed_chunked(embedder.as_ref(), &self.chunker, &req.query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "search embedding failed");
                return Ok(Vec::new());
            }
        };
        let hits = match index.search(&embedding, &tenant, limit).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "vector search failed");
                return Ok(Vec::new());
            }
        };
        let paths: Vec<String> = hits.into_iter().map(|h| h.id).collect();
        self.gate
            .filter_readable_paths(&self.exec, txn, ctx, &fq, paths)
            .await
    }

    async fn start_transaction(&self, _ctx: &DbContext) -> Result<String> {
        let mut active = self.active_txn.lock().await;
        if active.is_some() {
            return Err(StoreError::TransactionAlreadyActive);
        }
        let id = self.exec.transactions().begin(self.exec.pool()).await?;
        *active = Some(id.clone());
        Ok(id)
    }

    async fn commit_transaction(&self, _ctx: &DbContext, txn_id: &str) -> Result<String> {
        let mut active = self.active_txn.lock().await;
        self.exec.transactions().commit(txn_id).await?;
        if active.as_deref() == Some(txn_id) {
            *active = None;
        }
        Ok(txn_id.to_string())
    }

    async fn rollback_transaction(&self, _ctx: &DbContext, txn_id: &str) -> Result<String> {
        let mut active = self.active_txn.lock().await;
        self.exec.transactions().rollback(txn_id).await?;
        if active.as_deref() == Some(txn_id) {
            *active = None;
        }
        Ok(txn_id.to_string())
    }
}
