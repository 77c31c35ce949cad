//! Per-row RBAC: global role checks plus ownership-table joins.
//!
//! An entity with no declared RBAC spec is unguarded - tenant scoping still
//! applies, but no permission check runs. For guarded entities the gate
//! first consults the global role/permission tables, then climbs the path:
//! a container's owner is granted the operation on every descendant.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use agentstore_core::catalog::{owners_table, split_fq};
use agentstore_core::{
    path, CrudFlags, DbContext, RelationshipKind, Result, SchemaCatalog, StoreError, PATH_ATTR,
    TENANT_ATTR,
};

use crate::backend::StoreKind;
use crate::builder::{ColRef, OnExpr, SqlBuilder, SqlQuery};
use crate::executor::Executor;
use crate::value::SqlParam;

/// Global role-assignment table: one row per (user, role) per tenant.
pub const ASSIGNMENTS_TABLE: &str = "rbac_role_assignments";
/// Global permission table: per-role CRUD flags on a resource fq or a
/// module wildcard (`Module/*`, `*`).
pub const PERMISSIONS_TABLE: &str = "rbac_permissions";

/// Tenant used when the caller supplies none and no role assignment names
/// one.
pub const DEFAULT_TENANT: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrudOp {
    Create,
    Read,
    Update,
    Delete,
}

impl CrudOp {
    pub fn flag_column(self) -> &'static str {
        match self {
            Self::Create => "c",
            Self::Read => "r",
            Self::Update => "u",
            Self::Delete => "d",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// What a read is about to be used for; update- and delete-intent reads
/// demand the matching owner flag on top of `r`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadIntent {
    Plain,
    ForUpdate,
    ForDelete,
}

/// The gate itself. Stateless besides the catalog; every check runs on the
/// caller's executor so in-transaction grants are visible immediately.
#[derive(Clone)]
pub struct AuthGate {
    catalog: Arc<SchemaCatalog>,
}

impl AuthGate {
    pub fn new(catalog: Arc<SchemaCatalog>) -> Self {
        Self { catalog }
    }

    fn kind(&self, exec: &Executor) -> StoreKind {
        exec.kind()
    }

    /// Resolve the caller's tenant: explicit on the context, else looked up
    /// from the role-assignment table (and cached on the context), else the
    /// default tenant.
    pub async fn tenant_id(
        &self,
        exec: &Executor,
        txn: Option<&str>,
        ctx: &DbContext,
    ) -> Result<String> {
        if let Some(tenant) = ctx.tenant() {
            return Ok(tenant.to_string());
        }
        let kind = self.kind(exec);
        let sql = format!(
            "SELECT {tenant} AS tenant FROM {table} WHERE {user} = {p1} LIMIT 1",
            tenant = kind.quote(TENANT_ATTR),
            table = kind.quote(ASSIGNMENTS_TABLE),
            user = kind.quote("user_id"),
            p1 = kind.placeholder(1),
        );
        let query = SqlQuery {
            sql,
            params: vec![SqlParam::text(&ctx.user_id)],
        };
        let tenant = exec
            .fetch_optional(txn, &query)
            .await?
            .and_then(|row| row.get("tenant").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| DEFAULT_TENANT.to_string());
        Ok(ctx.cache_tenant(tenant).to_string())
    }

    /// Gate a write-shaped operation. `self_path` identifies the row being
    /// touched (update/delete); `parent_path` anchors creates of contained
    /// children. Either grants through ownership when the global check
    /// denies.
    pub async fn ensure_permitted(
        &self,
        exec: &Executor,
        txn: Option<&str>,
        ctx: &DbContext,
        op: CrudOp,
        entity_fq: &str,
        self_path: Option<&str>,
        parent_path: Option<&str>,
    ) -> Result<()> {
        if !ctx.requires_auth() {
            return Ok(());
        }
        if self.catalog.rbac_rules_for(entity_fq).is_empty() {
            return Ok(());
        }
        if self.has_global(exec, txn, ctx, op, entity_fq).await? {
            return Ok(());
        }
        if let Some(own) = self_path {
            if self
                .owner_grant(exec, txn, ctx, entity_fq, own, op, false)
                .await?
            {
                return Ok(());
            }
            if self.ancestor_grant(exec, txn, ctx, own, op).await? {
                return Ok(());
            }
        }
        if let Some(parent) = parent_path {
            let parent_fq = path::leaf_entity(parent)?;
            if self
                .owner_grant(exec, txn, ctx, &parent_fq, parent, op, true)
                .await?
            {
                return Ok(());
            }
            if self.ancestor_grant(exec, txn, ctx, parent, op).await? {
                return Ok(());
            }
        }
        debug!(user = %ctx.user_id, op = op.name(), entity = entity_fq, "permission denied");
        Err(StoreError::unauthorized(op.name(), entity_fq))
    }

    /// Global role check: any of the user's roles carries the op flag on
    /// the exact resource, its module wildcard, or the global wildcard.
    pub async fn has_global(
        &self,
        exec: &Executor,
        txn: Option<&str>,
        ctx: &DbContext,
        op: CrudOp,
        entity_fq: &str,
    ) -> Result<bool> {
        let kind = self.kind(exec);
        let (module, _) = split_fq(entity_fq)?;
        let sql = format!(
            "SELECT COUNT(*) AS cnt FROM {ra} INNER JOIN {p} ON {p_role} = {ra_role} \
             WHERE {ra_user} = {p1} AND ({p_res} = {p2} OR {p_res} = {p3} OR {p_res} = {p4}) \
             AND {flag} = TRUE",
            ra = kind.quote(ASSIGNMENTS_TABLE),
            p = kind.quote(PERMISSIONS_TABLE),
            p_role = kind.qualify(PERMISSIONS_TABLE, "role"),
            ra_role = kind.qualify(ASSIGNMENTS_TABLE, "role"),
            ra_user = kind.qualify(ASSIGNMENTS_TABLE, "user_id"),
            p_res = kind.qualify(PERMISSIONS_TABLE, "resource"),
            flag = kind.qualify(PERMISSIONS_TABLE, op.flag_column()),
            p1 = kind.placeholder(1),
            p2 = kind.placeholder(2),
            p3 = kind.placeholder(3),
            p4 = kind.placeholder(4),
        );
        let query = SqlQuery {
            sql,
            params: vec![
                SqlParam::text(&ctx.user_id),
                SqlParam::text(entity_fq),
                SqlParam::text(format!("{module}/*")),
                SqlParam::text("*"),
            ],
        };
        Ok(self.count(exec, txn, &query).await? > 0)
    }

    /// Direct grant on one path in the entity's owners table. When
    /// `require_owner_type` only rows with `type = 'o'` count.
    async fn owner_grant(
        &self,
        exec: &Executor,
        txn: Option<&str>,
        ctx: &DbContext,
        entity_fq: &str,
        row_path: &str,
        op: CrudOp,
        require_owner_type: bool,
    ) -> Result<bool> {
        if self.catalog.lookup_entity(entity_fq).is_none() {
            return Ok(false);
        }
        let kind = self.kind(exec);
        let table = owners_table(&self.catalog.table_for_fq(entity_fq)?);
        let mut sql = format!(
            "SELECT COUNT(*) AS cnt FROM {t} WHERE {path} = {p1} AND {user} = {p2} AND {flag} = TRUE",
            t = kind.quote(&table),
            path = kind.quote("path"),
            user = kind.quote("user_id"),
            flag = kind.quote(op.flag_column()),
            p1 = kind.placeholder(1),
            p2 = kind.placeholder(2),
        );
        let mut params = vec![SqlParam::text(row_path), SqlParam::text(&ctx.user_id)];
        if require_owner_type {
            sql.push_str(&format!(
                " AND {ty} = {p3}",
                ty = kind.quote("type"),
                p3 = kind.placeholder(3)
            ));
            params.push(SqlParam::text("o"));
        }
        Ok(self.count(exec, txn, &SqlQuery { sql, params }).await? > 0)
    }

    /// Climb the containment chain: any ancestor owned (`type='o'`) with
    /// the op flag grants the operation on descendants.
    async fn ancestor_grant(
        &self,
        exec: &Executor,
        txn: Option<&str>,
        ctx: &DbContext,
        row_path: &str,
        op: CrudOp,
    ) -> Result<bool> {
        for (ancestor_fq, ancestor_path) in path::ancestors(row_path)? {
            if self
                .owner_grant(exec, txn, ctx, &ancestor_fq, &ancestor_path, op, true)
                .await?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Entity types that can (transitively) contain `entity_fq`, per the
    /// declared contains relationships.
    fn container_ancestors(&self, entity_fq: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut frontier = vec![entity_fq.to_string()];
        while let Some(current) = frontier.pop() {
            for rel in self.catalog.relationships_for(&current) {
                if rel.kind == RelationshipKind::Contains && rel.to == current {
                    let parent = rel.from.clone();
                    if parent != entity_fq && !out.contains(&parent) {
                        out.push(parent.clone());
                        frontier.push(parent);
                    }
                }
            }
        }
        out
    }

    fn owner_flag_conds(
        &self,
        alias: &str,
        ctx: &DbContext,
        tenant: &str,
        intent: ReadIntent,
    ) -> Vec<OnExpr> {
        let mut conds = vec![
            OnExpr::ColParam {
                lhs: ColRef::new(alias, "user_id"),
                op: "=",
                param: SqlParam::text(&ctx.user_id),
            },
            OnExpr::ColParam {
                lhs: ColRef::new(alias, "r"),
                op: "=",
                param: SqlParam::Bool(true),
            },
            OnExpr::ColParam {
                lhs: ColRef::new(alias, TENANT_ATTR),
                op: "=",
                param: SqlParam::text(tenant),
            },
        ];
        match intent {
            ReadIntent::Plain => {}
            ReadIntent::ForUpdate => conds.push(OnExpr::ColParam {
                lhs: ColRef::new(alias, "u"),
                op: "=",
                param: SqlParam::Bool(true),
            }),
            ReadIntent::ForDelete => conds.push(OnExpr::ColParam {
                lhs: ColRef::new(alias, "d"),
                op: "=",
                param: SqlParam::Bool(true),
            }),
        }
        conds
    }

    /// For reads by callers without a global read grant: a restriction
    /// condition constraining the result set to rows the user owns - an
    /// owners row on the row's own path, or an owner (`type='o'`) grant on
    /// any containment ancestor.
    pub async fn read_restriction(
        &self,
        exec: &Executor,
        txn: Option<&str>,
        ctx: &DbContext,
        entity_fq: &str,
        root_table: &str,
        tenant: &str,
        intent: ReadIntent,
    ) -> Result<Option<OnExpr>> {
        if !ctx.requires_auth() || self.catalog.rbac_rules_for(entity_fq).is_empty() {
            return Ok(None);
        }
        if self
            .has_global(exec, txn, ctx, CrudOp::Read, entity_fq)
            .await?
        {
            return Ok(None);
        }

        let own = owners_table(root_table);
        let own_alias = format!("{own}_g");
        let mut own_conds = vec![OnExpr::ColCol {
            lhs: ColRef::new(&own_alias, "path"),
            op: "=",
            rhs: ColRef::new(root_table, PATH_ATTR),
        }];
        own_conds.extend(self.owner_flag_conds(&own_alias, ctx, tenant, intent));
        let mut branches = vec![OnExpr::Exists {
            table: own,
            alias: own_alias,
            conds: own_conds,
        }];

        for ancestor_fq in self.container_ancestors(entity_fq) {
            let table = owners_table(&self.catalog.table_for_fq(&ancestor_fq)?);
            let alias = format!("{table}_g");
            let mut conds = vec![
                OnExpr::DescendantOf {
                    row: ColRef::new(root_table, PATH_ATTR),
                    ancestor: ColRef::new(&alias, "path"),
                },
                OnExpr::ColParam {
                    lhs: ColRef::new(&alias, "type"),
                    op: "=",
                    param: SqlParam::text("o"),
                },
            ];
            conds.extend(self.owner_flag_conds(&alias, ctx, tenant, intent));
            branches.push(OnExpr::Exists {
                table,
                alias,
                conds,
            });
        }
        Ok(Some(OnExpr::Or(branches)))
    }

    /// Restrict a set of candidate paths to those the caller may read:
    /// direct owners-row grant or ancestral ownership. Used to filter
    /// vector-search hits for guarded entities.
    pub async fn filter_readable_paths(
        &self,
        exec: &Executor,
        txn: Option<&str>,
        ctx: &DbContext,
        entity_fq: &str,
        paths: Vec<String>,
    ) -> Result<Vec<String>> {
        if paths.is_empty()
            || !ctx.requires_auth()
            || self.catalog.rbac_rules_for(entity_fq).is_empty()
            || self
                .has_global(exec, txn, ctx, CrudOp::Read, entity_fq)
                .await?
        {
            return Ok(paths);
        }
        let mut readable = Vec::with_capacity(paths.len());
        for candidate in paths {
            if self
                .owner_grant(exec, txn, ctx, entity_fq, &candidate, CrudOp::Read, false)
                .await?
                || self
                    .ancestor_grant(exec, txn, ctx, &candidate, CrudOp::Read)
                    .await?
            {
                readable.push(candidate);
            }
        }
        Ok(readable)
    }

    // ── grants and seeding ────────────────────────────────────

    /// Owner row written after a successful create: full CRUD for the
    /// creator on the new path.
    pub async fn grant_owner(
        &self,
        exec: &Executor,
        txn: Option<&str>,
        root_table: &str,
        row_path: &str,
        user_id: &str,
        tenant: &str,
    ) -> Result<()> {
        let builder = SqlBuilder::new(&self.catalog, exec.kind());
        let query = builder.insert(
            &owners_table(root_table),
            &[
                ("id".to_string(), SqlParam::text(Uuid::new_v4().to_string())),
                ("path".to_string(), SqlParam::text(row_path)),
                ("user_id".to_string(), SqlParam::text(user_id)),
                ("type".to_string(), SqlParam::text("o")),
                ("c".to_string(), SqlParam::Bool(true)),
                ("r".to_string(), SqlParam::Bool(true)),
                ("u".to_string(), SqlParam::Bool(true)),
                ("d".to_string(), SqlParam::Bool(true)),
                (TENANT_ATTR.to_string(), SqlParam::text(tenant)),
            ],
        );
        exec.execute(txn, &query).await?;
        Ok(())
    }

    /// Remove every owner row for a purged path.
    pub async fn revoke_all(
        &self,
        exec: &Executor,
        txn: Option<&str>,
        root_table: &str,
        row_path: &str,
        tenant: &str,
    ) -> Result<()> {
        let kind = exec.kind();
        let sql = format!(
            "DELETE FROM {t} WHERE {path} = {p1} AND {tenant} = {p2}",
            t = kind.quote(&owners_table(root_table)),
            path = kind.quote("path"),
            tenant = kind.quote(TENANT_ATTR),
            p1 = kind.placeholder(1),
            p2 = kind.placeholder(2),
        );
        exec.execute(
            txn,
            &SqlQuery {
                sql,
                params: vec![SqlParam::text(row_path), SqlParam::text(tenant)],
            },
        )
        .await?;
        Ok(())
    }

    pub async fn assign_role(
        &self,
        exec: &Executor,
        txn: Option<&str>,
        user_id: &str,
        role: &str,
        tenant: &str,
    ) -> Result<()> {
        let builder = SqlBuilder::new(&self.catalog, exec.kind());
        let query = builder.insert(
            ASSIGNMENTS_TABLE,
            &[
                ("user_id".to_string(), SqlParam::text(user_id)),
                ("role".to_string(), SqlParam::text(role)),
                (TENANT_ATTR.to_string(), SqlParam::text(tenant)),
            ],
        );
        exec.execute(txn, &query).await?;
        Ok(())
    }

    pub async fn grant_permission(
        &self,
        exec: &Executor,
        txn: Option<&str>,
        role: &str,
        resource: &str,
        allow: CrudFlags,
    ) -> Result<()> {
        let builder = SqlBuilder::new(&self.catalog, exec.kind());
        let query = builder.insert(
            PERMISSIONS_TABLE,
            &[
                ("role".to_string(), SqlParam::text(role)),
                ("resource".to_string(), SqlParam::text(resource)),
                ("c".to_string(), SqlParam::Bool(allow.c)),
                ("r".to_string(), SqlParam::Bool(allow.r)),
                ("u".to_string(), SqlParam::Bool(allow.u)),
                ("d".to_string(), SqlParam::Bool(allow.d)),
            ],
        );
        exec.execute(txn, &query).await?;
        Ok(())
    }

    /// Write the catalog's declared RBAC specs into the permission table.
    /// Run by kernel-mode schema load.
    pub async fn seed_rbac(&self, exec: &Executor, txn: Option<&str>) -> Result<()> {
        let entities: Vec<String> = self
            .catalog
            .entities()
            .map(|e| e.fq_name())
            .chain(self.catalog.relationships().map(|r| r.fq_name()))
            .collect();
        for fq in entities {
            for spec in self.catalog.rbac_rules_for(&fq) {
                for role in &spec.roles {
                    self.grant_permission(exec, txn, role, &fq, spec.allow)
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn count(&self, exec: &Executor, txn: Option<&str>, query: &SqlQuery) -> Result<i64> {
        let row = exec.fetch_optional(txn, query).await?;
        Ok(row
            .and_then(|r| r.get("cnt").and_then(Value::as_i64))
            .unwrap_or(0))
    }
}
