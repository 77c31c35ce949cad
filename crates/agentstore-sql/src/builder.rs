//! Dialect-aware SQL emission from declarative query specs.
//!
//! The builder turns a [`QuerySpec`] plus planned join clauses into one
//! `SqlQuery { sql, params }` for the active backend, and emits the write
//! statements (insert/upsert/update/delete) the resolver needs. Every
//! top-level select carries the not-deleted and tenant guards; joined
//! tables carry the same pair on their own alias.

use std::collections::HashSet;

use serde_json::Value;

use agentstore_core::catalog::sanitize_identifier;
use agentstore_core::query::{JoinInfo, QueryOp, QuerySpec, RawJoinSpec};
use agentstore_core::{
    Result, SchemaCatalog, StoreError, DELETED_ATTR, PARENT_ATTR, PATH_ATTR, TENANT_ATTR,
};

use crate::backend::StoreKind;
use crate::value::SqlParam;

/// Finished statement: SQL text with positional placeholders plus the
/// parameters to bind, in order.
#[derive(Debug, Clone)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    fn sql(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
        }
    }
}

/// Qualified column reference inside a join condition.
#[derive(Debug, Clone)]
pub struct ColRef {
    pub table: String,
    pub column: String,
}

impl ColRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

/// Condition tree for joins and injected restrictions. Between joins OR
/// the two endpoint orientations so the join matches whichever endpoint
/// the caller supplied; the auth gate builds `Exists`/`DescendantOf`
/// conditions against owners tables.
#[derive(Debug, Clone)]
pub enum OnExpr {
    ColCol {
        lhs: ColRef,
        op: &'static str,
        rhs: ColRef,
    },
    ColParam {
        lhs: ColRef,
        op: &'static str,
        param: SqlParam,
    },
    /// `EXISTS (SELECT 1 FROM table AS alias WHERE conds…)`
    Exists {
        table: String,
        alias: String,
        conds: Vec<OnExpr>,
    },
    /// `row` lies strictly below `ancestor` in the containment hierarchy:
    /// a path-prefix match on the separator boundary.
    DescendantOf {
        row: ColRef,
        ancestor: ColRef,
    },
    And(Vec<OnExpr>),
    Or(Vec<OnExpr>),
}

/// One planned join against the root select. Every joined table carries
/// the same not-deleted/tenant guard pair as the root.
#[derive(Debug, Clone)]
pub struct JoinClause {
    pub kind: JoinKind,
    pub table: String,
    pub alias: String,
    pub on: OnExpr,
}

impl JoinClause {
    pub fn inner(table: impl Into<String>, alias: impl Into<String>, on: OnExpr) -> Self {
        Self {
            kind: JoinKind::Inner,
            table: table.into(),
            alias: alias.into(),
            on,
        }
    }
}

/// Incremental statement emitter tracking placeholder numbering.
struct Emitter {
    kind: StoreKind,
    sql: String,
    params: Vec<SqlParam>,
}

impl Emitter {
    fn new(kind: StoreKind) -> Self {
        Self {
            kind,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push(&mut self, fragment: &str) {
        self.sql.push_str(fragment);
    }

    fn push_param(&mut self, param: SqlParam) {
        self.params.push(param);
        let placeholder = self.kind.placeholder(self.params.len());
        self.sql.push_str(&placeholder);
    }

    fn finish(self) -> SqlQuery {
        SqlQuery {
            sql: self.sql,
            params: self.params,
        }
    }
}

/// Statement builder bound to a catalog and a dialect.
pub struct SqlBuilder<'a> {
    catalog: &'a SchemaCatalog,
    kind: StoreKind,
}

impl<'a> SqlBuilder<'a> {
    pub fn new(catalog: &'a SchemaCatalog, kind: StoreKind) -> Self {
        Self { catalog, kind }
    }

    fn q(&self, ident: &str) -> String {
        self.kind.quote(ident)
    }

    fn qq(&self, table: &str, column: &str) -> String {
        self.kind.qualify(table, column)
    }

    /// Resolve a caller-spelled column to a qualified reference: either
    /// `table.column` or a bare attribute of the default table.
    fn col_ref(&self, default_table: &str, name: &str) -> String {
        match name.split_once('.') {
            Some((table, column)) => {
                self.qq(&sanitize_identifier(table), &sanitize_identifier(column))
            }
            None => self.qq(default_table, &sanitize_identifier(name)),
        }
    }

    // ── reads ─────────────────────────────────────────────────

    /// Top-level select over `root_table` with the spec's predicates,
    /// aggregates, projection, grouping, ordering, paging, planned join
    /// clauses, and any injected restriction conditions (the auth gate's
    /// owner checks land here).
    pub fn select(
        &self,
        root_table: &str,
        spec: &QuerySpec,
        tenant: &str,
        joins: &[JoinClause],
        restrictions: &[OnExpr],
    ) -> Result<SqlQuery> {
        let mut em = Emitter::new(self.kind);
        em.push("SELECT ");
        if spec.distinct {
            em.push("DISTINCT ");
        }
        self.emit_projection(&mut em, root_table, spec);
        em.push(" FROM ");
        em.push(&self.q(root_table));

        for clause in joins {
            self.emit_join(&mut em, clause, tenant);
        }

        em.push(" WHERE ");
        for (attr, op) in &spec.query_ops {
            let value = spec.query_vals.get(attr).cloned().unwrap_or(Value::Null);
            self.emit_predicate(&mut em, root_table, attr, *op, &value)?;
            em.push(" AND ");
        }
        for clause in &spec.where_clauses {
            let col = self.col_ref(root_table, &clause.column);
            self.emit_predicate_on(&mut em, &col, clause.op, &clause.value)?;
            em.push(" AND ");
        }
        for restriction in restrictions {
            self.emit_on(&mut em, restriction);
            em.push(" AND ");
        }
        self.emit_guard(&mut em, root_table, tenant);

        if !spec.group_by.is_empty() {
            em.push(" GROUP BY ");
            let cols: Vec<String> = spec
                .group_by
                .iter()
                .map(|c| self.col_ref(root_table, c))
                .collect();
            em.push(&cols.join(", "));
        }
        if !spec.order_by.is_empty() {
            em.push(" ORDER BY ");
            let cols: Vec<String> = spec
                .order_by
                .iter()
                .map(|c| self.col_ref(root_table, c))
                .collect();
            em.push(&cols.join(", "));
            em.push(if spec.order_desc { " DESC" } else { " ASC" });
        }
        if let Some(limit) = spec.limit {
            em.push(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = spec.offset {
            em.push(&format!(" OFFSET {offset}"));
        }
        Ok(em.finish())
    }

    /// Hydrate full rows for a set of paths, tenant-scoped. Used to turn
    /// vector hits back into rows.
    pub fn select_by_paths(&self, table: &str, paths: &[String], tenant: &str) -> SqlQuery {
        let mut em = Emitter::new(self.kind);
        em.push("SELECT ");
        em.push(&format!("{}.*", self.q(table)));
        em.push(" FROM ");
        em.push(&self.q(table));
        em.push(" WHERE ");
        em.push(&self.qq(table, PATH_ATTR));
        em.push(" IN (");
        for (i, path) in paths.iter().enumerate() {
            if i > 0 {
                em.push(", ");
            }
            em.push_param(SqlParam::text(path.clone()));
        }
        em.push(") AND ");
        self.emit_guard(&mut em, table, tenant);
        em.finish()
    }

    fn emit_projection(&self, em: &mut Emitter, root_table: &str, spec: &QuerySpec) {
        if spec.aggregates.is_empty() && spec.into_spec.is_empty() {
            em.push(&format!("{}.*", self.q(root_table)));
            return;
        }
        let mut items: Vec<String> = Vec::new();
        for (alias, agg) in &spec.aggregates {
            let args: Vec<String> = agg
                .args
                .iter()
                .map(|a| {
                    if a == "*" {
                        "*".to_string()
                    } else {
                        self.col_ref(root_table, a)
                    }
                })
                .collect();
            items.push(format!(
                "{}({}) AS {}",
                agg.func.sql(),
                args.join(", "),
                self.q(alias)
            ));
        }
        for (alias, source) in &spec.into_spec {
            items.push(format!(
                "{} AS {}",
                self.col_ref(root_table, source),
                self.q(alias)
            ));
        }
        em.push(&items.join(", "));
    }

    fn emit_join(&self, em: &mut Emitter, clause: &JoinClause, tenant: &str) {
        em.push(&format!(
            " {} {} AS {} ON (",
            clause.kind.sql(),
            self.q(&clause.table),
            self.q(&clause.alias)
        ));
        self.emit_on(em, &clause.on);
        em.push(")");
        em.push(" AND ");
        self.emit_guard(em, &clause.alias, tenant);
    }

    fn emit_on(&self, em: &mut Emitter, expr: &OnExpr) {
        match expr {
            OnExpr::ColCol { lhs, op, rhs } => {
                em.push(&self.qq(&lhs.table, &lhs.column));
                em.push(&format!(" {op} "));
                em.push(&self.qq(&rhs.table, &rhs.column));
            }
            OnExpr::ColParam { lhs, op, param } => {
                em.push(&self.qq(&lhs.table, &lhs.column));
                em.push(&format!(" {op} "));
                em.push_param(param.clone());
            }
            OnExpr::Exists {
                table,
                alias,
                conds,
            } => {
                em.push(&format!(
                    "EXISTS (SELECT 1 FROM {} AS {} WHERE ",
                    self.q(table),
                    self.q(alias)
                ));
                for (i, cond) in conds.iter().enumerate() {
                    if i > 0 {
                        em.push(" AND ");
                    }
                    self.emit_on(em, cond);
                }
                em.push(")");
            }
            OnExpr::DescendantOf { row, ancestor } => {
                let row = self.qq(&row.table, &row.column);
                let ancestor = self.qq(&ancestor.table, &ancestor.column);
                match self.kind {
                    StoreKind::MySql => {
                        em.push(&format!("{row} LIKE CONCAT({ancestor}, '/%')"));
                    }
                    _ => em.push(&format!("{row} LIKE {ancestor} || '/%'")),
                }
            }
            OnExpr::And(parts) => self.emit_nested(em, parts, " AND "),
            OnExpr::Or(parts) => self.emit_nested(em, parts, " OR "),
        }
    }

    fn emit_nested(&self, em: &mut Emitter, parts: &[OnExpr], sep: &str) {
        em.push("(");
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                em.push(sep);
            }
            self.emit_on(em, part);
        }
        em.push(")");
    }

    /// `"alias"."__is_deleted__" = FALSE AND "alias"."__tenant__" = ?`
    fn emit_guard(&self, em: &mut Emitter, alias: &str, tenant: &str) {
        em.push(&self.qq(alias, DELETED_ATTR));
        em.push(" = FALSE AND ");
        em.push(&self.qq(alias, TENANT_ATTR));
        em.push(" = ");
        em.push_param(SqlParam::text(tenant));
    }

    fn emit_predicate(
        &self,
        em: &mut Emitter,
        table: &str,
        attr: &str,
        op: QueryOp,
        value: &Value,
    ) -> Result<()> {
        let col = self.qq(table, &sanitize_identifier(attr));
        self.emit_predicate_on(em, &col, op, value)
    }

    fn emit_predicate_on(
        &self,
        em: &mut Emitter,
        col: &str,
        op: QueryOp,
        value: &Value,
    ) -> Result<()> {
        if value.is_null() {
            return match op {
                QueryOp::Eq | QueryOp::Is => {
                    em.push(&format!("{col} IS NULL"));
                    Ok(())
                }
                QueryOp::Ne | QueryOp::IsNot => {
                    em.push(&format!("{col} IS NOT NULL"));
                    Ok(())
                }
                other => Err(StoreError::InvalidNullComparison(other.sql().to_string())),
            };
        }
        match op {
            QueryOp::Between => {
                let bounds = value.as_array().filter(|a| a.len() == 2).ok_or_else(|| {
                    StoreError::InvalidInput(
                        "between requires a two-element array value".to_string(),
                    )
                })?;
                em.push(&format!("{col} BETWEEN "));
                em.push_param(SqlParam::from_json(&bounds[0]));
                em.push(" AND ");
                em.push_param(SqlParam::from_json(&bounds[1]));
            }
            QueryOp::Is | QueryOp::IsNot => match value {
                Value::Bool(b) => {
                    let lit = if *b { "TRUE" } else { "FALSE" };
                    let not = if op == QueryOp::IsNot { "NOT " } else { "" };
                    em.push(&format!("{col} IS {not}{lit}"));
                }
                _ => {
                    return Err(StoreError::InvalidInput(format!(
                        "operator {} expects null or boolean",
                        op.sql()
                    )))
                }
            },
            other => {
                em.push(&format!("{col} {} ", other.sql()));
                em.push_param(SqlParam::from_json(value));
            }
        }
        Ok(())
    }

    // ── join planning ─────────────────────────────────────────

    /// Walk a `JoinInfo` tree and emit join clauses, branching on the
    /// relationship tag at each hop.
    pub fn plan_joins(
        &self,
        root_fq: &str,
        root_table: &str,
        info: &JoinInfo,
    ) -> Result<Vec<JoinClause>> {
        let mut used: HashSet<String> = HashSet::from([root_table.to_string()]);
        let mut out = Vec::new();
        self.plan_node(root_fq, root_table, info, &mut used, &mut out)?;
        Ok(out)
    }

    fn alias_for(&self, used: &mut HashSet<String>, table: &str) -> String {
        if used.insert(table.to_string()) {
            return table.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{table}_{n}");
            if used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }

    fn plan_node(
        &self,
        current_fq: &str,
        current_alias: &str,
        node: &JoinInfo,
        used: &mut HashSet<String>,
        out: &mut Vec<JoinClause>,
    ) -> Result<()> {
        let rel = self.catalog.relationship(&node.relationship).ok_or_else(|| {
            StoreError::UnsupportedRelationshipForJoin(node.relationship.clone())
        })?;
        if rel.other_endpoint(current_fq) != Some(node.entity.as_str()) {
            return Err(StoreError::InvalidJoinReference(format!(
                "{} does not connect {current_fq} to {}",
                node.relationship, node.entity
            )));
        }
        let target_table = self.catalog.table_for_fq(&node.entity)?;

        use agentstore_core::RelationshipKind::*;
        let target_alias = match rel.kind {
            Contains => {
                let alias = self.alias_for(used, &target_table);
                let on = if rel.from == current_fq {
                    // current is the parent: match children by parent column
                    OnExpr::ColCol {
                        lhs: ColRef::new(&alias, PARENT_ATTR),
                        op: "=",
                        rhs: ColRef::new(current_alias, PATH_ATTR),
                    }
                } else {
                    // current is the child: climb to its container
                    OnExpr::ColCol {
                        lhs: ColRef::new(&alias, PATH_ATTR),
                        op: "=",
                        rhs: ColRef::new(current_alias, PARENT_ATTR),
                    }
                };
                out.push(JoinClause::inner(&target_table, &alias, on));
                alias
            }
            OneToOne => {
                let alias = self.alias_for(used, &target_table);
                let on = OnExpr::ColCol {
                    lhs: ColRef::new(&alias, rel.pointer_column()),
                    op: "=",
                    rhs: ColRef::new(current_alias, PATH_ATTR),
                };
                out.push(JoinClause::inner(&target_table, &alias, on));
                alias
            }
            Between => {
                let link_table = self.catalog.table_for_fq(&rel.fq_name())?;
                let link_alias = self.alias_for(used, &link_table);
                let from_col = sanitize_identifier(&rel.from_alias);
                let to_col = sanitize_identifier(&rel.to_alias);
                let on_link = OnExpr::Or(vec![
                    OnExpr::ColCol {
                        lhs: ColRef::new(&link_alias, &from_col),
                        op: "=",
                        rhs: ColRef::new(current_alias, PATH_ATTR),
                    },
                    OnExpr::ColCol {
                        lhs: ColRef::new(&link_alias, &to_col),
                        op: "=",
                        rhs: ColRef::new(current_alias, PATH_ATTR),
                    },
                ]);
                out.push(JoinClause::inner(&link_table, &link_alias, on_link));

                let alias = self.alias_for(used, &target_table);
                let on_target = OnExpr::Or(vec![
                    OnExpr::And(vec![
                        OnExpr::ColCol {
                            lhs: ColRef::new(&link_alias, &from_col),
                            op: "=",
                            rhs: ColRef::new(current_alias, PATH_ATTR),
                        },
                        OnExpr::ColCol {
                            lhs: ColRef::new(&alias, PATH_ATTR),
                            op: "=",
                            rhs: ColRef::new(&link_alias, &to_col),
                        },
                    ]),
                    OnExpr::And(vec![
                        OnExpr::ColCol {
                            lhs: ColRef::new(&link_alias, &to_col),
                            op: "=",
                            rhs: ColRef::new(current_alias, PATH_ATTR),
                        },
                        OnExpr::ColCol {
                            lhs: ColRef::new(&alias, PATH_ATTR),
                            op: "=",
                            rhs: ColRef::new(&link_alias, &from_col),
                        },
                    ]),
                ]);
                out.push(JoinClause::inner(&target_table, &alias, on_target));
                alias
            }
        };

        for child in &node.children {
            self.plan_node(&node.entity, &target_alias, child, used, out)?;
        }
        Ok(())
    }

    /// Caller-spelled join. The rhs must reference the root entity as
    /// `Entity.column` (or `Module/Entity.column`).
    pub fn raw_join(
        &self,
        root_fq: &str,
        root_table: &str,
        spec: &RawJoinSpec,
    ) -> Result<JoinClause> {
        let (rhs_entity, rhs_column) = spec.rhs.split_once('.').ok_or_else(|| {
            StoreError::InvalidJoinReference(format!("malformed join rhs: {}", spec.rhs))
        })?;
        let root_name = root_fq.rsplit('/').next().unwrap_or(root_fq);
        if !rhs_entity.eq_ignore_ascii_case(root_name) && !rhs_entity.eq_ignore_ascii_case(root_fq)
        {
            return Err(StoreError::InvalidJoinReference(format!(
                "join rhs {} does not reference the root entity {root_fq}",
                spec.rhs
            )));
        }
        let op = QueryOp::parse(&spec.op)?;
        let table = sanitize_identifier(&spec.table);
        Ok(JoinClause::inner(
            table.clone(),
            table,
            OnExpr::ColCol {
                lhs: ColRef::new(
                    sanitize_identifier(&spec.table),
                    sanitize_identifier(&spec.lhs_column),
                ),
                op: op.sql(),
                rhs: ColRef::new(root_table, sanitize_identifier(rhs_column)),
            },
        ))
    }

    // ── writes ────────────────────────────────────────────────

    pub fn insert(&self, table: &str, columns: &[(String, SqlParam)]) -> SqlQuery {
        let mut em = Emitter::new(self.kind);
        em.push("INSERT INTO ");
        em.push(&self.q(table));
        em.push(" (");
        em.push(
            &columns
                .iter()
                .map(|(c, _)| self.q(c))
                .collect::<Vec<_>>()
                .join(", "),
        );
        em.push(") VALUES (");
        for (i, (_, param)) in columns.iter().enumerate() {
            if i > 0 {
                em.push(", ");
            }
            em.push_param(param.clone());
        }
        em.push(")");
        em.finish()
    }

    /// Backend upsert keyed on the conflict columns: `ON CONFLICT … DO
    /// UPDATE` for Postgres/SQLite, `ON DUPLICATE KEY UPDATE` for MySQL.
    pub fn upsert(
        &self,
        table: &str,
        columns: &[(String, SqlParam)],
        conflict: &[&str],
    ) -> SqlQuery {
        let mut query = self.insert(table, columns);
        let updatable: Vec<&String> = columns
            .iter()
            .map(|(c, _)| c)
            .filter(|c| !conflict.contains(&c.as_str()))
            .collect();
        match self.kind {
            StoreKind::MySql => {
                let sets = if updatable.is_empty() {
                    // degenerate but valid no-op update
                    format!("{c} = {c}", c = self.q(conflict[0]))
                } else {
                    updatable
                        .iter()
                        .map(|c| format!("{q} = VALUES({q})", q = self.q(c)))
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                query.sql.push_str(&format!(" ON DUPLICATE KEY UPDATE {sets}"));
            }
            _ => {
                let target = conflict
                    .iter()
                    .map(|c| self.q(c))
                    .collect::<Vec<_>>()
                    .join(", ");
                if updatable.is_empty() {
                    query
                        .sql
                        .push_str(&format!(" ON CONFLICT ({target}) DO NOTHING"));
                } else {
                    let sets = updatable
                        .iter()
                        .map(|c| format!("{q} = excluded.{q}", q = self.q(c)))
                        .collect::<Vec<_>>()
                        .join(", ");
                    query
                        .sql
                        .push_str(&format!(" ON CONFLICT ({target}) DO UPDATE SET {sets}"));
                }
            }
        }
        query
    }

    pub fn update_by_path(
        &self,
        table: &str,
        sets: &[(String, SqlParam)],
        path: &str,
        tenant: &str,
    ) -> SqlQuery {
        let mut em = Emitter::new(self.kind);
        em.push("UPDATE ");
        em.push(&self.q(table));
        em.push(" SET ");
        for (i, (col, param)) in sets.iter().enumerate() {
            if i > 0 {
                em.push(", ");
            }
            em.push(&self.q(col));
            em.push(" = ");
            em.push_param(param.clone());
        }
        em.push(" WHERE ");
        em.push(&self.q(PATH_ATTR));
        em.push(" = ");
        em.push_param(SqlParam::text(path));
        em.push(" AND ");
        em.push(&self.q(TENANT_ATTR));
        em.push(" = ");
        em.push_param(SqlParam::text(tenant));
        em.finish()
    }

    pub fn soft_delete(&self, table: &str, path: &str, tenant: &str) -> SqlQuery {
        self.update_by_path(
            table,
            &[(DELETED_ATTR.to_string(), SqlParam::Bool(true))],
            path,
            tenant,
        )
    }

    pub fn hard_delete(&self, table: &str, path: &str, tenant: &str) -> SqlQuery {
        let mut em = Emitter::new(self.kind);
        em.push("DELETE FROM ");
        em.push(&self.q(table));
        em.push(" WHERE ");
        em.push(&self.q(PATH_ATTR));
        em.push(" = ");
        em.push_param(SqlParam::text(path));
        em.push(" AND ");
        em.push(&self.q(TENANT_ATTR));
        em.push(" = ");
        em.push_param(SqlParam::text(tenant));
        em.finish()
    }

    /// Purge link rows between two endpoints, in either orientation.
    pub fn delete_between_links(
        &self,
        table: &str,
        from_col: &str,
        to_col: &str,
        path1: &str,
        path2: &str,
        tenant: &str,
    ) -> SqlQuery {
        let mut em = Emitter::new(self.kind);
        em.push("DELETE FROM ");
        em.push(&self.q(table));
        em.push(" WHERE ((");
        em.push(&self.q(from_col));
        em.push(" = ");
        em.push_param(SqlParam::text(path1));
        em.push(" AND ");
        em.push(&self.q(to_col));
        em.push(" = ");
        em.push_param(SqlParam::text(path2));
        em.push(") OR (");
        em.push(&self.q(from_col));
        em.push(" = ");
        em.push_param(SqlParam::text(path2));
        em.push(" AND ");
        em.push(&self.q(to_col));
        em.push(" = ");
        em.push_param(SqlParam::text(path1));
        em.push(")) AND ");
        em.push(&self.q(TENANT_ATTR));
        em.push(" = ");
        em.push_param(SqlParam::text(tenant));
        em.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentstore_core::{
        AttrType, AttributeMeta, EntityMeta, RelationshipKind, RelationshipMeta,
    };
    use serde_json::json;
    use std::sync::Arc;

    fn catalog() -> Arc<SchemaCatalog> {
        SchemaCatalog::builder()
            .entity(
                EntityMeta::new("acme", "Person")
                    .with_attribute(AttributeMeta::new("id", AttrType::Int).id())
                    .with_attribute(AttributeMeta::new("name", AttrType::String))
                    .with_attribute(AttributeMeta::new("age", AttrType::Int)),
            )
            .entity(
                EntityMeta::new("acme", "Company")
                    .with_attribute(AttributeMeta::new("id", AttrType::Int).id()),
            )
            .entity(
                EntityMeta::new("acme", "Department")
                    .with_attribute(AttributeMeta::new("id", AttrType::Int).id()),
            )
            .entity(
                EntityMeta::new("acme", "Team")
                    .with_attribute(AttributeMeta::new("id", AttrType::Int).id()),
            )
            .relationship(RelationshipMeta::new(
                "acme",
                "EmploymentOf",
                RelationshipKind::Between,
                "acme/Person",
                "acme/Company",
            ))
            .relationship(RelationshipMeta::new(
                "acme",
                "DeptTeams",
                RelationshipKind::Contains,
                "acme/Department",
                "acme/Team",
            ))
            .relationship(RelationshipMeta::new(
                "acme",
                "Spouse",
                RelationshipKind::OneToOne,
                "acme/Person",
                "acme/Person",
            ))
            .build()
            .unwrap()
    }

    fn spec_eq(attr: &str, val: Value) -> QuerySpec {
        QuerySpec::default().with_predicate(attr, QueryOp::Eq, val)
    }

    #[test]
    fn select_appends_tenant_and_deleted_guards() {
        let catalog = catalog();
        let builder = SqlBuilder::new(&catalog, StoreKind::Postgres);
        let q = builder
            .select("acme_person", &spec_eq("id", json!(101)), "T1", &[], &[])
            .unwrap();
        assert_eq!(
            q.sql,
            "SELECT \"acme_person\".* FROM \"acme_person\" WHERE \
             \"acme_person\".\"id\" = $1 AND \
             \"acme_person\".\"__is_deleted__\" = FALSE AND \"acme_person\".\"__tenant__\" = $2"
        );
        assert_eq!(
            q.params,
            vec![SqlParam::Int(101), SqlParam::Text("T1".into())]
        );
    }

    #[test]
    fn null_comparison_rewrites_equality() {
        let catalog = catalog();
        let builder = SqlBuilder::new(&catalog, StoreKind::Postgres);
        let q = builder
            .select("acme_person", &spec_eq("name", Value::Null), "T1", &[], &[])
            .unwrap();
        assert!(q.sql.contains("\"acme_person\".\"name\" IS NULL"));

        let spec = QuerySpec::default().with_predicate("name", QueryOp::Ne, Value::Null);
        let q = builder.select("acme_person", &spec, "T1", &[], &[]).unwrap();
        assert!(q.sql.contains("\"acme_person\".\"name\" IS NOT NULL"));

        let spec = QuerySpec::default().with_predicate("name", QueryOp::Lt, Value::Null);
        let err = builder.select("acme_person", &spec, "T1", &[], &[]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidNullComparison(_)));
    }

    #[test]
    fn between_requires_two_element_array() {
        let catalog = catalog();
        let builder = SqlBuilder::new(&catalog, StoreKind::Postgres);

        let spec = QuerySpec::default().with_predicate("age", QueryOp::Between, json!([18, 30]));
        let q = builder.select("acme_person", &spec, "T1", &[], &[]).unwrap();
        assert!(q.sql.contains("\"acme_person\".\"age\" BETWEEN $1 AND $2"));

        let spec = QuerySpec::default().with_predicate("age", QueryOp::Between, json!(18));
        let err = builder.select("acme_person", &spec, "T1", &[], &[]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }

    #[test]
    fn aggregates_and_projection() {
        let catalog = catalog();
        let builder = SqlBuilder::new(&catalog, StoreKind::Postgres);
        let mut spec = QuerySpec::default();
        spec.aggregates.insert(
            "headcount".to_string(),
            agentstore_core::Aggregate::count_all(),
        );
        spec.into_spec
            .insert("person_name".to_string(), "name".to_string());
        spec.group_by.push("name".to_string());
        spec.order_by.push("name".to_string());
        spec.order_desc = true;
        spec.limit = Some(5);
        spec.offset = Some(10);

        let q = builder.select("acme_person", &spec, "T1", &[], &[]).unwrap();
        assert!(q.sql.starts_with(
            "SELECT COUNT(*) AS \"headcount\", \"acme_person\".\"name\" AS \"person_name\" FROM"
        ));
        assert!(q.sql.contains("GROUP BY \"acme_person\".\"name\""));
        assert!(q.sql.contains("ORDER BY \"acme_person\".\"name\" DESC"));
        assert!(q.sql.ends_with("LIMIT 5 OFFSET 10"));
    }

    #[test]
    fn contains_join_matches_parent_column() {
        let catalog = catalog();
        let builder = SqlBuilder::new(&catalog, StoreKind::Postgres);
        let joins = builder
            .plan_joins(
                "acme/Department",
                "acme_department",
                &JoinInfo::new("acme/DeptTeams", "acme/Team"),
            )
            .unwrap();
        assert_eq!(joins.len(), 1);
        let q = builder
            .select("acme_department", &QuerySpec::default(), "T1", &joins, &[])
            .unwrap();
        assert!(q.sql.contains(
            "INNER JOIN \"acme_team\" AS \"acme_team\" ON \
             (\"acme_team\".\"__parent__\" = \"acme_department\".\"__path__\")"
        ));
        // joined alias carries its own guard pair
        assert!(q.sql.contains("\"acme_team\".\"__is_deleted__\" = FALSE"));
    }

    #[test]
    fn between_join_ors_both_orientations() {
        let catalog = catalog();
        let builder = SqlBuilder::new(&catalog, StoreKind::Postgres);
        let joins = builder
            .plan_joins(
                "acme/Person",
                "acme_person",
                &JoinInfo::new("acme/EmploymentOf", "acme/Company"),
            )
            .unwrap();
        assert_eq!(joins.len(), 2);
        let q = builder
            .select("acme_person", &QuerySpec::default(), "T1", &joins, &[])
            .unwrap();
        assert!(q.sql.contains("INNER JOIN \"acme_employmentof\""));
        assert!(q.sql.contains(
            "(\"acme_employmentof\".\"a1\" = \"acme_person\".\"__path__\" OR \
             \"acme_employmentof\".\"a2\" = \"acme_person\".\"__path__\")"
        ));
        // the far-entity join must accept either endpoint orientation
        assert!(q.sql.contains("\"acme_company\".\"__path__\" = \"acme_employmentof\".\"a2\""));
        assert!(q.sql.contains("\"acme_company\".\"__path__\" = \"acme_employmentof\".\"a1\""));
    }

    #[test]
    fn one_to_one_self_join_gets_distinct_alias() {
        let catalog = catalog();
        let builder = SqlBuilder::new(&catalog, StoreKind::Postgres);
        let joins = builder
            .plan_joins(
                "acme/Person",
                "acme_person",
                &JoinInfo::new("acme/Spouse", "acme/Person"),
            )
            .unwrap();
        assert_eq!(joins[0].alias, "acme_person_2");
        let q = builder
            .select("acme_person", &QuerySpec::default(), "T1", &joins, &[])
            .unwrap();
        assert!(q.sql.contains(
            "INNER JOIN \"acme_person\" AS \"acme_person_2\" ON \
             (\"acme_person_2\".\"spouse\" = \"acme_person\".\"__path__\")"
        ));
    }

    #[test]
    fn unknown_relationship_is_unsupported_for_join() {
        let catalog = catalog();
        let builder = SqlBuilder::new(&catalog, StoreKind::Postgres);
        let err = builder
            .plan_joins(
                "acme/Person",
                "acme_person",
                &JoinInfo::new("acme/Nonexistent", "acme/Company"),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedRelationshipForJoin(_)));
    }

    #[test]
    fn raw_join_verifies_root_reference() {
        let catalog = catalog();
        let builder = SqlBuilder::new(&catalog, StoreKind::Postgres);
        let good = RawJoinSpec {
            table: "acme_employmentof".to_string(),
            lhs_column: "a1".to_string(),
            op: "=".to_string(),
            rhs: "Person.__path__".to_string(),
        };
        assert!(builder.raw_join("acme/Person", "acme_person", &good).is_ok());

        let bad = RawJoinSpec {
            rhs: "Company.__path__".to_string(),
            ..good
        };
        let err = builder
            .raw_join("acme/Person", "acme_person", &bad)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidJoinReference(_)));
    }

    #[test]
    fn restriction_conditions_render_as_exists() {
        let catalog = catalog();
        let builder = SqlBuilder::new(&catalog, StoreKind::Sqlite);
        let restriction = OnExpr::Or(vec![
            OnExpr::Exists {
                table: "acme_person_owners".to_string(),
                alias: "acme_person_owners_g".to_string(),
                conds: vec![
                    OnExpr::ColCol {
                        lhs: ColRef::new("acme_person_owners_g", "path"),
                        op: "=",
                        rhs: ColRef::new("acme_person", "__path__"),
                    },
                    OnExpr::ColParam {
                        lhs: ColRef::new("acme_person_owners_g", "user_id"),
                        op: "=",
                        param: SqlParam::text("U1"),
                    },
                ],
            },
            OnExpr::DescendantOf {
                row: ColRef::new("acme_person", "__path__"),
                ancestor: ColRef::new("acme_department_owners_g", "path"),
            },
        ]);
        let q = builder
            .select(
                "acme_person",
                &QuerySpec::default(),
                "T1",
                &[],
                &[restriction],
            )
            .unwrap();
        assert!(q.sql.contains(
            "EXISTS (SELECT 1 FROM \"acme_person_owners\" AS \"acme_person_owners_g\" WHERE"
        ));
        assert!(q.sql.contains(
            "\"acme_person\".\"__path__\" LIKE \"acme_department_owners_g\".\"path\" || '/%'"
        ));
        assert_eq!(q.params.len(), 2); // user id + tenant guard
    }

    #[test]
    fn upsert_forms_per_dialect() {
        let catalog = catalog();
        let cols = vec![
            ("__path__".to_string(), SqlParam::text("p")),
            ("__tenant__".to_string(), SqlParam::text("t")),
            ("name".to_string(), SqlParam::text("Joe")),
        ];
        let pg = SqlBuilder::new(&catalog, StoreKind::Postgres).upsert(
            "acme_person",
            &cols,
            &["__path__", "__tenant__"],
        );
        assert!(pg.sql.contains(
            "ON CONFLICT (\"__path__\", \"__tenant__\") DO UPDATE SET \"name\" = excluded.\"name\""
        ));

        let my = SqlBuilder::new(&catalog, StoreKind::MySql).upsert(
            "acme_person",
            &cols,
            &["__path__", "__tenant__"],
        );
        assert!(my.sql.contains("ON DUPLICATE KEY UPDATE `name` = VALUES(`name`)"));
    }

    #[test]
    fn placeholders_number_sequentially_on_postgres() {
        let catalog = catalog();
        let builder = SqlBuilder::new(&catalog, StoreKind::Postgres);
        let q = builder.soft_delete("acme_person", "acme$Person/101", "T1");
        assert_eq!(
            q.sql,
            "UPDATE \"acme_person\" SET \"__is_deleted__\" = $1 \
             WHERE \"__path__\" = $2 AND \"__tenant__\" = $3"
        );
        assert_eq!(q.params.len(), 3);
    }

    #[test]
    fn select_by_paths_hydrates_tenant_scoped() {
        let catalog = catalog();
        let builder = SqlBuilder::new(&catalog, StoreKind::Sqlite);
        let q = builder.select_by_paths(
            "acme_doc",
            &["acme$Doc/1".to_string(), "acme$Doc/2".to_string()],
            "T1",
        );
        assert!(q.sql.contains("\"__path__\" IN (?, ?)"));
        assert_eq!(q.params.len(), 3);
    }
}
