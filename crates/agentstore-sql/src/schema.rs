//! Schema application.
//!
//! Migration *generation* stays outside this crate; callers hand finished
//! SQL to [`apply_schema_sql`]. The first-boot helpers below emit
//! `CREATE TABLE IF NOT EXISTS` DDL straight from the catalog: the entity
//! table with its reserved columns, the parallel owners table, the
//! relational vector table on backends that support it, between-relationship
//! link tables, and the global RBAC tables.
//!
//! Attribute columns are declared nullable; presence checks belong to the
//! validation layer in front of the resolver, and a stray NOT NULL here
//! would turn a validator gap into a backend error.

use tracing::info;

use agentstore_core::catalog::{owners_table, vector_table};
use agentstore_core::{
    AttrType, EntityMeta, RelationshipKind, RelationshipMeta, Result, SchemaCatalog, StoreError,
    DELETED_ATTR, PARENT_ATTR, PATH_ATTR, TENANT_ATTR,
};
use agentstore_core::catalog::sanitize_identifier;

use crate::auth::{ASSIGNMENTS_TABLE, PERMISSIONS_TABLE};
use crate::backend::StoreKind;
use crate::builder::SqlQuery;
use crate::executor::Executor;

/// Default pgvector dimension when neither the entity nor the caller names
/// one.
pub const DEFAULT_VECTOR_DIMENSION: usize = 1536;

fn sql_type(kind: StoreKind, ty: AttrType) -> &'static str {
    use StoreKind::*;
    match (kind, ty) {
        (Postgres, AttrType::String | AttrType::Enum) => "VARCHAR",
        (MySql, AttrType::String | AttrType::Enum) => "VARCHAR(255)",
        (Sqlite, AttrType::String | AttrType::Enum) => "TEXT",
        (Postgres, AttrType::Int) => "INTEGER",
        (MySql, AttrType::Int) => "INT",
        (Sqlite, AttrType::Int | AttrType::BigInt) => "INTEGER",
        (Postgres | MySql, AttrType::BigInt) => "BIGINT",
        (Postgres | Sqlite, AttrType::Float) => "REAL",
        (MySql, AttrType::Float) => "FLOAT",
        (Postgres, AttrType::Double | AttrType::Decimal) => "DOUBLE PRECISION",
        (MySql, AttrType::Double | AttrType::Decimal) => "DOUBLE",
        (Sqlite, AttrType::Double | AttrType::Decimal) => "REAL",
        (_, AttrType::Boolean) => "BOOLEAN",
        (Postgres, AttrType::DateTime) => "TIMESTAMPTZ",
        (MySql, AttrType::DateTime) => "DATETIME",
        (Sqlite, AttrType::DateTime) => "TEXT",
        (Postgres, AttrType::Uuid) => "UUID",
        (MySql, AttrType::Uuid) => "CHAR(36)",
        (Sqlite, AttrType::Uuid) => "TEXT",
        (Postgres, AttrType::Json) => "JSONB",
        (MySql, AttrType::Json) => "JSON",
        (Sqlite, AttrType::Json) => "TEXT",
    }
}

fn path_type(kind: StoreKind) -> &'static str {
    match kind {
        StoreKind::MySql => "VARCHAR(512)",
        StoreKind::Postgres => "VARCHAR",
        StoreKind::Sqlite => "TEXT",
    }
}

fn name_type(kind: StoreKind) -> &'static str {
    match kind {
        StoreKind::MySql => "VARCHAR(128)",
        StoreKind::Postgres => "VARCHAR",
        StoreKind::Sqlite => "TEXT",
    }
}

/// DDL for one entity: its table plus secondary indexes (and unique
/// per-tenant indexes for unique attributes).
pub fn entity_ddl(kind: StoreKind, catalog: &SchemaCatalog, meta: &EntityMeta) -> Vec<String> {
    let table = catalog.table_reference(&meta.module, &meta.name);
    let fq = meta.fq_name();
    let q = |s: &str| kind.quote(s);

    let mut cols: Vec<String> = vec![
        format!("{} {} NOT NULL", q(PATH_ATTR), path_type(kind)),
        format!("{} {} NOT NULL", q(TENANT_ATTR), name_type(kind)),
        format!("{} BOOLEAN NOT NULL DEFAULT FALSE", q(DELETED_ATTR)),
    ];

    let is_contained_child = catalog
        .relationships_for(&fq)
        .iter()
        .any(|r| r.kind == RelationshipKind::Contains && r.to == fq);
    if is_contained_child {
        cols.push(format!("{} {}", q(PARENT_ATTR), path_type(kind)));
    }

    for attr in &meta.attributes {
        cols.push(format!(
            "{} {}",
            q(&sanitize_identifier(&attr.name)),
            sql_type(kind, attr.ty)
        ));
    }

    for rel in catalog.one_to_one_relationships_for(&fq) {
        cols.push(format!("{} {}", q(&rel.pointer_column()), path_type(kind)));
    }

    let mut inline_keys: Vec<String> = Vec::new();
    let mut statements: Vec<String> = Vec::new();
    for attr in &meta.attributes {
        let col = sanitize_identifier(&attr.name);
        if attr.unique {
            match kind {
                StoreKind::MySql => inline_keys.push(format!(
                    "UNIQUE KEY {} ({}, {})",
                    q(&format!("uq_{table}_{col}")),
                    q(&col),
                    q(TENANT_ATTR)
                )),
                _ => statements.push(format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({}, {})",
                    q(&format!("uq_{table}_{col}")),
                    q(&table),
                    q(&col),
                    q(TENANT_ATTR)
                )),
            }
        } else if attr.indexed {
            match kind {
                StoreKind::MySql => inline_keys.push(format!(
                    "KEY {} ({})",
                    q(&format!("idx_{table}_{col}")),
                    q(&col)
                )),
                _ => statements.push(format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                    q(&format!("idx_{table}_{col}")),
                    q(&table),
                    q(&col)
                )),
            }
        }
    }

    let mut body = cols;
    body.push(format!("PRIMARY KEY ({}, {})", q(PATH_ATTR), q(TENANT_ATTR)));
    body.extend(inline_keys);
    statements.insert(
        0,
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            q(&table),
            body.join(", ")
        ),
    );

    statements.push(owners_ddl(kind, &table));
    statements
}

fn owners_ddl(kind: StoreKind, table: &str) -> String {
    let q = |s: &str| kind.quote(s);
    let owners = owners_table(table);
    let mut body = vec![
        format!("{} {} NOT NULL", q("id"), name_type(kind)),
        format!("{} {} NOT NULL", q("path"), path_type(kind)),
        format!("{} {} NOT NULL", q("user_id"), name_type(kind)),
        format!("{} CHAR(1) NOT NULL", q("type")),
        format!("{} BOOLEAN NOT NULL DEFAULT FALSE", q("c")),
        format!("{} BOOLEAN NOT NULL DEFAULT FALSE", q("r")),
        format!("{} BOOLEAN NOT NULL DEFAULT FALSE", q("u")),
        format!("{} BOOLEAN NOT NULL DEFAULT FALSE", q("d")),
        format!("{} {} NOT NULL", q(TENANT_ATTR), name_type(kind)),
        format!("PRIMARY KEY ({})", q("id")),
    ];
    if kind == StoreKind::MySql {
        body.push(format!(
            "KEY {} ({}, {})",
            q(&format!("idx_{owners}_grant")),
            q("path"),
            q("user_id")
        ));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        q(&owners),
        body.join(", ")
    )
}

/// pgvector table parallel to an entity table. `None` on backends without
/// a vector type.
pub fn vector_ddl(kind: StoreKind, table: &str, dimension: usize) -> Option<String> {
    if !kind.supports_vector() {
        return None;
    }
    let q = |s: &str| kind.quote(s);
    Some(format!(
        "CREATE TABLE IF NOT EXISTS {} ({} VARCHAR PRIMARY KEY, {} vector({dimension}), {} VARCHAR, {} BOOLEAN NOT NULL DEFAULT FALSE)",
        q(&vector_table(table)),
        q("id"),
        q("embedding"),
        q(TENANT_ATTR),
        q(DELETED_ATTR),
    ))
}

/// Link table for a between relationship.
pub fn between_ddl(
    kind: StoreKind,
    catalog: &SchemaCatalog,
    rel: &RelationshipMeta,
) -> Result<Vec<String>> {
    if rel.kind != RelationshipKind::Between {
        return Err(StoreError::InvalidInput(format!(
            "{} is not a between relationship",
            rel.fq_name()
        )));
    }
    let q = |s: &str| kind.quote(s);
    let table = catalog.table_for_fq(&rel.fq_name())?;
    let from_col = sanitize_identifier(&rel.from_alias);
    let to_col = sanitize_identifier(&rel.to_alias);
    let mut body = vec![
        format!("{} {} NOT NULL", q(PATH_ATTR), path_type(kind)),
        format!("{} {} NOT NULL", q(TENANT_ATTR), name_type(kind)),
        format!("{} BOOLEAN NOT NULL DEFAULT FALSE", q(DELETED_ATTR)),
        format!("{} {} NOT NULL", q(&from_col), path_type(kind)),
        format!("{} {} NOT NULL", q(&to_col), path_type(kind)),
        format!("PRIMARY KEY ({}, {})", q(PATH_ATTR), q(TENANT_ATTR)),
    ];
    let mut statements = Vec::new();
    match kind {
        StoreKind::MySql => {
            body.push(format!(
                "KEY {} ({})",
                q(&format!("idx_{table}_{from_col}")),
                q(&from_col)
            ));
            body.push(format!(
                "KEY {} ({})",
                q(&format!("idx_{table}_{to_col}")),
                q(&to_col)
            ));
        }
        _ => {
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                q(&format!("idx_{table}_{from_col}")),
                q(&table),
                q(&from_col)
            ));
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                q(&format!("idx_{table}_{to_col}")),
                q(&table),
                q(&to_col)
            ));
        }
    }
    statements.insert(
        0,
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            q(&table),
            body.join(", ")
        ),
    );
    Ok(statements)
}

/// Global role-assignment and permission tables.
pub fn rbac_ddl(kind: StoreKind) -> Vec<String> {
    let q = |s: &str| kind.quote(s);
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({} {nt} NOT NULL, {} {nt} NOT NULL, {} {nt} NOT NULL)",
            q(ASSIGNMENTS_TABLE),
            q("user_id"),
            q("role"),
            q(TENANT_ATTR),
            nt = name_type(kind),
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({} {nt} NOT NULL, {} {rt} NOT NULL, \
             {} BOOLEAN NOT NULL DEFAULT FALSE, {} BOOLEAN NOT NULL DEFAULT FALSE, \
             {} BOOLEAN NOT NULL DEFAULT FALSE, {} BOOLEAN NOT NULL DEFAULT FALSE)",
            q(PERMISSIONS_TABLE),
            q("role"),
            q("resource"),
            q("c"),
            q("r"),
            q("u"),
            q("d"),
            nt = name_type(kind),
            rt = path_type(kind),
        ),
    ]
}

/// Apply caller-generated SQL statements in order inside one transaction.
/// This is the hook migration tooling calls with its generated batch.
pub async fn apply_schema_sql(exec: &Executor, statements: &[String]) -> Result<()> {
    let txn_id = exec.transactions().begin(exec.pool()).await?;
    for sql in statements {
        let query = SqlQuery {
            sql: sql.clone(),
            params: Vec::new(),
        };
        if let Err(e) = exec.execute(Some(&txn_id), &query).await {
            exec.transactions().rollback(&txn_id).await.ok();
            return Err(e);
        }
    }
    exec.transactions().commit(&txn_id).await
}

/// First-boot convenience: emit and apply DDL for every declared entity,
/// between table, and the RBAC tables. `vector_dimension` sizes the
/// relational vector tables on backends that support them.
pub async fn ensure_schema(
    exec: &Executor,
    catalog: &SchemaCatalog,
    vector_dimension: Option<usize>,
) -> Result<()> {
    let kind = exec.kind();
    let mut statements = Vec::new();
    if kind.supports_vector() {
        statements.push("CREATE EXTENSION IF NOT EXISTS vector".to_string());
    }
    statements.extend(rbac_ddl(kind));

    let mut entities: Vec<&EntityMeta> = catalog.entities().collect();
    entities.sort_by_key(|e| e.fq_name());
    for meta in entities {
        statements.extend(entity_ddl(kind, catalog, meta));
        if meta.has_fts() {
            let table = catalog.table_reference(&meta.module, &meta.name);
            let dim = meta
                .embedding
                .as_ref()
                .and_then(|c| c.dimension)
                .or(vector_dimension)
                .unwrap_or(DEFAULT_VECTOR_DIMENSION);
            statements.extend(vector_ddl(kind, &table, dim));
        }
    }

    let mut rels: Vec<&RelationshipMeta> = catalog
        .relationships()
        .filter(|r| r.kind == RelationshipKind::Between)
        .collect();
    rels.sort_by_key(|r| r.fq_name());
    for rel in rels {
        statements.extend(between_ddl(kind, catalog, rel)?);
    }

    info!(statements = statements.len(), "applying catalog schema");
    apply_schema_sql(exec, &statements).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentstore_core::{AttributeMeta, RelationshipMeta};

    fn catalog() -> std::sync::Arc<SchemaCatalog> {
        SchemaCatalog::builder()
            .entity(
                EntityMeta::new("acme", "Person")
                    .with_attribute(AttributeMeta::new("id", AttrType::Int).id())
                    .with_attribute(AttributeMeta::new("email", AttrType::String).unique())
                    .with_attribute(AttributeMeta::new("name", AttrType::String).indexed()),
            )
            .entity(
                EntityMeta::new("acme", "Team")
                    .with_attribute(AttributeMeta::new("id", AttrType::Int).id()),
            )
            .relationship(RelationshipMeta::new(
                "acme",
                "TeamMembers",
                RelationshipKind::Contains,
                "acme/Team",
                "acme/Person",
            ))
            .relationship(RelationshipMeta::new(
                "acme",
                "Mentorship",
                RelationshipKind::Between,
                "acme/Person",
                "acme/Person",
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn entity_table_carries_reserved_columns() {
        let catalog = catalog();
        let meta = catalog.lookup_entity("acme/Person").unwrap();
        let ddl = entity_ddl(StoreKind::Postgres, &catalog, meta);
        let table = &ddl[0];
        assert!(table.contains("\"__path__\" VARCHAR NOT NULL"));
        assert!(table.contains("\"__tenant__\" VARCHAR NOT NULL"));
        assert!(table.contains("\"__is_deleted__\" BOOLEAN NOT NULL DEFAULT FALSE"));
        // child side of a contains relationship gets the parent column
        assert!(table.contains("\"__parent__\""));
        assert!(table.contains("PRIMARY KEY (\"__path__\", \"__tenant__\")"));
        // unique per tenant, plain index otherwise
        assert!(ddl.iter().any(|s| s.contains(
            "CREATE UNIQUE INDEX IF NOT EXISTS \"uq_acme_person_email\""
        )));
        assert!(ddl
            .iter()
            .any(|s| s.contains("CREATE INDEX IF NOT EXISTS \"idx_acme_person_name\"")));
        // owners table is emitted alongside
        assert!(ddl.iter().any(|s| s.contains("\"acme_person_owners\"")));
    }

    #[test]
    fn parent_column_absent_on_uncontained_entities() {
        let catalog = catalog();
        let meta = catalog.lookup_entity("acme/Team").unwrap();
        let ddl = entity_ddl(StoreKind::Postgres, &catalog, meta);
        assert!(!ddl[0].contains(PARENT_ATTR));
    }

    #[test]
    fn vector_table_only_on_postgres() {
        assert!(vector_ddl(StoreKind::Postgres, "acme_doc", 384)
            .unwrap()
            .contains("vector(384)"));
        assert!(vector_ddl(StoreKind::Sqlite, "acme_doc", 384).is_none());
        assert!(vector_ddl(StoreKind::MySql, "acme_doc", 384).is_none());
    }

    #[test]
    fn between_table_names_endpoint_aliases() {
        let catalog = catalog();
        let rel = catalog.relationship("acme/Mentorship").unwrap();
        let ddl = between_ddl(StoreKind::Sqlite, &catalog, rel).unwrap();
        assert!(ddl[0].contains("\"a1\" TEXT NOT NULL"));
        assert!(ddl[0].contains("\"a2\" TEXT NOT NULL"));
    }

    #[test]
    fn mysql_indexes_are_inline() {
        let catalog = catalog();
        let meta = catalog.lookup_entity("acme/Person").unwrap();
        let ddl = entity_ddl(StoreKind::MySql, &catalog, meta);
        assert!(ddl[0].contains("UNIQUE KEY `uq_acme_person_email`"));
        assert!(ddl[0].contains("KEY `idx_acme_person_name`"));
        assert!(!ddl.iter().any(|s| s.starts_with("CREATE INDEX")));
    }
}
