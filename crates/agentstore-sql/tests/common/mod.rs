//! Shared fixtures for the resolver integration suites: an embedded SQLite
//! store in a temp directory and a small declared schema.

use std::sync::Arc;

use agentstore_core::{
    AttrType, AttributeMeta, CrudFlags, EntityMeta, RbacSpec, RelationshipKind, RelationshipMeta,
    SchemaCatalog,
};
use agentstore_sql::{SqlResolver, StorePool, StoreSettings};
use tempfile::TempDir;

pub fn acme_catalog() -> Arc<SchemaCatalog> {
    SchemaCatalog::builder()
        .entity(
            EntityMeta::new("acme", "Person")
                .with_attribute(AttributeMeta::new("id", AttrType::Int).id())
                .with_attribute(AttributeMeta::new("name", AttrType::String))
                .with_attribute(AttributeMeta::new("age", AttrType::Int)),
        )
        .entity(
            EntityMeta::new("acme", "Company")
                .with_attribute(AttributeMeta::new("id", AttrType::Int).id())
                .with_attribute(AttributeMeta::new("name", AttrType::String)),
        )
        .entity(
            EntityMeta::new("acme", "User")
                .with_attribute(AttributeMeta::new("id", AttrType::Int).id())
                .with_attribute(AttributeMeta::new("name", AttrType::String))
                .with_attribute(AttributeMeta::new("password", AttrType::String).write_only()),
        )
        .entity(
            EntityMeta::new("acme", "Account")
                .with_attribute(AttributeMeta::new("id", AttrType::Int).id())
                .with_attribute(AttributeMeta::new("balance", AttrType::Int)),
        )
        .entity(
            EntityMeta::new("acme", "Department")
                .with_attribute(AttributeMeta::new("id", AttrType::String).id())
                .with_attribute(AttributeMeta::new("name", AttrType::String)),
        )
        .entity(
            EntityMeta::new("acme", "Team")
                .with_attribute(AttributeMeta::new("id", AttrType::String).id()),
        )
        .entity(
            EntityMeta::new("acme", "Member")
                .with_attribute(AttributeMeta::new("id", AttrType::String).id())
                .with_attribute(AttributeMeta::new("name", AttrType::String)),
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
            "Spouse",
            RelationshipKind::OneToOne,
            "acme/Person",
            "acme/Person",
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
            "TeamMembers",
            RelationshipKind::Contains,
            "acme/Team",
            "acme/Member",
        ))
        .rbac(
            "acme/Account",
            RbacSpec {
                roles: vec!["accountant".to_string()],
                allow: CrudFlags::all(),
            },
        )
        .rbac(
            "acme/Department",
            RbacSpec {
                roles: vec!["manager".to_string()],
                allow: CrudFlags::all(),
            },
        )
        .rbac(
            "acme/Team",
            RbacSpec {
                roles: vec!["manager".to_string()],
                allow: CrudFlags::read_only(),
            },
        )
        .rbac(
            "acme/Member",
            RbacSpec {
                roles: vec!["manager".to_string()],
                allow: CrudFlags::read_only(),
            },
        )
        .build()
        .unwrap()
}

/// Resolver over a fresh SQLite database, schema applied. The temp dir
/// must stay alive for the duration of the test.
pub async fn sqlite_resolver(catalog: Arc<SchemaCatalog>) -> (SqlResolver, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("store.db");
    let settings = StoreSettings::sqlite_at(db_path.to_string_lossy().to_string());
    let pool = StorePool::connect(&settings).await.expect("sqlite pool");
    let resolver = SqlResolver::new(pool, catalog);
    resolver.ensure_schema().await.expect("schema");
    (resolver, dir)
}
