//! Resolver lifecycle against the embedded SQLite backend: create/read
//! round trips, ownership rows, soft-delete masking, tenant isolation,
//! operators, aggregates, and the transaction lifecycle.

mod common;

use agentstore_core::{
    AttrMap, DbContext, EntityResolver, Instance, QueryOp, StoreError,
};
use agentstore_sql::SqlQuery;
use serde_json::{json, Value};

fn person(id: i64, name: &str, age: i64) -> Instance {
    Instance::new("acme", "Person")
        .set_attr("id", json!(id))
        .set_attr("name", json!(name))
        .set_attr("age", json!(age))
}

fn by_id(id: i64) -> Instance {
    Instance::new("acme", "Person").query("id", QueryOp::Eq, json!(id))
}

#[tokio::test]
async fn create_then_read_round_trip() {
    let (resolver, _dir) = common::sqlite_resolver(common::acme_catalog()).await;
    let ctx = DbContext::new("U1").with_tenant("T1");

    let created = resolver
        .create_instance(&ctx, &person(101, "Joe", 23))
        .await
        .unwrap();
    assert_eq!(created.path(), Some("acme$Person/101"));
    assert_eq!(created.tenant(), Some("T1"));

    // the creator holds a full-CRUD owner row on the new path
    let owners = resolver
        .executor()
        .fetch_all(
            None,
            &SqlQuery {
                sql: "SELECT * FROM acme_person_owners".to_string(),
                params: vec![],
            },
        )
        .await
        .unwrap();
    assert_eq!(owners.len(), 1);
    let row = &owners[0];
    assert_eq!(row.get("path"), Some(&json!("acme$Person/101")));
    assert_eq!(row.get("user_id"), Some(&json!("U1")));
    assert_eq!(row.get("__tenant__"), Some(&json!("T1")));
    for flag in ["c", "r", "u", "d"] {
        assert_eq!(row.get(flag), Some(&json!(true)), "owner flag {flag}");
    }

    let results = resolver
        .query_instances(&ctx, &by_id(101), false, false)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].attr("name"), Some(&json!("Joe")));
    assert_eq!(results[0].attr("age"), Some(&json!(23)));
    assert_eq!(results[0].path(), Some("acme$Person/101"));
}

#[tokio::test]
async fn duplicate_id_in_same_tenant_is_rejected() {
    let (resolver, _dir) = common::sqlite_resolver(common::acme_catalog()).await;
    let ctx = DbContext::new("U1").with_tenant("T1");

    resolver
        .create_instance(&ctx, &person(7, "Ann", 31))
        .await
        .unwrap();
    let err = resolver
        .create_instance(&ctx, &person(7, "Ann again", 32))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateId(_)), "got {err:?}");
}

#[tokio::test]
async fn soft_delete_masks_then_purge_removes() {
    let (resolver, _dir) = common::sqlite_resolver(common::acme_catalog()).await;
    let ctx = DbContext::new("U1").with_tenant("T1");

    let created = resolver
        .create_instance(&ctx, &person(101, "Joe", 23))
        .await
        .unwrap();

    resolver
        .delete_instance(&ctx, &created, false)
        .await
        .unwrap();
    let visible = resolver
        .query_instances(&ctx, &Instance::new("acme", "Person"), true, false)
        .await
        .unwrap();
    assert!(visible.is_empty(), "soft-deleted rows must be masked");

    resolver
        .delete_instance(&ctx, &created, true)
        .await
        .unwrap();
    let raw = resolver
        .executor()
        .fetch_all(
            None,
            &SqlQuery {
                sql: "SELECT * FROM acme_person".to_string(),
                params: vec![],
            },
        )
        .await
        .unwrap();
    assert!(raw.is_empty(), "purge removes the underlying row");
}

#[tokio::test]
async fn tenants_are_isolated() {
    let (resolver, _dir) = common::sqlite_resolver(common::acme_catalog()).await;
    let ctx1 = DbContext::new("U1").with_tenant("T1");
    let ctx2 = DbContext::new("U2").with_tenant("T2");

    resolver
        .create_instance(&ctx1, &person(101, "Joe", 23))
        .await
        .unwrap();
    // same id in another tenant succeeds
    resolver
        .create_instance(&ctx2, &person(101, "Jo", 55))
        .await
        .unwrap();

    let t1 = resolver
        .query_instances(&ctx1, &by_id(101), false, false)
        .await
        .unwrap();
    assert_eq!(t1.len(), 1);
    assert_eq!(t1[0].attr("name"), Some(&json!("Joe")));
    assert_eq!(t1[0].tenant(), Some("T1"));

    let t2 = resolver
        .query_instances(&ctx2, &by_id(101), false, false)
        .await
        .unwrap();
    assert_eq!(t2.len(), 1);
    assert_eq!(t2[0].attr("name"), Some(&json!("Jo")));
}

#[tokio::test]
async fn update_merges_attributes() {
    let (resolver, _dir) = common::sqlite_resolver(common::acme_catalog()).await;
    let ctx = DbContext::new("U1").with_tenant("T1");

    let created = resolver
        .create_instance(&ctx, &person(5, "Joe", 23))
        .await
        .unwrap();
    let updated = resolver
        .update_instance(
            &ctx,
            &created,
            AttrMap::from([("age".to_string(), json!(24))]),
        )
        .await
        .unwrap();
    assert_eq!(updated.attr("age"), Some(&json!(24)));
    assert_eq!(updated.attr("name"), Some(&json!("Joe")));

    let read = resolver
        .query_instances(&ctx, &by_id(5), false, false)
        .await
        .unwrap();
    assert_eq!(read[0].attr("age"), Some(&json!(24)));
}

#[tokio::test]
async fn upsert_is_idempotent_and_writes_no_owner_rows() {
    let (resolver, _dir) = common::sqlite_resolver(common::acme_catalog()).await;
    let ctx = DbContext::new("U1").with_tenant("T1");

    resolver
        .upsert_instance(&ctx, &person(9, "Seed", 1))
        .await
        .unwrap();
    resolver
        .upsert_instance(&ctx, &person(9, "Seed v2", 2))
        .await
        .unwrap();

    let rows = resolver
        .query_instances(&ctx, &by_id(9), false, false)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].attr("name"), Some(&json!("Seed v2")));

    let owners = resolver
        .executor()
        .fetch_all(
            None,
            &SqlQuery {
                sql: "SELECT * FROM acme_person_owners".to_string(),
                params: vec![],
            },
        )
        .await
        .unwrap();
    assert!(owners.is_empty());
}

#[tokio::test]
async fn write_only_attributes_never_come_back() {
    let (resolver, _dir) = common::sqlite_resolver(common::acme_catalog()).await;
    let ctx = DbContext::new("U1").with_tenant("T1");

    let user = Instance::new("acme", "User")
        .set_attr("id", json!(1))
        .set_attr("name", json!("root"))
        .set_attr("password", json!("s3cret"));
    resolver.create_instance(&ctx, &user).await.unwrap();

    let read = resolver
        .query_instances(
            &ctx,
            &Instance::new("acme", "User").query("id", QueryOp::Eq, json!(1)),
            false,
            false,
        )
        .await
        .unwrap();
    assert_eq!(read.len(), 1);
    assert!(read[0].attr("password").is_none());
    assert_eq!(read[0].attr("name"), Some(&json!("root")));
}

#[tokio::test]
async fn operators_between_like_and_null() {
    let (resolver, _dir) = common::sqlite_resolver(common::acme_catalog()).await;
    let ctx = DbContext::new("U1").with_tenant("T1");

    for (id, name, age) in [(1, "Joe", 23), (2, "Johanna", 35), (3, "Bo", 52)] {
        resolver
            .create_instance(&ctx, &person(id, name, age))
            .await
            .unwrap();
    }

    let between = resolver
        .query_instances(
            &ctx,
            &Instance::new("acme", "Person").query("age", QueryOp::Between, json!([20, 40])),
            false,
            false,
        )
        .await
        .unwrap();
    assert_eq!(between.len(), 2);

    let like = resolver
        .query_instances(
            &ctx,
            &Instance::new("acme", "Person").query("name", QueryOp::Like, json!("Jo%")),
            false,
            false,
        )
        .await
        .unwrap();
    assert_eq!(like.len(), 2);

    // `=` against null rewrites to IS NULL; ordering operators refuse null
    let none = resolver
        .query_instances(
            &ctx,
            &Instance::new("acme", "Person").query("name", QueryOp::Eq, Value::Null),
            false,
            false,
        )
        .await
        .unwrap();
    assert!(none.is_empty());

    let err = resolver
        .query_instances(
            &ctx,
            &Instance::new("acme", "Person").query("age", QueryOp::Lt, Value::Null),
            false,
            false,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidNullComparison(_)));

    let err = resolver
        .query_instances(
            &ctx,
            &Instance::new("acme", "Person").query("age", QueryOp::Between, json!(20)),
            false,
            false,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidInput(_)));
}

#[tokio::test]
async fn aggregates_group_and_order() {
    let (resolver, _dir) = common::sqlite_resolver(common::acme_catalog()).await;
    let ctx = DbContext::new("U1").with_tenant("T1");

    for (id, name, age) in [(1, "Joe", 23), (2, "Joe", 35), (3, "Bo", 52)] {
        resolver
            .create_instance(&ctx, &person(id, name, age))
            .await
            .unwrap();
    }

    let mut inst = Instance::new("acme", "Person");
    inst.aggregates.insert(
        "headcount".to_string(),
        agentstore_core::Aggregate::count_all(),
    );
    inst.group_by.push("name".to_string());
    inst.order_by.push("name".to_string());

    let rows = resolver
        .query_instances(&ctx, &inst, true, false)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].attr("headcount"), Some(&json!(1))); // Bo
    assert_eq!(rows[1].attr("headcount"), Some(&json!(2))); // Joe
}

#[tokio::test]
async fn transaction_read_your_writes_and_rollback() {
    let (resolver, _dir) = common::sqlite_resolver(common::acme_catalog()).await;
    let ctx = DbContext::new("U1").with_tenant("T1");

    let txn = resolver.start_transaction(&ctx).await.unwrap();
    resolver
        .create_instance(&ctx, &person(42, "Ephemeral", 1))
        .await
        .unwrap();

    // visible inside the transaction
    let inside = resolver
        .query_instances(&ctx, &by_id(42), false, false)
        .await
        .unwrap();
    assert_eq!(inside.len(), 1);

    resolver.rollback_transaction(&ctx, &txn).await.unwrap();
    let after = resolver
        .query_instances(&ctx, &by_id(42), false, false)
        .await
        .unwrap();
    assert!(after.is_empty(), "rollback discards the insert");
}

#[tokio::test]
async fn transaction_commit_persists() {
    let (resolver, _dir) = common::sqlite_resolver(common::acme_catalog()).await;
    let ctx = DbContext::new("U1").with_tenant("T1");

    let txn = resolver.start_transaction(&ctx).await.unwrap();
    resolver
        .create_instance(&ctx, &person(43, "Durable", 2))
        .await
        .unwrap();
    resolver.commit_transaction(&ctx, &txn).await.unwrap();

    let rows = resolver
        .query_instances(&ctx, &by_id(43), false, false)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn second_transaction_on_same_resolver_fails() {
    let (resolver, _dir) = common::sqlite_resolver(common::acme_catalog()).await;
    let ctx = DbContext::new("U1").with_tenant("T1");

    let txn = resolver.start_transaction(&ctx).await.unwrap();
    let err = resolver.start_transaction(&ctx).await.unwrap_err();
    assert!(matches!(err, StoreError::TransactionAlreadyActive));
    resolver.rollback_transaction(&ctx, &txn).await.unwrap();

    // released: a fresh transaction may start now
    let txn2 = resolver.start_transaction(&ctx).await.unwrap();
    resolver.commit_transaction(&ctx, &txn2).await.unwrap();
}

#[tokio::test]
async fn closing_an_unknown_transaction_fails() {
    let (resolver, _dir) = common::sqlite_resolver(common::acme_catalog()).await;
    let ctx = DbContext::new("U1").with_tenant("T1");
    let err = resolver
        .commit_transaction(&ctx, "no-such-txn")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::TransactionNotFound(_)));
}

#[tokio::test]
async fn nested_values_round_trip_as_json_strings() {
    let (resolver, _dir) = common::sqlite_resolver(common::acme_catalog()).await;
    let ctx = DbContext::new("U1").with_tenant("T1");

    let inst = Instance::new("acme", "Person")
        .set_attr("id", json!(77))
        .set_attr("name", json!({"first": "Joe", "last": "Doe"}))
        .set_attr("age", json!(23));
    resolver.create_instance(&ctx, &inst).await.unwrap();

    let read = resolver
        .query_instances(&ctx, &by_id(77), false, false)
        .await
        .unwrap();
    // nested objects are stored as their JSON encoding
    assert_eq!(
        read[0].attr("name"),
        Some(&json!("{\"first\":\"Joe\",\"last\":\"Doe\"}"))
    );
}
