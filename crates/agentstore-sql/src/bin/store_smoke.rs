//! End-to-end smoke run against the configured backend.
//!
//! Reads the store settings from the environment (defaulting to an embedded
//! SQLite file), applies the demo schema, writes one instance, and reads it
//! back. Useful for checking a deployment's configuration without the full
//! platform on top.

use agentstore_core::{
    AttrType, AttributeMeta, DbContext, EntityMeta, EntityResolver, Instance, SchemaCatalog,
};
use agentstore_sql::{EmbeddingSettings, SqlResolver, StoreSettings, VectorSettings};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let catalog = SchemaCatalog::builder()
        .entity(
            EntityMeta::new("demo", "Note")
                .with_attribute(AttributeMeta::new("text", AttrType::String))
                .with_attribute(AttributeMeta::new("created_by", AttrType::String)),
        )
        .build()?;

    let store = StoreSettings::default();
    println!("store: {}", store.masked_url());
    let resolver = SqlResolver::from_settings(
        catalog,
        &store,
        &VectorSettings::default(),
        &EmbeddingSettings::default(),
    )
    .await?;
    resolver.ensure_schema().await?;

    let ctx = DbContext::new("smoke");
    let note = Instance::new("demo", "Note")
        .set_attr("text", json!("hello from the smoke run"))
        .set_attr("created_by", json!("store_smoke"));
    let created = resolver.create_instance(&ctx, &note).await?;
    println!("created {}", created.path().unwrap_or_default());

    let notes = resolver
        .query_instances(&ctx, &Instance::new("demo", "Note"), true, false)
        .await?;
    println!("{} note(s) visible", notes.len());
    Ok(())
}
