//! Embedded vector store backed by LMDB.
//!
//! One LMDB environment per module, opened lazily on first use and cached;
//! cached handles are treated as immutable afterwards. Records are keyed by
//! entity path and bincode-serialized. Search is an in-process scan ranked
//! by Euclidean distance, which matches the ordering the relational vector
//! backend gets from its distance operator.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use heed::types::{SerdeBincode, Str};
use heed::{Database, Env, EnvOpenOptions};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use agentstore_core::catalog::sanitize_identifier;
use agentstore_core::{Result, StoreError};

use crate::index::{VectorDoc, VectorHit, VectorIndex};

#[derive(Debug, Serialize, Deserialize)]
struct StoredEmbedding {
    id: String,
    embedding: Vec<f32>,
    tenant: String,
}

#[derive(Clone)]
struct ModuleHandle {
    env: Env,
    db: Database<Str, SerdeBincode<StoredEmbedding>>,
}

/// Cache of per-module LMDB environments under one root directory.
pub struct EmbeddedVectorStore {
    root: PathBuf,
    map_size_mb: usize,
    handles: Mutex<HashMap<String, ModuleHandle>>,
}

impl EmbeddedVectorStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_map_size(root, 256)
    }

    pub fn with_map_size(root: impl Into<PathBuf>, map_size_mb: usize) -> Self {
        Self {
            root: root.into(),
            map_size_mb,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Index handle scoped to one module's store.
    pub fn index_for(self: &Arc<Self>, module: impl Into<String>) -> EmbeddedVectorIndex {
        EmbeddedVectorIndex {
            store: Arc::clone(self),
            module: module.into(),
        }
    }

    async fn handle(&self, module: &str) -> Result<ModuleHandle> {
        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.get(module) {
            return Ok(handle.clone());
        }

        let dir = self.root.join(sanitize_identifier(module));
        std::fs::create_dir_all(&dir)
            .map_err(|e| StoreError::Backend(anyhow!("create vector store dir: {e}")))?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(self.map_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(&dir)
        }
        .map_err(lmdb_err)?;

        let mut wtxn = env.write_txn().map_err(lmdb_err)?;
        let db: Database<Str, SerdeBincode<StoredEmbedding>> =
            env.create_database(&mut wtxn, None).map_err(lmdb_err)?;
        wtxn.commit().map_err(lmdb_err)?;

        debug!(module, path = %dir.display(), "opened embedded vector store");
        let handle = ModuleHandle { env, db };
        handles.insert(module.to_string(), handle.clone());
        Ok(handle)
    }

    async fn put(&self, module: &str, doc: &VectorDoc) -> Result<()> {
        let handle = self.handle(module).await?;
        let record = StoredEmbedding {
            id: doc.id.clone(),
            embedding: doc.embedding.clone(),
            tenant: doc.tenant.clone(),
        };
        let mut wtxn = handle.env.write_txn().map_err(lmdb_err)?;
        handle
            .db
            .put(&mut wtxn, &doc.id, &record)
            .map_err(lmdb_err)?;
        wtxn.commit().map_err(lmdb_err)
    }

    async fn search(
        &self,
        module: &str,
        embedding: &[f32],
        tenant: &str,
        limit: usize,
    ) -> Result<Vec<VectorHit>> {
        let handle = self.handle(module).await?;
        let rtxn = handle.env.read_txn().map_err(lmdb_err)?;
        let mut scored: Vec<(f32, String)> = Vec::new();
        for entry in handle.db.iter(&rtxn).map_err(lmdb_err)? {
            let (_, record) = entry.map_err(lmdb_err)?;
            if record.tenant != tenant || record.embedding.len() != embedding.len() {
                continue;
            }
            scored.push((euclidean(&record.embedding, embedding), record.id));
        }
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        scored.truncate(limit);
        Ok(scored
            .into_iter()
            .map(|(_, id)| VectorHit { id })
            .collect())
    }

    async fn exists(&self, module: &str, id: &str) -> Result<bool> {
        let handle = self.handle(module).await?;
        let rtxn = handle.env.read_txn().map_err(lmdb_err)?;
        Ok(handle.db.get(&rtxn, id).map_err(lmdb_err)?.is_some())
    }

    async fn delete(&self, module: &str, id: &str) -> Result<()> {
        let handle = self.handle(module).await?;
        let mut wtxn = handle.env.write_txn().map_err(lmdb_err)?;
        handle.db.delete(&mut wtxn, id).map_err(lmdb_err)?;
        wtxn.commit().map_err(lmdb_err)
    }
}

fn lmdb_err(e: heed::Error) -> StoreError {
    StoreError::Backend(anyhow!("embedded vector store: {e}"))
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// [`VectorIndex`] over one module's embedded store.
#[derive(Clone)]
pub struct EmbeddedVectorIndex {
    store: Arc<EmbeddedVectorStore>,
    module: String,
}

#[async_trait]
impl VectorIndex for EmbeddedVectorIndex {
    async fn add_embedding(&self, doc: &VectorDoc) -> Result<()> {
        self.store.put(&self.module, doc).await
    }

    async fn search(&self, embedding: &[f32], tenant: &str, limit: usize) -> Result<Vec<VectorHit>> {
        self.store.search(&self.module, embedding, tenant, limit).await
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        self.store.exists(&self.module, id).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(&self.module, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, embedding: Vec<f32>, tenant: &str) -> VectorDoc {
        VectorDoc {
            id: id.to_string(),
            embedding,
            tenant: tenant.to_string(),
        }
    }

    #[tokio::test]
    async fn add_search_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(EmbeddedVectorStore::with_map_size(dir.path(), 16));
        let index = store.index_for("acme");

        index.add_embedding(&doc("p/1", vec![0.0, 0.0], "t1")).await.unwrap();
        index.add_embedding(&doc("p/2", vec![1.0, 1.0], "t1")).await.unwrap();
        index.add_embedding(&doc("p/3", vec![0.1, 0.1], "t1")).await.unwrap();

        let hits = index.search(&[0.0, 0.0], "t1", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "p/1");
        assert_eq!(hits[1].id, "p/3");

        assert!(index.exists("p/2").await.unwrap());
        index.delete("p/2").await.unwrap();
        assert!(!index.exists("p/2").await.unwrap());
    }

    #[tokio::test]
    async fn search_is_tenant_scoped() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(EmbeddedVectorStore::with_map_size(dir.path(), 16));
        let index = store.index_for("acme");

        index.add_embedding(&doc("t1/doc", vec![0.0, 0.0], "t1")).await.unwrap();
        index.add_embedding(&doc("t2/doc", vec![0.0, 0.0], "t2")).await.unwrap();

        let hits = index.search(&[0.0, 0.0], "t1", 10).await.unwrap();
        assert_eq!(hits, vec![VectorHit { id: "t1/doc".to_string() }]);
    }

    #[tokio::test]
    async fn modules_are_isolated_stores() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(EmbeddedVectorStore::with_map_size(dir.path(), 16));

        store
            .index_for("acme")
            .add_embedding(&doc("p/1", vec![1.0], "t1"))
            .await
            .unwrap();
        let other = store.index_for("globex");
        assert!(!other.exists("p/1").await.unwrap());
    }
}
