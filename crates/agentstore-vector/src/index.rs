//! Vector index port - embedding upsert/search/delete over either backend.

use async_trait::async_trait;

use agentstore_core::Result;

/// One indexed document: the entity path, its embedding, and the tenant
/// that wrote it.
#[derive(Debug, Clone)]
pub struct VectorDoc {
    pub id: String,
    pub embedding: Vec<f32>,
    pub tenant: String,
}

/// One nearest-neighbor hit, closest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorHit {
    pub id: String,
}

/// Abstract embedding store addressed by entity path.
///
/// `is_supported` gates all embedding work: an FTS-enabled entity on a
/// backend without vector support still CRUDs normally, it just skips the
/// auxiliary index.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn is_supported(&self) -> bool {
        true
    }

    async fn add_embedding(&self, doc: &VectorDoc) -> Result<()>;

    /// Top-`limit` ids nearest to `embedding`, restricted to `tenant`.
    async fn search(&self, embedding: &[f32], tenant: &str, limit: usize) -> Result<Vec<VectorHit>>;

    async fn exists(&self, id: &str) -> Result<bool>;

    async fn delete(&self, id: &str) -> Result<()>;
}

/// The no-backend variant: reports unsupported and ignores every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledVectorIndex;

#[async_trait]
impl VectorIndex for DisabledVectorIndex {
    fn is_supported(&self) -> bool {
        false
    }

    async fn add_embedding(&self, _doc: &VectorDoc) -> Result<()> {
        Ok(())
    }

    async fn search(
        &self,
        _embedding: &[f32],
        _tenant: &str,
        _limit: usize,
    ) -> Result<Vec<VectorHit>> {
        Ok(Vec::new())
    }

    async fn exists(&self, _id: &str) -> Result<bool> {
        Ok(false)
    }

    async fn delete(&self, _id: &str) -> Result<()> {
        Ok(())
    }
}
