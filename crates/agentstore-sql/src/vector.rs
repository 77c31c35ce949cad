//! Relational vector index over pgvector.
//!
//! One `{table}_vec` table per FTS-enabled entity, keyed by entity path.
//! Nearest-neighbor search orders by the pgvector distance operator and is
//! tenant- and soft-delete-filtered. Owner restrictions for guarded
//! entities are applied by the resolver on the returned paths.

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::PgPool;
use sqlx::Row as SqlxRow;

use agentstore_core::{Result, StoreError};
use agentstore_vector::{VectorDoc, VectorHit, VectorIndex};

#[derive(Clone)]
pub struct RelationalVectorIndex {
    pool: PgPool,
    table: String,
}

impl RelationalVectorIndex {
    /// `table` is the already-derived vector table name (`{entity}_vec`).
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.into())
}

#[async_trait]
impl VectorIndex for RelationalVectorIndex {
    async fn add_embedding(&self, doc: &VectorDoc) -> Result<()> {
        let sql = format!(
            r#"
            INSERT INTO "{t}" ("id", "embedding", "__tenant__", "__is_deleted__")
            VALUES ($1, $2, $3, FALSE)
            ON CONFLICT ("id") DO UPDATE
            SET "embedding" = excluded."embedding",
                "__tenant__" = excluded."__tenant__",
                "__is_deleted__" = FALSE
            "#,
            t = self.table
        );
        sqlx::query(&sql)
            .bind(&doc.id)
            .bind(Vector::from(doc.embedding.clone()))
            .bind(&doc.tenant)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn search(&self, embedding: &[f32], tenant: &str, limit: usize) -> Result<Vec<VectorHit>> {
        let sql = format!(
            r#"
            SELECT "id" FROM "{t}"
            WHERE "__tenant__" = $2 AND "__is_deleted__" = FALSE
            ORDER BY "embedding" <-> $1
            LIMIT $3
            "#,
            t = self.table
        );
        let rows = sqlx::query(&sql)
            .bind(Vector::from(embedding.to_vec()))
            .bind(tenant)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.into_iter()
            .map(|row| {
                row.try_get::<String, _>("id")
                    .map(|id| VectorHit { id })
                    .map_err(backend)
            })
            .collect()
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let sql = format!(
            r#"SELECT COUNT(*) AS cnt FROM "{t}" WHERE "id" = $1 AND "__is_deleted__" = FALSE"#,
            t = self.table
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        let count: i64 = row.try_get("cnt").map_err(backend)?;
        Ok(count > 0)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let sql = format!(r#"DELETE FROM "{t}" WHERE "id" = $1"#, t = self.table);
        sqlx::query(&sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }
}
