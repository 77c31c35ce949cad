//! Agentstore vector layer.
//!
//! Semantic lookup is an auxiliary index over the row store: text from
//! full-text-search attributes is embedded by a provider and stored either
//! in a relational vector table (implemented by the SQL crate) or in the
//! embedded per-module LMDB store found here. The row store stays the
//! source of truth; every failure in this layer is logged and swallowed by
//! the caller.

pub mod chunker;
pub mod embedded;
pub mod embedder;
pub mod index;

pub use chunker::{embed_chunked, Chunker};
pub use embedded::{EmbeddedVectorIndex, EmbeddedVectorStore};
pub use embedder::{Embedder, Embedding, HashingEmbedder, HttpEmbedder, SharedEmbedder};
pub use index::{DisabledVectorIndex, VectorDoc, VectorHit, VectorIndex};
