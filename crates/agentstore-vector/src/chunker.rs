//! Text chunking for long full-text-search values.
//!
//! A row's FTS text that fits in one chunk embeds directly; longer texts
//! embed chunk by chunk and the stored vector is the dimension-wise average.

use agentstore_core::{Result, StoreError};

use crate::embedder::{Embedder, Embedding};

/// Character-window chunker with overlap between consecutive windows.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    pub size: usize,
    pub overlap: usize,
}

impl Chunker {
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        if size == 0 || overlap >= size {
            return Err(StoreError::InvalidInput(format!(
                "chunker requires 0 <= overlap < size, got size={size} overlap={overlap}"
            )));
        }
        Ok(Self { size, overlap })
    }

    pub fn chunks(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        if chars.len() <= self.size {
            return vec![text.to_string()];
        }
        let step = self.size - self.overlap;
        let mut out = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + self.size).min(chars.len());
            out.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }
        out
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            size: 2000,
            overlap: 200,
        }
    }
}

/// Dimension-wise average of a non-empty set of embeddings.
fn average(vectors: &[Embedding]) -> Result<Embedding> {
    let dim = vectors
        .first()
        .map(Vec::len)
        .ok_or_else(|| StoreError::InvalidInput("cannot average zero embeddings".into()))?;
    let mut acc = vec![0.0f32; dim];
    for v in vectors {
        if v.len() != dim {
            return Err(StoreError::InvalidInput(format!(
                "embedding dimension mismatch: {} vs {dim}",
                v.len()
            )));
        }
        for (slot, x) in acc.iter_mut().zip(v) {
            *slot += x;
        }
    }
    let n = vectors.len() as f32;
    for slot in &mut acc {
        *slot /= n;
    }
    Ok(acc)
}

/// Embed `text` through `chunker`: direct for a single chunk, averaged for
/// several.
pub async fn embed_chunked(
    embedder: &dyn Embedder,
    chunker: &Chunker,
    text: &str,
) -> Result<Embedding> {
    let chunks = chunker.chunks(text);
    if chunks.len() == 1 {
        return embedder.embed(&chunks[0]).await;
    }
    let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
    let embeddings = embedder.embed_batch(&refs).await?;
    average(&embeddings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashingEmbedder;

    #[test]
    fn short_text_is_one_chunk() {
        let chunker = Chunker::new(100, 10).unwrap();
        assert_eq!(chunker.chunks("hello"), vec!["hello".to_string()]);
    }

    #[test]
    fn windows_overlap() {
        let chunker = Chunker::new(4, 2).unwrap();
        let chunks = chunker.chunks("abcdefgh");
        assert_eq!(chunks, vec!["abcd", "cdef", "efgh"]);
    }

    #[test]
    fn degenerate_parameters_rejected() {
        assert!(Chunker::new(0, 0).is_err());
        assert!(Chunker::new(4, 4).is_err());
    }

    #[test]
    fn average_is_dimension_wise() {
        let avg = average(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        assert_eq!(avg, vec![0.5, 0.5]);
        assert!(average(&[]).is_err());
        assert!(average(&[vec![1.0], vec![1.0, 2.0]]).is_err());
    }

    #[tokio::test]
    async fn long_text_embeds_to_provider_dimension() {
        let embedder = HashingEmbedder::new(16);
        let chunker = Chunker::new(8, 2).unwrap();
        let text = "alpha beta gamma delta epsilon zeta";
        let v = embed_chunked(&embedder, &chunker, text).await.unwrap();
        assert_eq!(v.len(), 16);
    }
}
