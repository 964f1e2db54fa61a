/// Mock embedder for testing and keyless operation.
///
/// Produces deterministic, L2-normalized vectors from a text digest, so
/// similarity comparisons behave consistently without a real model.
use sha2::{Digest, Sha256};

use super::{Embedder, EmbedderError};

/// A mock embedder that derives vectors from a SHA-256 of the input.
pub struct MockEmbedder {
    dimensions: usize,
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self { dimensions: 384 }
    }
}

impl Embedder for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let digest = Sha256::digest(text.as_bytes());

        let mut embedding = Vec::with_capacity(self.dimensions);
        for i in 0..self.dimensions {
            let byte = digest[i % digest.len()];
            // Mix the position in so long vectors are not 32-periodic
            let mixed = byte.wrapping_mul(31).wrapping_add((i / digest.len()) as u8);
            embedding.push(f32::from(mixed) / 255.0 - 0.5);
        }

        // L2 normalize
        let norm_sq: f32 = embedding.iter().map(|v| v * v).sum();
        if norm_sq > 0.0 {
            let inv = 1.0 / norm_sq.sqrt();
            for v in &mut embedding {
                *v *= inv;
            }
        }

        Ok(embedding)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_embed_dimensions() {
        let embedder = MockEmbedder::new(384);
        let result = embedder.embed("hello world").unwrap();
        assert_eq!(result.len(), 384);
    }

    #[test]
    fn test_mock_embed_deterministic() {
        let embedder = MockEmbedder::new(384);
        let a = embedder.embed("hello").unwrap();
        let b = embedder.embed("hello").unwrap();
        assert_eq!(a, b, "same input should produce same output");
    }

    #[test]
    fn test_mock_embed_different_inputs() {
        let embedder = MockEmbedder::new(384);
        let a = embedder.embed("hello").unwrap();
        let b = embedder.embed("world").unwrap();
        assert_ne!(a, b, "different inputs should produce different outputs");
    }

    #[test]
    fn test_mock_embed_normalized() {
        let embedder = MockEmbedder::new(384);
        let vec = embedder.embed("test normalization").unwrap();
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!(
            (norm - 1.0).abs() < 0.01,
            "vector should be approximately unit length, got {norm}"
        );
    }

    #[test]
    fn test_mock_embed_batch() {
        let embedder = MockEmbedder::new(64);
        let results = embedder.embed_batch(&["a", "b", "c"]).unwrap();
        assert_eq!(results.len(), 3);
        for vec in &results {
            assert_eq!(vec.len(), 64);
        }
    }
}
