use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

/// Default dimension of the [`HashingEmbedder`].
pub const DEFAULT_HASHING_DIMENSION: usize = 384;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmbedError {
    /// The backend refused the call because of quota or request rate.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The backend could not be reached.
    #[error("network failure: {0}")]
    Network(String),

    #[error("embedding backend error: {0}")]
    Backend(String),
}

/// Produces embedding vectors for chunks and queries.
///
/// Backends may be slow and may be rate limited. Raw backend failures are
/// mapped onto [`EmbedError`] with [`classify_backend_error`], so callers
/// can tell a retry-later condition from a hard failure.
pub trait Embedder: Send + Sync {
    /// Embed a batch of document chunks. The output has one vector per input.
    fn embed_documents(
        &self,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Embed a search query.
    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

const RATE_LIMIT_MARKERS: &[&str] = &[
    "429",
    "rate limit",
    "rate-limit",
    "ratelimit",
    "too many requests",
    "quota",
    "resource exhausted",
    "resource_exhausted",
];

const NETWORK_MARKERS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection closed",
    "dns",
    "network",
    "timed out",
    "timeout",
    "unreachable",
    "econnreset",
    "econnrefused",
    "fetch failed",
];

/// Classify a raw backend error message.
///
/// # Examples
///
/// ```
/// use docsift::embedding::{classify_backend_error, EmbedError};
///
/// let err = classify_backend_error("HTTP 429 Too Many Requests");
/// assert!(matches!(err, EmbedError::RateLimited(_)));
///
/// let err = classify_backend_error("RESOURCE_EXHAUSTED: quota exceeded");
/// assert!(matches!(err, EmbedError::RateLimited(_)));
///
/// let err = classify_backend_error("tensor shape mismatch");
/// assert!(matches!(err, EmbedError::Backend(_)));
/// ```
pub fn classify_backend_error(message: impl Into<String>) -> EmbedError {
    let message = message.into();
    let lower = message.to_lowercase();

    if RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m)) {
        EmbedError::RateLimited(message)
    } else if NETWORK_MARKERS.iter().any(|m| lower.contains(m)) {
        EmbedError::Network(message)
    } else {
        EmbedError::Backend(message)
    }
}

/// Scale a vector to unit length in place. Zero vectors are left as is.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity. Returns 0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

/// Offline embedder based on signed feature hashing of lowercase words.
///
/// It carries no semantic knowledge beyond shared vocabulary, but it is
/// deterministic and needs no model download, which makes it useful for
/// air-gapped installs and for tests.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMENSION)
    }
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let h = hasher.finish();
            let slot = (h % self.dimension as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }
        normalize(&mut vector);
        vector
    }
}

impl Embedder for HashingEmbedder {
    fn embed_documents(
        &self,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        Ok(self.embed(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_rate_limits() {
        for msg in [
            "status 429",
            "Rate limit reached for requests",
            "You exceeded your current quota",
            "RESOURCE_EXHAUSTED",
            "Resource exhausted (e.g. check quota).",
        ] {
            assert!(
                matches!(
                    classify_backend_error(msg),
                    EmbedError::RateLimited(_)
                ),
                "{msg} should classify as rate limited"
            );
        }
    }

    #[test]
    fn classify_network() {
        assert!(matches!(
            classify_backend_error("error sending request: connection refused"),
            EmbedError::Network(_)
        ));
        assert!(matches!(
            classify_backend_error("TypeError: fetch failed"),
            EmbedError::Network(_)
        ));
    }

    #[test]
    fn classify_keeps_original_message() {
        let err = classify_backend_error("weird failure");
        assert_eq!(err, EmbedError::Backend("weird failure".to_string()));
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = [0.3, 0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&v, &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn hashing_embedder_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed_query("Rust programming language").unwrap();
        let b = embedder.embed_query("rust PROGRAMMING language").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn hashing_embedder_prefers_shared_vocabulary() {
        let embedder = HashingEmbedder::default();
        let docs = embedder
            .embed_documents(&[
                "boil the pasta in salted water".to_string(),
                "rust ownership and borrowing".to_string(),
            ])
            .unwrap();
        let query = embedder.embed_query("borrowing in rust").unwrap();

        let relevant = cosine_similarity(&query, &docs[1]);
        assert!(relevant > cosine_similarity(&query, &docs[0]));
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let embedder = HashingEmbedder::new(8);
        let v = embedder.embed_query("   ").unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
