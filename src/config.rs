use std::{str::FromStr, sync::Arc, time::Duration};

use crate::{
    chunking::{ChunkingConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE},
    embedding::{DEFAULT_HASHING_DIMENSION, Embedder, HashingEmbedder},
    error::{Error, Result},
    model_manager::ColbertEmbedder,
    snapshot::DEFAULT_RETENTION,
    vector_index::DEFAULT_EMBED_BATCH_SIZE,
};

/// Default bound on a single embedding round trip.
pub const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(120);

/// Default bound on extracting the text of one upload.
pub const DEFAULT_EXTRACT_TIMEOUT: Duration = Duration::from_secs(60);

const HASHING_BACKEND: &str = "hashing";

/// Which embedding backend the vector index uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingBackend {
    /// Deterministic feature hashing, no model download.
    Hashing { dimension: usize },
    /// A ColBERT model: HuggingFace id or local path.
    Colbert { model: String },
}

impl FromStr for EmbeddingBackend {
    type Err = Error;

    /// `hashing`, `hashing:<dimension>`, or a ColBERT model id.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::Config(
                "embedding model name is empty".into(),
            ));
        }
        match s.split_once(':') {
            None if s == HASHING_BACKEND => Ok(EmbeddingBackend::Hashing {
                dimension: DEFAULT_HASHING_DIMENSION,
            }),
            Some((HASHING_BACKEND, dim)) => match dim.parse::<usize>() {
                Ok(dimension) if dimension > 0 => {
                    Ok(EmbeddingBackend::Hashing { dimension })
                }
                _ => Err(Error::Config(format!(
                    "invalid hashing dimension: {dim}"
                ))),
            },
            _ => Ok(EmbeddingBackend::Colbert {
                model: s.to_string(),
            }),
        }
    }
}

impl EmbeddingBackend {
    pub fn build(&self) -> Arc<dyn Embedder> {
        match self {
            EmbeddingBackend::Hashing { dimension } => {
                Arc::new(HashingEmbedder::new(*dimension))
            }
            EmbeddingBackend::Colbert { model } => {
                Arc::new(ColbertEmbedder::new(model.clone()))
            }
        }
    }
}

/// Engine settings, resolved from `DOCSIFT_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// `None` leaves semantic search unavailable.
    pub embedding: Option<EmbeddingBackend>,
    pub chunking: ChunkingConfig,
    pub snapshot_retention: usize,
    pub embed_timeout: Duration,
    pub embed_batch_size: usize,
    pub extract_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            embedding: None,
            chunking: ChunkingConfig::default(),
            snapshot_retention: DEFAULT_RETENTION,
            embed_timeout: DEFAULT_EMBED_TIMEOUT,
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            extract_timeout: DEFAULT_EXTRACT_TIMEOUT,
        }
    }
}

fn parse_var<T: FromStr>(
    name: &str,
    value: Option<String>,
    default: T,
) -> Result<T> {
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            Error::Config(format!("{name} has an invalid value: {raw:?}"))
        }),
    }
}

impl EngineConfig {
    /// Resolve configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve configuration through `lookup`, which maps a variable name
    /// to its value.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let embedding = lookup("DOCSIFT_MODEL")
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.parse::<EmbeddingBackend>())
            .transpose()?;

        let chunk_size = parse_var(
            "DOCSIFT_CHUNK_SIZE",
            lookup("DOCSIFT_CHUNK_SIZE"),
            DEFAULT_CHUNK_SIZE,
        )?;
        let overlap = parse_var(
            "DOCSIFT_CHUNK_OVERLAP",
            lookup("DOCSIFT_CHUNK_OVERLAP"),
            DEFAULT_CHUNK_OVERLAP,
        )?;
        if chunk_size == 0 || overlap >= chunk_size {
            return Err(Error::Config(format!(
                "chunk overlap ({overlap}) must be smaller than chunk size \
                 ({chunk_size})"
            )));
        }

        let snapshot_retention = parse_var(
            "DOCSIFT_SNAPSHOT_RETENTION",
            lookup("DOCSIFT_SNAPSHOT_RETENTION"),
            DEFAULT_RETENTION,
        )?;
        if snapshot_retention == 0 {
            return Err(Error::Config(
                "DOCSIFT_SNAPSHOT_RETENTION must be at least 1".into(),
            ));
        }

        let embed_timeout = parse_var(
            "DOCSIFT_EMBED_TIMEOUT_SECS",
            lookup("DOCSIFT_EMBED_TIMEOUT_SECS"),
            DEFAULT_EMBED_TIMEOUT.as_secs(),
        )?;
        let embed_batch_size = parse_var(
            "DOCSIFT_EMBED_BATCH_SIZE",
            lookup("DOCSIFT_EMBED_BATCH_SIZE"),
            DEFAULT_EMBED_BATCH_SIZE,
        )?;
        let extract_timeout = parse_var(
            "DOCSIFT_EXTRACT_TIMEOUT_SECS",
            lookup("DOCSIFT_EXTRACT_TIMEOUT_SECS"),
            DEFAULT_EXTRACT_TIMEOUT.as_secs(),
        )?;

        Ok(Self {
            embedding,
            chunking: ChunkingConfig { chunk_size, overlap },
            snapshot_retention,
            embed_timeout: Duration::from_secs(embed_timeout.max(1)),
            embed_batch_size: embed_batch_size.max(1),
            extract_timeout: Duration::from_secs(extract_timeout.max(1)),
        })
    }

    /// Override the embedding backend, e.g. from `--model`.
    pub fn with_model(mut self, model: Option<&str>) -> Result<Self> {
        if let Some(model) = model {
            self.embedding = Some(model.parse::<EmbeddingBackend>()?);
        }
        Ok(self)
    }

    /// The configured embedder, or `None` when semantic search is off.
    pub fn build_embedder(&self) -> Option<Arc<dyn Embedder>> {
        self.embedding.as_ref().map(EmbeddingBackend::build)
    }
}
