use std::sync::Mutex;

use candle_core::{DType, Device, Tensor};
use pylate_rs::ColBERT;

use crate::embedding::{
    EmbedError, Embedder, classify_backend_error, normalize,
};

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

fn backend_error(e: impl std::fmt::Display) -> EmbedError {
    classify_backend_error(e.to_string())
}

/// Manages the ColBERT model lifecycle, loading it lazily on first use.
pub struct ModelManager {
    model: Option<ColBERT>,
    model_id: String,
}

impl ModelManager {
    /// Creates a manager for a HuggingFace model id or local model path.
    /// Nothing is downloaded or loaded until the first encode call.
    pub fn new(model_id: String) -> Self {
        Self {
            model: None,
            model_id,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    fn ensure_loaded(&mut self) -> Result<&mut ColBERT, EmbedError> {
        let model = match self.model.take() {
            Some(model) => model,
            None => {
                tracing::info!(
                    model = %self.model_id,
                    "loading embedding model"
                );
                let loaded: Result<ColBERT, _> =
                    ColBERT::from(&self.model_id)
                        .with_device(default_device())
                        .try_into();
                loaded.map_err(backend_error)?
            }
        };
        Ok(self.model.insert(model))
    }

    /// Encodes texts and mean-pools the token embeddings into one
    /// unit-length vector per text.
    pub fn encode_pooled(
        &mut self,
        texts: &[String],
        is_query: bool,
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        let model = self.ensure_loaded()?;
        let embeddings: Tensor =
            model.encode(texts, is_query).map_err(backend_error)?;

        // [batch, tokens, dim] -> [batch, dim]
        let pooled = embeddings
            .to_dtype(DType::F32)
            .and_then(|t| t.mean(1))
            .and_then(|t| t.to_vec2::<f32>())
            .map_err(backend_error)?;

        Ok(pooled
            .into_iter()
            .map(|mut v| {
                normalize(&mut v);
                v
            })
            .collect())
    }
}

/// [`Embedder`] backed by a local ColBERT model.
pub struct ColbertEmbedder {
    manager: Mutex<ModelManager>,
}

impl ColbertEmbedder {
    pub fn new(model_id: String) -> Self {
        Self {
            manager: Mutex::new(ModelManager::new(model_id)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ModelManager> {
        self.manager.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Embedder for ColbertEmbedder {
    fn embed_documents(
        &self,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.lock().encode_pooled(texts, false)
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.lock()
            .encode_pooled(&[text.to_string()], true)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                EmbedError::Backend("model returned no query embedding".into())
            })
    }
}

impl std::fmt::Debug for ColbertEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColbertEmbedder").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_is_lazy() {
        let manager = ModelManager::new("custom/model".to_string());
        assert_eq!(manager.model_id(), "custom/model");
        assert!(!manager.is_loaded());
    }

    #[test]
    fn empty_batch_skips_model_load() {
        let embedder = ColbertEmbedder::new("does/not-exist".to_string());
        assert!(embedder.embed_documents(&[]).unwrap().is_empty());
    }
}
