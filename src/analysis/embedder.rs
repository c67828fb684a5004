//! Embedding backend seam for the embedding-cluster and phrase analyzers.
//!
//! Production uses fastembed with lazy model loading; tests inject stub
//! backends so the gate and clustering logic run without a model download.

use std::path::PathBuf;
use std::sync::Mutex;

use fastembed::{InitOptions, TextEmbedding};

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("model initialization failed: {0}")]
    InitFailed(String),

    #[error("embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("unknown embedding model: {0}")]
    InvalidModel(String),
}

/// Anything that can turn a batch of texts into vectors. The analyzers only
/// ever call this after the sufficiency gate has passed.
pub trait SegmentEmbedder: Send {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// fastembed-backed embedder. The model downloads on first use into
/// `cache_dir/models`; a Mutex guards it because fastembed's embed()
/// requires `&mut self`.
pub struct FastembedBackend {
    model_name: String,
    cache_dir: PathBuf,
    model: Mutex<Option<TextEmbedding>>,
}

impl FastembedBackend {
    pub fn new(model_name: &str, cache_dir: PathBuf) -> Self {
        FastembedBackend {
            model_name: model_name.to_string(),
            cache_dir,
            model: Mutex::new(None),
        }
    }

    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbedError> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" | "allminiml6v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "all-minilm-l6-v2-q" | "allminiml6v2q" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q),
            "bge-small-en-v1.5" | "bgesmallenv15" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" | "bgebaseenv15" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-large-en-v1.5" | "bgelargeenv15" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
            _ => Err(EmbedError::InvalidModel(format!(
                "{name}; supported: all-MiniLM-L6-v2, bge-small-en-v1.5, \
                 bge-base-en-v1.5, bge-large-en-v1.5"
            ))),
        }
    }

    fn init(&self) -> Result<TextEmbedding, EmbedError> {
        let model_enum = Self::parse_model_name(&self.model_name)?;

        let models_dir = self.cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbedError::InitFailed(format!("failed to create models directory: {e}"))
        })?;

        log::info!("loading embedding model '{}'", self.model_name);
        let options = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        TextEmbedding::try_new(options).map_err(|e| EmbedError::InitFailed(e.to_string()))
    }
}

impl SegmentEmbedder for FastembedBackend {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut guard = self
            .model
            .lock()
            .map_err(|e| EmbedError::EmbeddingFailed(format!("model lock poisoned: {e}")))?;

        if guard.is_none() {
            *guard = Some(self.init()?);
        }

        let model = guard.as_mut().expect("model initialized above");
        model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbedError::EmbeddingFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_model_name() {
        assert!(matches!(
            FastembedBackend::parse_model_name("nonexistent-model"),
            Err(EmbedError::InvalidModel(_))
        ));
    }

    #[test]
    fn test_known_model_names_parse() {
        assert!(FastembedBackend::parse_model_name("all-MiniLM-L6-v2").is_ok());
        assert!(FastembedBackend::parse_model_name("bge-small-en-v1.5").is_ok());
    }

    #[test]
    fn test_empty_batch_skips_model_load() {
        // No model download should happen for an empty batch.
        let backend = FastembedBackend::new("all-MiniLM-L6-v2", std::env::temp_dir());
        assert!(backend.embed_batch(&[]).unwrap().is_empty());
    }

    #[test]
    #[ignore = "requires model download"]
    fn test_embed_batch_dimensions() {
        let tmp = std::env::temp_dir().join("marktopic-embed-test");
        let backend = FastembedBackend::new("all-MiniLM-L6-v2", tmp.clone());

        let vectors = backend
            .embed_batch(&["hello world".to_string(), "goodbye".to_string()])
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 384);

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
