use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use rust_bert::pipelines::sentence_embeddings::{SentenceEmbeddingsBuilder, SentenceEmbeddingsModel};
use serde::Deserialize;
use tokio::sync::Mutex;

/// Accepted range for the encoder's max token length.
pub const MAX_TOKENS_RANGE: std::ops::RangeInclusive<usize> = 128..=512;

/// Maps normalized texts to fixed-length vectors.
///
/// Implementations must be deterministic for fixed weights, and batching must
/// not change the vector produced for any single input.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;
}

#[derive(Debug, Deserialize)]
struct SentenceBertConfig {
    max_seq_length: usize,
}

/// Pretrained bidirectional encoder with mean pooling, loaded from a local
/// sentence-embeddings directory. This runs on CPU unless CUDA is available.
#[derive(Clone)]
pub struct EncoderEmbedder {
    model: Arc<Mutex<SentenceEmbeddingsModel>>,
    batch_size: usize,
    dimension: usize,
}

impl std::fmt::Debug for EncoderEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderEmbedder")
            .field("model", &"<SentenceEmbeddingsModel>")
            .field("batch_size", &self.batch_size)
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl EncoderEmbedder {
    /// Load the encoder from `model_dir`.
    ///
    /// The directory's `sentence_bert_config.json` fixes the truncation length;
    /// values outside [`MAX_TOKENS_RANGE`] are rejected. A missing or broken
    /// model is fatal: there is no degraded mode.
    pub fn load(model_dir: &Path, batch_size: usize) -> Result<Self> {
        let max_tokens = read_max_tokens(model_dir)?;
        let model = SentenceEmbeddingsBuilder::local(model_dir)
            .create_model()
            .with_context(|| format!("failed to load encoder from {}", model_dir.display()))?;

        let dimension = usize::try_from(
            model
                .get_embedding_dim()
                .context("failed to read encoder embedding dimension")?,
        )
        .context("encoder reported a negative embedding dimension")?;

        tracing::info!(
            model_dir = %model_dir.display(),
            dimension,
            max_tokens,
            batch_size,
            "encoder loaded"
        );

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            batch_size: batch_size.max(1),
            dimension,
        })
    }
}

fn read_max_tokens(model_dir: &Path) -> Result<usize> {
    let path = model_dir.join("sentence_bert_config.json");
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config: SentenceBertConfig =
        serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))?;
    if !MAX_TOKENS_RANGE.contains(&config.max_seq_length) {
        bail!(
            "max_seq_length {} in {} is outside {:?}",
            config.max_seq_length,
            path.display(),
            MAX_TOKENS_RANGE
        );
    }
    Ok(config.max_seq_length)
}

#[async_trait]
impl Embedder for EncoderEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        let batch_size = self.batch_size;

        // Offload to blocking thread
        tokio::task::spawn_blocking(move || {
            let model = model.blocking_lock();
            let mut vectors = Vec::with_capacity(texts.len());
            for batch in texts.chunks(batch_size) {
                vectors.extend(model.encode(batch)?);
            }
            Ok::<_, rust_bert::RustBertError>(vectors)
        })
        .await
        .context("failed to join embedding task")?
        .context("failed to encode texts")
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
