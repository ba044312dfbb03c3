//! # Embeddings
//!
//! Sentence embedding support for the similarity index.
//!
//! The index only cares about one capability: turning a piece of text into a
//! fixed-length `f32` vector, deterministically for a given model version.
//! That capability is captured by the [`EmbeddingProvider`] trait so the
//! storage and retrieval layers can be exercised without loading a model.
//!
//! The production provider is [`MiniLmEmbedder`], which runs
//! `sentence-transformers/all-MiniLM-L6-v2` locally through Candle (pure Rust,
//! no Python runtime). Weights and tokenizer are fetched once from the
//! Hugging Face Hub and cached. Outputs are mean-pooled over the token
//! dimension and L2-normalised, yielding 384-d unit vectors, so squared
//! Euclidean distances over them fall in `[0, 4]`.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use thiserror::Error;
use tokenizers::Tokenizer;

/// Dimensionality of MiniLM-L6 sentence embeddings.
pub const MINILM_DIMENSION: usize = 384;

/// Errors raised while loading or running an embedding model.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The model weights, config, or tokenizer could not be loaded.
    #[error("failed to load embedding model: {0}")]
    Load(String),

    /// Tokenization or inference failed on a specific input.
    #[error("embedding inference failed: {0}")]
    Inference(String),
}

/// Maps text to a fixed-length numeric vector.
///
/// Implementations must be deterministic: embedding the same text twice with
/// the same provider yields the same vector, which is what makes
/// "distance zero means the exact same text" queries meaningful.
pub trait EmbeddingProvider {
    /// Length of every vector this provider produces.
    fn dimension(&self) -> usize;

    /// Embed `text` into a vector of exactly [`dimension`](Self::dimension) floats.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// MiniLM-L6 sentence embeddings via Candle.
pub struct MiniLmEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl MiniLmEmbedder {
    /// Load the model from the Hugging Face Hub (cached after first use).
    ///
    /// # Errors
    /// Returns [`EmbeddingError::Load`] if any of the three artifacts
    /// (config, tokenizer, safetensors weights) cannot be fetched or parsed.
    pub fn load() -> Result<Self, EmbeddingError> {
        let device = Device::Cpu;
        let model_id = "sentence-transformers/all-MiniLM-L6-v2";

        let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, "main".to_string());
        let api = Api::new().map_err(|e| EmbeddingError::Load(e.to_string()))?;
        let api_repo = api.repo(repo);

        let config_filename = api_repo
            .get("config.json")
            .map_err(|e| EmbeddingError::Load(e.to_string()))?;
        let tokenizer_filename = api_repo
            .get("tokenizer.json")
            .map_err(|e| EmbeddingError::Load(e.to_string()))?;
        let weights_filename = api_repo
            .get("model.safetensors")
            .map_err(|e| EmbeddingError::Load(e.to_string()))?;

        let config = std::fs::read_to_string(config_filename)
            .map_err(|e| EmbeddingError::Load(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&config).map_err(|e| EmbeddingError::Load(e.to_string()))?;

        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| EmbeddingError::Load(e.to_string()))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_filename], DTYPE, &device)
                .map_err(|e| EmbeddingError::Load(e.to_string()))?
        };
        let model =
            BertModel::load(vb, &config).map_err(|e| EmbeddingError::Load(e.to_string()))?;

        Ok(Self {
            model,
            tokenizer,
            device,
        })
    }

    /// Mean pooling over token embeddings, weighted by the attention mask.
    fn mean_pooling(
        &self,
        embeddings: &Tensor,
        attention_mask: &[u32],
    ) -> Result<Tensor, candle_core::Error> {
        // embeddings: [1, seq_len, hidden]; mask must broadcast as [1, seq_len, 1]
        let mask = Tensor::new(attention_mask, &self.device)?
            .to_dtype(DType::F32)?
            .unsqueeze(0)?
            .unsqueeze(2)?;

        let masked = embeddings.broadcast_mul(&mask)?;
        let sum = masked.sum(1)?;
        let count = mask.sum(1)?.clamp(1f32, f32::INFINITY)?;
        let mean = sum.broadcast_div(&count)?;
        mean.squeeze(0)
    }

    /// L2-normalise so distances are comparable across inputs of any length.
    fn normalize(&self, tensor: &Tensor) -> Result<Tensor, candle_core::Error> {
        let norm = tensor.sqr()?.sum_all()?.sqrt()?;
        tensor.broadcast_div(&norm)
    }
}

impl EmbeddingProvider for MiniLmEmbedder {
    fn dimension(&self) -> usize {
        MINILM_DIMENSION
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        // The tokenizer truncates at the model's 512-token limit.
        let tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmbeddingError::Inference(e.to_string()))?;

        let run = || -> Result<Vec<f32>, candle_core::Error> {
            let token_ids = Tensor::new(tokens.get_ids(), &self.device)?.unsqueeze(0)?;
            let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)?.unsqueeze(0)?;

            let output = self.model.forward(&token_ids, &token_type_ids, None)?;
            let pooled = self.mean_pooling(&output, tokens.get_attention_mask())?;
            let normalized = self.normalize(&pooled)?;
            normalized.to_vec1::<f32>()
        };

        run().map_err(|e| EmbeddingError::Inference(e.to_string()))
    }
}

/// Deterministic, model-free provider for tests.
///
/// Hashes `(position, text)` pairs into pseudo-random but stable coordinates.
/// Identical texts embed identically; distinct texts almost surely do not.
#[cfg(test)]
pub(crate) struct HashEmbedder {
    pub dimension: usize,
}

#[cfg(test)]
impl HashEmbedder {
    pub(crate) fn new() -> Self {
        Self { dimension: 16 }
    }
}

#[cfg(test)]
impl EmbeddingProvider for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        use std::hash::{DefaultHasher, Hash, Hasher};

        let mut vector = vec![0f32; self.dimension];
        for (i, slot) in vector.iter_mut().enumerate() {
            let mut hasher = DefaultHasher::new();
            i.hash(&mut hasher);
            text.hash(&mut hasher);
            *slot = (hasher.finish() % 1000) as f32 / 1000.0;
        }
        Ok(vector)
    }
}
