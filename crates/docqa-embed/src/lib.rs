//! docqa-embed
//!
//! Sentence embeddings for chunks and queries. `MiniLmEmbedder` runs
//! all-MiniLM-L6-v2 locally through candle (mean pooling, L2-normalized);
//! `FakeEmbedder` is a deterministic hashed bag-of-words for tests and
//! development.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use docqa_core::config::{expand_path, EmbeddingSettings};
use docqa_core::traits::Embedder;

mod device;
mod pool;
mod tokenize;

pub use device::select_device;
pub use pool::masked_mean_l2;
pub use tokenize::tokenize_batch;

/// Output dimension of all-MiniLM-L6-v2; the fake embedder matches it.
pub const MINILM_DIM: usize = 384;

const MODEL_NAME: &str = "all-MiniLM-L6-v2";

pub struct MiniLmEmbedder { model: BertModel, tokenizer: Tokenizer, device: Device, dim: usize, max_len: usize }

impl MiniLmEmbedder {
    pub fn new(settings: &EmbeddingSettings) -> Result<Self> {
        let device = select_device();
        let model_dir = resolve_model_dir(&settings.model_dir)?;
        info!(dir = %model_dir.display(), "loading {MODEL_NAME}");
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
        let config_path = model_dir.join("config.json");
        let config: BertConfig = serde_json::from_str(&std::fs::read_to_string(&config_path)?)?;
        let vb = load_weights(&model_dir, &device)?;
        let model = BertModel::load(vb, &config)?;
        info!(dim = config.hidden_size, "{MODEL_NAME} loaded");
        Ok(Self { model, tokenizer, device, dim: config.hidden_size, max_len: settings.max_len })
    }
}

fn load_weights(model_dir: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    let safetensors = model_dir.join("model.safetensors");
    if safetensors.exists() {
        debug!(path = %safetensors.display(), "mapping safetensors weights");
        // SAFETY: the weights file is not modified while mapped.
        return Ok(unsafe { VarBuilder::from_mmaped_safetensors(&[safetensors], DTYPE, device)? });
    }
    let weights_path = model_dir.join("pytorch_model.bin");
    debug!(path = %weights_path.display(), "reading pickled weights");
    let weights = candle_core::pickle::read_all(&weights_path)?;
    let weights_map: std::collections::HashMap<String, Tensor> = weights.into_iter().collect();
    Ok(VarBuilder::from_tensors(weights_map, DTYPE, device))
}

impl Embedder for MiniLmEmbedder {
    fn dim(&self) -> usize { self.dim }
    fn max_len(&self) -> usize { self.max_len }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() { return Ok(Vec::new()); }
        let start = Instant::now();
        let (input_ids, attention_mask) = tokenize_batch(&self.tokenizer, texts, self.max_len, &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;
        let hidden = self.model.forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let vectors: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu)?.to_dtype(DType::F32)?.to_vec2()?;
        if vectors.iter().any(|v| v.len() != self.dim) {
            return Err(anyhow!("model returned vectors that are not {}-dimensional", self.dim));
        }
        let elapsed = start.elapsed();
        if elapsed.as_millis() as usize > 100 * texts.len() { warn!(batch = texts.len(), ?elapsed, "slow embedding batch"); }
        Ok(vectors)
    }
}

/// Deterministic stand-in for a real model: each whitespace token is hashed
/// into a bucket, then the vector is L2-normalized. Texts sharing words land
/// near each other, which is enough for retrieval tests.
pub struct FakeEmbedder { dim: usize }

impl FakeEmbedder { pub fn new(dim: usize) -> Self { Self { dim } } }

impl Embedder for FakeEmbedder {
    fn dim(&self) -> usize { self.dim }
    fn max_len(&self) -> usize { usize::MAX }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

impl FakeEmbedder {
    fn embed_one(&self, text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher}; use twox_hash::XxHash64;
        let mut v = vec![0f32; self.dim];
        for (i, token) in text.split_whitespace().enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            token.to_lowercase().hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += val + (i as f32 % 3.0) * 0.01;
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6);
        for x in &mut v { *x /= norm; }
        v
    }
}

/// Build the embedder selected by configuration. `APP_USE_FAKE_EMBEDDINGS=1`
/// forces the fake one as well.
pub fn get_default_embedder(settings: &EmbeddingSettings) -> Result<Box<dyn Embedder>> {
    let env_fake = std::env::var("APP_USE_FAKE_EMBEDDINGS").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
    if settings.use_fake || env_fake { info!("using FakeEmbedder"); return Ok(Box::new(FakeEmbedder::new(MINILM_DIM))); }
    Ok(Box::new(MiniLmEmbedder::new(settings)?))
}

fn resolve_model_dir(configured: &str) -> Result<PathBuf> {
    if !configured.trim().is_empty() {
        let p = expand_path(configured);
        if p.exists() { return Ok(p); }
        return Err(anyhow!("Configured model dir {} does not exist", p.display()));
    }
    for var in ["APP_MODEL_DIR", "MODEL_DIR"] {
        if let Ok(dir) = std::env::var(var) { let p = PathBuf::from(&dir); if p.exists() { debug!("using {var}: {}", p.display()); return Ok(p); } }
    }
    for candidate in [format!("models/{MODEL_NAME}"), format!("../models/{MODEL_NAME}")] {
        let p = PathBuf::from(candidate); if p.exists() { return Ok(p); }
    }
    Err(anyhow!("Could not locate {MODEL_NAME} model directory"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_model_dir_must_exist() {
        let err = resolve_model_dir("/definitely/not/a/model/dir").unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn fake_embedding_of_empty_text_is_zero() {
        let v = FakeEmbedder::new(8).embed_one("");
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
