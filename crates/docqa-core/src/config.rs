//! Configuration loader and path helpers.
//!
//! Uses Figment to merge built-in defaults, `config.toml`,
//! `config.<env>.toml` and `APP_*` env vars (`__` separates nested keys, so
//! `APP_CHUNKING__CHUNK_SIZE=800` overrides `chunking.chunk_size`).
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::splitter::SplitterConfig;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(Path::new("config.toml"))
    }

    /// Load with `base` as the main TOML file. The environment overlay is
    /// looked up next to it (`config.toml` -> `config.prod.toml`).
    pub fn load_from(base: &Path) -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file(base));
        let overlay = match env_name.as_str() {
            "dev" | "development" => Some("dev"),
            "prod" | "production" => Some("prod"),
            "test" | "testing" => Some("test"),
            _ => None,
        };
        if let Some(suffix) = overlay {
            figment = figment.merge(Toml::file(overlay_path(base, suffix)));
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.validate_for_env(&env_name)?;
        Ok(config)
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    pub fn settings(&self) -> anyhow::Result<Settings> {
        self.figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to read settings: {}", e))
    }

    fn validate_for_env(&self, env: &str) -> anyhow::Result<()> {
        let settings = self.settings()?;
        settings.chunking.validate()?;
        if settings.retrieval.top_k == 0 {
            anyhow::bail!("retrieval.top_k must be at least 1");
        }
        if settings.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be at least 1");
        }
        match env {
            "prod" | "production" if settings.embedding.use_fake => {
                anyhow::bail!("embedding.use_fake is not allowed in production")
            }
            _ => {}
        }
        Ok(())
    }
}

fn overlay_path(base: &Path, suffix: &str) -> PathBuf {
    let stem = base.file_stem().and_then(|s| s.to_str()).unwrap_or("config");
    base.with_file_name(format!("{stem}.{suffix}.toml"))
}

/// Typed view over the merged configuration. Every section has defaults so
/// an empty or missing `config.toml` is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub paths: PathSettings,
    pub chunking: SplitterConfig,
    pub retrieval: RetrievalSettings,
    pub embedding: EmbeddingSettings,
    pub generation: GenerationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub docs_dir: String,
    pub data_dir: String,
    pub history_file: String,
    pub recursive: bool,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            docs_dir: "docs".to_string(),
            data_dir: "data".to_string(),
            history_file: "data/chat_history.jsonl".to_string(),
            recursive: false,
        }
    }
}

impl PathSettings {
    pub fn docs_dir(&self) -> PathBuf { expand_path(&self.docs_dir) }
    pub fn data_dir(&self) -> PathBuf { expand_path(&self.data_dir) }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self { Self { top_k: 3 } }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Empty means "look it up" (`APP_MODEL_DIR`, `MODEL_DIR`, well-known dirs).
    pub model_dir: String,
    pub use_fake: bool,
    pub max_len: usize,
    pub batch_size: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self { model_dir: String::new(), use_fake: false, max_len: 256, batch_size: 32 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// Empty means "use `MISTRAL_API_KEY`"; still empty selects the local summary.
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "mistral-tiny".to_string(),
            base_url: "https://api.mistral.ai".to_string(),
            timeout_secs: 30,
        }
    }
}

impl GenerationSettings {
    pub fn resolved_api_key(&self) -> Option<String> {
        if !self.api_key.trim().is_empty() {
            return Some(self.api_key.trim().to_string());
        }
        env::var("MISTRAL_API_KEY").ok().filter(|k| !k.trim().is_empty())
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
