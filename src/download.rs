//! Model package resolution: a local directory or a HuggingFace repository.
//!
//! A package is a directory (or repo) holding `config.json`, the ONNX model
//! and the voices NPZ file:
//!
//! ```json
//! {
//!   "model_file": "kokoro-v1.0.onnx",
//!   "voices": "voices-v1.0.npz",
//!   "languages": ["a", "b"],
//!   "speed_priors": { "af_heart": 1.05 },
//!   "voice_aliases": { "Heart": "af_heart" }
//! }
//! ```

use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use hf_hub::api::sync::Api;
use serde::Deserialize;

/// Deserialised `config.json` of a model package.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Filename of the ONNX model inside the package.
    pub model_file: String,

    /// Filename of the voices NPZ file inside the package.
    pub voices: String,

    /// Optional character → token id table; the built-in one is used otherwise.
    #[serde(default)]
    pub vocab: HashMap<String, i64>,

    /// Language codes to build pipelines for; empty means all supported.
    #[serde(default)]
    pub languages: Vec<char>,

    /// Optional per-voice speed multipliers.
    #[serde(default)]
    pub speed_priors: HashMap<String, f32>,

    /// Optional friendly-name → NPZ-key aliases.
    #[serde(default)]
    pub voice_aliases: HashMap<String, String>,
}

/// Where a model package comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    Dir(PathBuf),
    Hub(String),
}

impl ModelSource {
    /// An existing directory is used as-is; anything else is a hub repo id.
    pub fn parse(spec: &str) -> Self {
        let path = Path::new(spec);
        if path.is_dir() {
            ModelSource::Dir(path.to_path_buf())
        } else {
            ModelSource::Hub(spec.to_string())
        }
    }

    /// Locate (downloading if needed) every file of the package.
    pub fn resolve(&self) -> Result<ModelFiles> {
        match self {
            ModelSource::Dir(dir) => from_dir(dir),
            ModelSource::Hub(repo) => from_hub(repo),
        }
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Dir(dir) => write!(f, "{}", dir.display()),
            ModelSource::Hub(repo) => write!(f, "hf://{}", repo),
        }
    }
}

/// Local paths of a resolved model package.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: ModelConfig,
    pub model: PathBuf,
    pub voices: PathBuf,
}

fn read_config(path: &Path) -> Result<ModelConfig> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Cannot read config: {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Resolve a package laid out in a local directory.
pub fn from_dir(dir: &Path) -> Result<ModelFiles> {
    let config = read_config(&dir.join("config.json"))?;
    let model = dir.join(&config.model_file);
    let voices = dir.join(&config.voices);
    for file in [&model, &voices] {
        if !file.is_file() {
            anyhow::bail!("Model package file missing: {}", file.display());
        }
    }
    Ok(ModelFiles { config, model, voices })
}

/// Download a package from HuggingFace.  Files are cached in the hub cache
/// directory (`~/.cache/huggingface/hub` by default).
pub fn from_hub(repo_id: &str) -> Result<ModelFiles> {
    let api = Api::new().context("Failed to initialise HuggingFace Hub client")?;
    let repo = api.model(repo_id.to_string());
    let fetch = |name: &str| {
        repo.get(name)
            .with_context(|| format!("Failed to download '{}' from '{}'", name, repo_id))
    };

    tracing::info!(repo = repo_id, "fetching model package");
    let config = read_config(&fetch("config.json")?)?;
    let model = fetch(&config.model_file)?;
    let voices = fetch(&config.voices)?;
    Ok(ModelFiles { config, model, voices })
}
