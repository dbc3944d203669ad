//! Kokoro-style ONNX synthesis backend.
//!
//! One [`OnnxEngine`] (ORT session + voice styles + vocabulary) is shared by
//! every per-language pipeline a load produces.  The model inputs are
//! positional:
//!
//! | Index | Meaning     | Shape          | dtype   |
//! |-------|-------------|----------------|---------|
//! | 0     | token ids   | `[1, n + 2]`   | int64   |
//! | 1     | style row   | `[1, style_d]` | float32 |
//! | 2     | speed       | `[1]`          | float32 |
//!
//! Output 0 is the waveform at 24 kHz.

use std::{collections::HashMap, path::Path};

use anyhow::{Context, Result};
use ort::{session::Session, value::Tensor};
use parking_lot::Mutex;

use super::{npz::StyleMatrix, vocab::Vocab};

/// Shared inference state for one loaded model package.
pub struct OnnxEngine {
    session: Mutex<Session>,
    styles: HashMap<String, StyleMatrix>,
    vocab: Vocab,
    speed_priors: HashMap<String, f32>,
    voice_aliases: HashMap<String, String>,
}

impl OnnxEngine {
    pub fn load(
        model_path: &Path,
        voices_path: &Path,
        vocab: Vocab,
        speed_priors: HashMap<String, f32>,
        voice_aliases: HashMap<String, String>,
    ) -> Result<Self> {
        let session = Session::builder()
            .context("Failed to create ORT session builder")?
            .commit_from_file(model_path)
            .with_context(|| format!("Cannot load ONNX model: {}", model_path.display()))?;

        let styles = super::npz::load_styles(voices_path)?;
        tracing::info!(
            model = %model_path.display(),
            voices = styles.len(),
            "ONNX engine loaded"
        );

        Ok(Self { session: Mutex::new(session), styles, vocab, speed_priors, voice_aliases })
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    pub fn voices(&self) -> impl Iterator<Item = &str> {
        self.styles.keys().map(String::as_str)
    }

    fn resolve_voice<'a>(&'a self, voice: &'a str) -> &'a str {
        self.voice_aliases.get(voice).map(String::as_str).unwrap_or(voice)
    }

    /// Look up the style matrix for `voice` (alias-aware) and the speed after
    /// applying its prior.
    fn voice_params(&self, voice: &str, speed: f32) -> Result<(&StyleMatrix, f32)> {
        let key = self.resolve_voice(voice);
        let style = self.styles.get(key).with_context(|| {
            let mut known: Vec<&str> = self.voices().collect();
            known.sort_unstable();
            format!("Voice '{}' not found. Available: {:?}", voice, known)
        })?;
        let prior = self.speed_priors.get(key).copied().unwrap_or(1.0);
        Ok((style, speed * prior))
    }

    /// Fails if `voice` is not in the loaded voice pack.
    pub fn check_voice(&self, voice: &str) -> Result<()> {
        self.voice_params(voice, 1.0).map(|_| ())
    }

    /// Run one inference pass over already-encoded `tokens`.
    pub fn infer(&self, tokens: &[i64], voice: &str, speed: f32) -> Result<Vec<f32>> {
        let (style, speed) = self.voice_params(voice, speed)?;
        let row = style.row_for(tokens.len());

        let mut ids = Vec::with_capacity(tokens.len() + 2);
        ids.push(0);
        ids.extend_from_slice(tokens);
        ids.push(0);
        let seq_len = ids.len();

        let t_ids = Tensor::<i64>::from_array(([1usize, seq_len], ids))
            .context("Failed to build input_ids tensor")?;
        let t_style = Tensor::<f32>::from_array(([1usize, row.len()], row.to_vec()))
            .context("Failed to build style tensor")?;
        let t_speed = Tensor::<f32>::from_array(([1usize], vec![speed]))
            .context("Failed to build speed tensor")?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![t_ids, t_style, t_speed])
            .context("ONNX inference failed")?;
        let (_shape, audio) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("Failed to extract audio tensor")?;
        Ok(audio.to_vec())
    }
}

#[cfg(feature = "espeak")]
pub use self::text::{OnnxLoader, OnnxPipeline};

#[cfg(feature = "espeak")]
mod text {
    use std::sync::Arc;

    use anyhow::{Context, Result};

    use super::OnnxEngine;
    use crate::{
        backend::{
            vocab::{Vocab, MAX_TOKENS},
            BackendLoader, BackendSet, BufferStream, Device, SynthesisBackend,
        },
        download::ModelSource,
        language::Language,
        phonemize::phonemize,
    };

    /// Text-level pipeline for one language over a shared engine.
    pub struct OnnxPipeline {
        engine: Arc<OnnxEngine>,
        language: Language,
    }

    impl OnnxPipeline {
        pub fn new(engine: Arc<OnnxEngine>, language: Language) -> Self {
            Self { engine, language }
        }
    }

    impl SynthesisBackend for OnnxPipeline {
        fn synthesize<'a>(
            &'a self,
            text: &'a str,
            voice: &'a str,
            speed: f32,
        ) -> Result<BufferStream<'a>> {
            self.engine.check_voice(voice)?;
            let ipa = phonemize(text, self.language)
                .with_context(|| format!("Phonemisation failed for {:?}", text))?;
            let batches = self.engine.vocab().encode_batches(&ipa, MAX_TOKENS);
            tracing::debug!(
                language = %self.language,
                batches = batches.len(),
                "synthesising chunk"
            );
            Ok(Box::new(
                batches.into_iter().map(move |batch| self.engine.infer(&batch, voice, speed)),
            ))
        }
    }

    /// Builds every language pipeline from one model package.
    pub struct OnnxLoader {
        source: ModelSource,
    }

    impl OnnxLoader {
        pub fn new(source: ModelSource) -> Self {
            Self { source }
        }
    }

    impl BackendLoader for OnnxLoader {
        fn load(&self, device: Device) -> Result<BackendSet> {
            if device == Device::Cuda {
                tracing::warn!("CUDA execution is not configured for this build, using CPU");
            }
            let files = self.source.resolve()?;
            let config = files.config;

            let languages = if config.languages.is_empty() {
                Language::ALL.to_vec()
            } else {
                config
                    .languages
                    .iter()
                    .map(|&c| Language::from_code(c))
                    .collect::<Result<Vec<_>, _>>()
                    .context("Invalid language list in model config")?
            };

            let engine = Arc::new(OnnxEngine::load(
                &files.model,
                &files.voices,
                Vocab::from_config(&config.vocab),
                config.speed_priors,
                config.voice_aliases,
            )?);

            Ok(languages
                .into_iter()
                .map(|lang| {
                    let pipeline: Arc<dyn SynthesisBackend> =
                        Arc::new(OnnxPipeline::new(Arc::clone(&engine), lang));
                    (lang, pipeline)
                })
                .collect())
        }
    }
}
