//! Local document rendering with crossfaded chunk joins.
//!
//! Chunks are synthesised on a producer thread and handed over through a
//! small bounded channel, so stitching the previous chunk overlaps with
//! synthesis of the next.  A chunk that fails is logged and skipped; the
//! document still renders.

use std::{
    path::Path,
    sync::mpsc,
    thread,
};

use anyhow::{Context, Result};

use crate::{
    audio,
    chunk::chunk_text,
    config::GenerationConfig,
    error::GenerationError,
    generate::{check_speed, voice_language},
    manager::ModelManager,
};

/// Chunks buffered between the producer and the stitcher.
const PIPELINE_DEPTH: usize = 2;

/// Synthesise `text` with `voice` and join the chunks with a crossfade of
/// `config.crossfade` seconds.  Returns raw samples; normalisation and
/// encoding are left to the caller.
pub fn render_document(
    models: &ModelManager,
    text: &str,
    voice: &str,
    speed: f32,
    config: &GenerationConfig,
) -> Result<Vec<f32>, GenerationError> {
    let language = voice_language(voice)?;
    check_speed(speed)?;
    let chunks = chunk_text(text, config.max_chunk_chars);
    if chunks.is_empty() {
        return Err(GenerationError::validation("Text must not be empty"));
    }

    let lease = models.acquire(language.code())?;
    let backend = &*lease;
    let overlap = audio::overlap_len(config.crossfade);
    let (tx, rx) = mpsc::sync_channel::<(usize, Result<Vec<f32>>)>(PIPELINE_DEPTH);

    let track = thread::scope(|scope| {
        let chunks = &chunks;
        scope.spawn(move || {
            for (i, chunk) in chunks.iter().enumerate() {
                let samples = backend
                    .synthesize(chunk, voice, speed)
                    .and_then(|stream| stream.collect::<Result<Vec<_>>>())
                    .map(|buffers| buffers.concat());
                if tx.send((i, samples)).is_err() {
                    break;
                }
            }
        });

        let mut track: Vec<f32> = Vec::new();
        for (i, samples) in rx {
            match samples {
                Ok(samples) if samples.is_empty() => {
                    tracing::debug!(chunk = i, "chunk produced no audio");
                }
                Ok(samples) if track.is_empty() => track = samples,
                Ok(samples) => track = audio::crossfade(&track, &samples, overlap),
                Err(err) => {
                    tracing::warn!(chunk = i, error = %format!("{err:#}"), "skipping failed chunk");
                }
            }
        }
        track
    });

    tracing::info!(
        chunks = chunks.len(),
        seconds = track.len() as f32 / audio::SAMPLE_RATE as f32,
        "rendered document"
    );
    if track.is_empty() {
        return Err(anyhow::anyhow!("no chunk produced audio").into());
    }
    Ok(track)
}

/// Read a plain-text or Markdown document.
pub fn read_text_file(path: &Path) -> Result<String> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !matches!(ext.as_str(), "txt" | "md") {
        anyhow::bail!("Unsupported file type '{}': only .txt and .md are accepted", path.display());
    }
    std::fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use super::*;
    use crate::{
        backend::{BackendLoader, BackendSet, BufferStream, Device, SynthesisBackend},
        config::ManagerConfig,
        language::Language,
    };

    /// Emits two buffers of `len / 2` samples per chunk; chunks containing
    /// "boom" fail.
    struct Tone {
        len: usize,
    }

    impl SynthesisBackend for Tone {
        fn synthesize<'a>(&'a self, text: &'a str, _: &'a str, _: f32) -> Result<BufferStream<'a>> {
            if text.contains("boom") {
                anyhow::bail!("synthesis exploded");
            }
            let half = self.len / 2;
            Ok(Box::new((0..2).map(move |_| Ok(vec![0.25; half]))))
        }
    }

    struct ToneLoader;

    impl BackendLoader for ToneLoader {
        fn load(&self, _: Device) -> Result<BackendSet> {
            let mut set: BackendSet = HashMap::new();
            set.insert(Language::AmericanEnglish, Arc::new(Tone { len: 4_800 }));
            Ok(set)
        }
    }

    fn config(max_chunk_chars: usize) -> GenerationConfig {
        GenerationConfig { max_chunk_chars, ..Default::default() }
    }

    #[test]
    fn test_chunks_are_crossfaded() {
        let models = ModelManager::new(Arc::new(ToneLoader), ManagerConfig::default());
        let track =
            render_document(&models, "One. Two. Three.", "af_test", 1.0, &config(5)).unwrap();
        let overlap = audio::overlap_len(0.1);
        assert_eq!(track.len(), 3 * 4_800 - 2 * overlap);
        assert!(track.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn test_failed_chunk_is_skipped() {
        let models = ModelManager::new(Arc::new(ToneLoader), ManagerConfig::default());
        let track =
            render_document(&models, "One. boom. Three.", "af_test", 1.0, &config(5)).unwrap();
        assert_eq!(track.len(), 2 * 4_800 - audio::overlap_len(0.1));
    }

    #[test]
    fn test_unknown_voice_family() {
        let models = ModelManager::new(Arc::new(ToneLoader), ManagerConfig::default());
        let err = render_document(&models, "Hi.", "q_test", 1.0, &config(400)).unwrap_err();
        assert!(matches!(err, GenerationError::Validation(_)));
    }

    #[test]
    fn test_read_text_file_extensions() {
        let dir = std::env::temp_dir();
        let md = dir.join(format!("torchts-doc-{}.md", std::process::id()));
        std::fs::write(&md, "# Title\n\nBody.").unwrap();
        assert_eq!(read_text_file(&md).unwrap(), "# Title\n\nBody.");
        std::fs::remove_file(&md).ok();

        assert!(read_text_file(Path::new("notes.pdf")).is_err());
        assert!(read_text_file(Path::new("README")).is_err());
    }
}
