//! Generation orchestrator: request validation, chunking, cancellable
//! synthesis and WAV assembly.
//!
//! Two request shapes are served:
//!
//! * **single**: one voice; the client fetches chunk `chunk_id` of the text
//!   per request, using `total_chunks` from the first response to walk the
//!   rest.  All chunk requests of one text share a session id, so one stop
//!   call cancels the whole walk.
//! * **multi**: inline speaker segments (`1 Hello >>> 2 Hi there`), each
//!   voiced by its own speaker and chunked independently, rendered into one
//!   track.
//!
//! Chunk audio is concatenated without crossfade; see
//! [`render`](crate::render) for the crossfaded local path.

use std::{collections::HashMap, sync::Arc};

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::{
    audio,
    backend::SynthesisBackend,
    chunk::chunk_text,
    config::GenerationConfig,
    error::GenerationError,
    language::Language,
    manager::ModelManager,
    session::{SessionGuard, SessionTracker},
};

/// Number of leading text characters hashed into a session id.
const SESSION_PREFIX_CHARS: usize = 32;

/// Segment start marker in multi-speaker text.
const SEGMENT_START: &str = ">>>";
/// Optional segment end marker; stripped before splitting.
const SEGMENT_END: &str = "<<<";

fn default_speed() -> f32 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct SingleRequest {
    pub text: String,
    pub voice: String,
    #[serde(default)]
    pub chunk_id: usize,
    #[serde(default = "default_speed")]
    pub speed: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MultiRequest {
    pub text: String,
    /// Speaker token → voice id.
    pub speakers: HashMap<String, String>,
    #[serde(default = "default_speed")]
    pub speed: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioMeta {
    Single { total_chunks: usize, current_chunk: usize },
    Multi { segment_count: usize },
}

/// Encoded WAV plus what the caller needs to build response headers.
#[derive(Debug, Clone)]
pub struct GeneratedAudio {
    pub wav: Vec<u8>,
    pub session_id: String,
    pub meta: AudioMeta,
}

/// One speaker turn of a multi-speaker text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub speaker: String,
    pub text: String,
}

/// Split multi-speaker text into segments.
///
/// Every `>>>` starts a new segment whose first whitespace-separated token
/// is the speaker.  `<<<` markers are dropped.  Segments with no body are
/// skipped.
pub fn parse_segments(text: &str) -> Vec<Segment> {
    text.replace(SEGMENT_END, "")
        .split(SEGMENT_START)
        .filter_map(|part| {
            let mut tokens = part.trim().splitn(2, char::is_whitespace);
            let speaker = tokens.next().filter(|s| !s.is_empty())?;
            let body = tokens.next().unwrap_or("").trim();
            (!body.is_empty())
                .then(|| Segment { speaker: speaker.to_string(), text: body.to_string() })
        })
        .collect()
}

fn hash_id(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex.truncate(32);
    hex
}

fn text_prefix(text: &str) -> &str {
    match text.char_indices().nth(SESSION_PREFIX_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Session id of a single-voice request.  Derived from the voice and the
/// text prefix, so distinct texts sharing a prefix share an id.
pub fn single_session_id(voice: &str, text: &str) -> String {
    hash_id(&format!("{}_{}", voice, text_prefix(text)))
}

pub fn multi_session_id(text: &str) -> String {
    hash_id(&format!("multi_{}", text_prefix(text)))
}

/// Language family selected by the first character of a voice id.
pub fn voice_language(voice: &str) -> Result<Language, GenerationError> {
    let mut chars = voice.chars();
    let first = match (chars.next(), chars.next()) {
        (Some(c), Some(_)) => c.to_ascii_lowercase(),
        _ => {
            return Err(GenerationError::validation(
                "Voice parameter must be provided in format: [language]_[name]",
            ))
        }
    };
    Language::from_code(first)
        .map_err(|_| GenerationError::validation(format!("Invalid voice type: {}", first)))
}

pub(crate) fn check_speed(speed: f32) -> Result<(), GenerationError> {
    if speed.is_finite() && speed > 0.0 {
        Ok(())
    } else {
        Err(GenerationError::validation(format!("Speed must be a positive number (got {})", speed)))
    }
}

/// Pull every buffer for `text`, checking the session after each one.
fn synthesize_into(
    backend: &dyn SynthesisBackend,
    text: &str,
    voice: &str,
    speed: f32,
    session: &SessionGuard,
    out: &mut Vec<f32>,
) -> Result<(), GenerationError> {
    for buffer in backend.synthesize(text, voice, speed)? {
        let buffer = buffer?;
        if !session.is_active() {
            tracing::info!(session = session.id(), "generation cancelled by client");
            return Err(GenerationError::Cancelled);
        }
        out.extend_from_slice(&buffer);
    }
    Ok(())
}

pub struct Generator {
    models: Arc<ModelManager>,
    sessions: Arc<SessionTracker>,
    config: GenerationConfig,
}

impl Generator {
    pub fn new(
        models: Arc<ModelManager>,
        sessions: Arc<SessionTracker>,
        config: GenerationConfig,
    ) -> Self {
        Self { models, sessions, config }
    }

    pub fn models(&self) -> &Arc<ModelManager> {
        &self.models
    }

    /// Render chunk `chunk_id` of `req.text`.
    ///
    /// On success the session stays registered unless this was the last
    /// chunk, and expires if the walk is abandoned; every error path ends it.
    pub fn generate_single(&self, req: &SingleRequest) -> Result<GeneratedAudio, GenerationError> {
        let session =
            SessionGuard::begin(Arc::clone(&self.sessions), single_session_id(&req.voice, &req.text));

        let language = voice_language(&req.voice)?;
        check_speed(req.speed)?;
        let chunks = chunk_text(&req.text, self.config.max_chunk_chars);
        if chunks.is_empty() {
            return Err(GenerationError::validation("Text must not be empty"));
        }
        let chunk = chunks.get(req.chunk_id).ok_or_else(|| {
            GenerationError::validation(format!(
                "Invalid chunk ID {} (text has {} chunks)",
                req.chunk_id,
                chunks.len()
            ))
        })?;

        tracing::debug!(
            session = session.id(),
            chunk = req.chunk_id,
            total = chunks.len(),
            "generating chunk"
        );

        let mut samples = Vec::new();
        {
            let backend = self.models.acquire(language.code())?;
            synthesize_into(&*backend, chunk, &req.voice, req.speed, &session, &mut samples)?;
        }
        if samples.is_empty() {
            return Err(anyhow::anyhow!("backend produced no audio for chunk {}", req.chunk_id).into());
        }
        let wav = audio::finish_track(samples, self.config.dither)?;

        let session_id = if req.chunk_id + 1 == chunks.len() {
            session.id().to_owned()
        } else {
            session.keep()
        };
        Ok(GeneratedAudio {
            wav,
            session_id,
            meta: AudioMeta::Single { total_chunks: chunks.len(), current_chunk: req.chunk_id },
        })
    }

    /// Render every speaker segment of `req.text` into one track.
    pub fn generate_multi(&self, req: &MultiRequest) -> Result<GeneratedAudio, GenerationError> {
        let session = SessionGuard::begin(Arc::clone(&self.sessions), multi_session_id(&req.text));

        check_speed(req.speed)?;
        let segments = parse_segments(&req.text);
        if segments.is_empty() {
            return Err(GenerationError::validation("No valid segments found in text"));
        }

        // Every speaker is resolved before any synthesis starts.
        let plan = segments
            .iter()
            .map(|seg| {
                let invalid = || {
                    GenerationError::validation(format!(
                        "Voice for speaker {} is invalid or not provided",
                        seg.speaker
                    ))
                };
                let voice = req.speakers.get(&seg.speaker).ok_or_else(invalid)?;
                let language = voice_language(voice).map_err(|_| invalid())?;
                Ok((seg, voice.as_str(), language))
            })
            .collect::<Result<Vec<_>, GenerationError>>()?;

        tracing::debug!(session = session.id(), segments = segments.len(), "generating dialogue");

        let mut track = Vec::new();
        for (seg, voice, language) in plan {
            let chunks = chunk_text(&seg.text, self.config.max_chunk_chars);
            if chunks.is_empty() {
                continue;
            }
            let backend = self.models.acquire(language.code())?;
            for chunk in &chunks {
                if !session.is_active() {
                    tracing::info!(session = session.id(), "generation cancelled by client");
                    return Err(GenerationError::Cancelled);
                }
                synthesize_into(&*backend, chunk, voice, req.speed, &session, &mut track)?;
            }
        }
        if track.is_empty() {
            return Err(GenerationError::validation("No audio generated for any segment"));
        }
        let wav = audio::finish_track(track, self.config.dither)?;

        Ok(GeneratedAudio {
            wav,
            session_id: session.id().to_owned(),
            meta: AudioMeta::Multi { segment_count: segments.len() },
        })
    }

    /// Cancel `session_id`.  Returns whether it was active.
    pub fn stop(&self, session_id: &str) -> bool {
        let stopped = self.sessions.end(session_id);
        if stopped {
            tracing::info!(session = session_id, "generation stop requested");
        }
        stopped
    }
}
