//! # torchts
//!
//! Text-to-speech service core: bounded-length text chunking, an on-demand
//! model lifecycle with idle unload, cancellable chunked generation and
//! 16-bit WAV post-processing.
//!
//! ## Quick start
//!
//! ```no_run
//! # #[cfg(feature = "espeak")]
//! # fn main() -> anyhow::Result<()> {
//! use std::sync::Arc;
//! use torchts::{
//!     backend::onnx::OnnxLoader, download::ModelSource, Generator, GenerationConfig,
//!     ManagerConfig, ModelManager, SessionTracker, SingleRequest,
//! };
//!
//! let loader = OnnxLoader::new(ModelSource::parse("./kokoro"));
//! let models = Arc::new(ModelManager::new(Arc::new(loader), ManagerConfig::default()));
//! let generator =
//!     Generator::new(models, Arc::new(SessionTracker::new()), GenerationConfig::default());
//!
//! let audio = generator.generate_single(&SingleRequest {
//!     text: "Hello from Rust! This is the second sentence.".into(),
//!     voice: "af_heart".into(),
//!     chunk_id: 0,
//!     speed: 1.0,
//! })?;
//! std::fs::write("chunk0.wav", &audio.wav)?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "espeak"))]
//! # fn main() {}
//! ```
//!
//! ## Pipeline
//! 1. **Chunking**: text split into ≤ 400-char chunks at sentence, clause
//!    and word boundaries.
//! 2. **Model lease**: the [`ModelManager`] loads every language pipeline on
//!    first use and unloads them after a period of inactivity.
//! 3. **Synthesis**: the backend yields audio buffers lazily; the session is
//!    checked after each one so a stop request takes effect mid-chunk.
//! 4. **Assembly**: buffers concatenated (HTTP) or crossfaded (local
//!    render), peak-normalised, quantised to 16-bit and wrapped in WAV.
//!
//! ## Features
//! | Feature  | Enables                                                    |
//! |----------|------------------------------------------------------------|
//! | `espeak` | `libespeak-ng` phonemiser and the text-level ONNX backend  |
//! | `server` | axum HTTP API ([`server`])                                 |

pub mod audio;
pub mod backend;
pub mod chunk;
pub mod config;
pub mod download;
pub mod error;
pub mod generate;
pub mod language;
pub mod manager;
pub mod render;
pub mod session;

#[cfg(feature = "espeak")]
pub mod phonemize;

#[cfg(feature = "server")]
pub mod server;

// ─── Re-exports for convenience ─────────────────────────────────────────────

pub use audio::SAMPLE_RATE;
pub use backend::{BackendLoader, Device, SynthesisBackend};
pub use config::{GenerationConfig, ManagerConfig};
pub use error::{GenerationError, ModelError};
pub use generate::{GeneratedAudio, Generator, MultiRequest, SingleRequest};
pub use language::Language;
pub use manager::{BackendLease, ModelManager, ModelStatus};
pub use session::SessionTracker;
