//! Synthesis backend seam.
//!
//! The model manager owns a [`BackendLoader`] and asks it for a full
//! [`BackendSet`] (one pipeline per language) whenever the model has to be
//! (re)loaded.  Callers only ever see a single [`SynthesisBackend`] through a
//! scoped lease.

use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};

use anyhow::Result;
use serde::Serialize;

use crate::language::Language;

pub mod npz;
pub mod onnx;
pub mod vocab;

/// Mono `f32` samples at [`crate::audio::SAMPLE_RATE`] Hz.
pub type AudioBuffer = Vec<f32>;

/// Lazy, finite sequence of buffers produced for one text chunk.
pub type BufferStream<'a> = Box<dyn Iterator<Item = Result<AudioBuffer>> + Send + 'a>;

/// Every pipeline produced by one load, keyed by language.
pub type BackendSet = HashMap<Language, Arc<dyn SynthesisBackend>>;

/// A loaded synthesis pipeline for one language.
pub trait SynthesisBackend: Send + Sync {
    /// Start synthesising `text` with `voice`.
    ///
    /// Work happens as the stream is pulled; dropping the stream early stops
    /// synthesis at the next buffer boundary.
    fn synthesize<'a>(&'a self, text: &'a str, voice: &'a str, speed: f32)
        -> Result<BufferStream<'a>>;

    /// Release device resources ahead of drop.  Called once, after unload,
    /// when no lease still uses the pipeline; failures are logged and
    /// otherwise ignored.
    fn release(&self) -> Result<()> {
        Ok(())
    }
}

/// Builds the synthesis pipelines for every supported language at once.
pub trait BackendLoader: Send + Sync {
    fn load(&self, device: Device) -> Result<BackendSet>;

    /// Device used when none is configured.
    fn preferred_device(&self) -> Device {
        Device::Cpu
    }

    /// Memory counters of `device`, when the backend can report them.
    fn memory_usage(&self, _device: Device) -> Option<MemoryUsage> {
        None
    }
}

/// Compute device the model is placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Cuda,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        })
    }
}

impl FromStr for Device {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda),
            other => anyhow::bail!("Unknown device '{}', expected cpu or cuda", other),
        }
    }
}

/// Bytes held on the model's device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub allocated: u64,
    pub reserved: u64,
}
