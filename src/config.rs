//! Runtime configuration for the model manager and generation paths.

use std::time::Duration;

use crate::{audio::DEFAULT_CROSSFADE_SECS, backend::Device, chunk::DEFAULT_MAX_CHARS};

/// Lifecycle settings of the [`ModelManager`](crate::manager::ModelManager).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Idle time after which the model is unloaded.
    pub unload_timeout: Duration,
    /// `None` lets the loader pick.
    pub device: Option<Device>,
    /// How long an acquirer waits for another thread's load.
    pub load_wait_timeout: Duration,
    /// Idle sweep period.
    pub poll_interval: Duration,
    /// Extra sleep after a failed sweep.
    pub error_backoff: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            unload_timeout: Duration::from_secs(300),
            device: None,
            load_wait_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(30),
            error_backoff: Duration::from_secs(60),
        }
    }
}

/// Settings shared by every generation request.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub max_chunk_chars: usize,
    /// Add ±0.5 LSB uniform noise before quantising.
    pub dither: bool,
    /// Crossfade length for locally rendered documents, in seconds.
    pub crossfade: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self { max_chunk_chars: DEFAULT_MAX_CHARS, dither: false, crossfade: DEFAULT_CROSSFADE_SECS }
    }
}
