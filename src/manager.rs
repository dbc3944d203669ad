//! Model lifecycle: lazy load, idle unload, forced unload.
//!
//! The manager owns every loaded [`SynthesisBackend`] and hands them out only
//! through a scoped [`BackendLease`].  State moves
//! `Unloaded → Loading → Loaded → Unloaded`; the whole backend set is loaded
//! and dropped as one unit.
//!
//! Exactly one acquirer performs a load.  It does so with the state lock
//! released so status reads and other acquirers are never blocked behind the
//! backend constructor; those acquirers wait on a condition variable for at
//! most `load_wait_timeout`.
//!
//! A background thread (started on the first acquisition) unloads the model
//! once it has been idle for `unload_timeout` and no lease is outstanding.
//!
//! [`SynthesisBackend::release`] runs when the last holder of a pipeline lets
//! go of it, so a forced unload never releases a backend under a live lease.

use std::{
    collections::HashMap,
    mem,
    ops::Deref,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::Serialize;

use crate::{
    backend::{BackendLoader, BackendSet, Device, MemoryUsage, SynthesisBackend},
    config::ManagerConfig,
    error::ModelError,
    language::Language,
};

/// Smallest idle timeout accepted by [`ModelManager::update_timeout`], in seconds.
pub const MIN_UNLOAD_TIMEOUT: u64 = 60;

/// A loaded pipeline; released when the last `Arc` to it is dropped.
struct Pipeline {
    language: Language,
    backend: Arc<dyn SynthesisBackend>,
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if thread::panicking() {
            tracing::warn!(language = %self.language, "skipping backend release while unwinding");
            return;
        }
        if let Err(err) = self.backend.release() {
            tracing::warn!(
                language = %self.language,
                error = %format!("{err:#}"),
                "backend release failed"
            );
        }
    }
}

type Pipelines = HashMap<Language, Arc<Pipeline>>;

fn install(set: BackendSet) -> Pipelines {
    set.into_iter()
        .map(|(language, backend)| (language, Arc::new(Pipeline { language, backend })))
        .collect()
}

enum Phase {
    Unloaded,
    Loading,
    Loaded(Pipelines),
}

struct State {
    phase: Phase,
    last_activity: Instant,
    unload_timeout: Duration,
    leases: usize,
    load_count: u64,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    /// Signalled whenever a load finishes, successfully or not.
    load_done: Condvar,
    /// Wakes the idle sweeper early (shutdown).
    sweep_wake: Condvar,
    loader: Arc<dyn BackendLoader>,
    device: Device,
    load_wait: Duration,
    poll_interval: Duration,
    error_backoff: Duration,
}

/// Point-in-time view of the manager.
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub model_loaded: bool,
    pub device: Device,
    /// Seconds.
    pub unload_timeout: u64,
    /// Seconds since the last acquisition or release; `None` while unloaded.
    pub time_since_last_activity: Option<f64>,
    pub is_loading: bool,
    pub available_languages: Vec<char>,
    pub active_leases: usize,
    pub load_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryUsage>,
}

pub struct ModelManager {
    shared: Arc<Shared>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ModelManager {
    pub fn new(loader: Arc<dyn BackendLoader>, config: ManagerConfig) -> Self {
        let device = config.device.unwrap_or_else(|| loader.preferred_device());
        tracing::info!(
            device = %device,
            unload_timeout_secs = config.unload_timeout.as_secs(),
            "model manager initialised"
        );
        let state = State {
            phase: Phase::Unloaded,
            last_activity: Instant::now(),
            unload_timeout: config.unload_timeout,
            leases: 0,
            load_count: 0,
            shutdown: false,
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                load_done: Condvar::new(),
                sweep_wake: Condvar::new(),
                loader,
                device,
                load_wait: config.load_wait_timeout,
                poll_interval: config.poll_interval,
                error_backoff: config.error_backoff,
            }),
            sweeper: Mutex::new(None),
        }
    }

    /// Borrow the backend for language `code`, loading the model first if
    /// needed.  The activity clock is refreshed now and again when the lease
    /// is dropped.
    pub fn acquire(&self, code: char) -> Result<BackendLease, ModelError> {
        let language = Language::from_code(code)?;
        self.ensure_sweeper();

        let shared = &self.shared;
        let mut state = shared.state.lock();
        if state.shutdown {
            return Err(ModelError::ShutDown);
        }
        state.last_activity = Instant::now();

        let deadline = Instant::now() + shared.load_wait;
        // Load count when this acquirer started waiting on another's load.
        let mut waited_from = None;
        loop {
            match &state.phase {
                Phase::Loaded(set) => {
                    let pipeline = set
                        .get(&language)
                        .cloned()
                        .ok_or(ModelError::BackendUnavailable(language))?;
                    state.leases += 1;
                    return Ok(BackendLease { pipeline, shared: Arc::clone(shared) });
                }
                Phase::Loading => {
                    waited_from.get_or_insert(state.load_count);
                    let timed_out = shared.load_done.wait_until(&mut state, deadline).timed_out();
                    if state.shutdown {
                        return Err(ModelError::ShutDown);
                    }
                    if timed_out && matches!(state.phase, Phase::Loading) {
                        return Err(ModelError::LoadTimeout(shared.load_wait));
                    }
                }
                Phase::Unloaded => {
                    check_reload(waited_from, state.load_count)?;
                    self.load_locked(&mut state)?
                }
            }
        }
    }

    /// Build the backend set with the state lock released.
    fn load_locked(&self, state: &mut MutexGuard<'_, State>) -> Result<(), ModelError> {
        let shared = &self.shared;
        state.phase = Phase::Loading;
        tracing::info!(device = %shared.device, "loading synthesis model");
        let started = Instant::now();

        let result = MutexGuard::unlocked(state, || {
            panic::catch_unwind(AssertUnwindSafe(|| shared.loader.load(shared.device)))
        });

        let outcome = match result {
            Ok(Ok(set)) if state.shutdown => {
                drop(install(set));
                state.phase = Phase::Unloaded;
                Err(ModelError::ShutDown)
            }
            Ok(Ok(set)) => {
                tracing::info!(
                    languages = set.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "model loaded"
                );
                state.phase = Phase::Loaded(install(set));
                state.load_count += 1;
                state.last_activity = Instant::now();
                Ok(())
            }
            Ok(Err(err)) => {
                tracing::error!(error = %format!("{err:#}"), "model load failed");
                state.phase = Phase::Unloaded;
                Err(ModelError::LoadFailed(format!("{err:#}")))
            }
            Err(_) => {
                tracing::error!("model loader panicked");
                state.phase = Phase::Unloaded;
                Err(ModelError::LoadFailed("loader panicked".into()))
            }
        };
        shared.load_done.notify_all();
        outcome
    }

    /// Drop the loaded backends now, whatever their recency.  Outstanding
    /// leases keep their pipeline alive, and unreleased, until they end.
    pub fn force_unload(&self) {
        let mut state = self.shared.state.lock();
        if unload_locked(&mut state) {
            tracing::info!("model force-unloaded");
        }
    }

    /// Unload if the model has been idle for the configured timeout and
    /// nothing is leased.  Returns whether an unload happened.
    pub fn unload_if_idle(&self) -> bool {
        sweep(&mut self.shared.state.lock())
    }

    pub fn status(&self) -> ModelStatus {
        let mut status = {
            let state = self.shared.state.lock();
            let (loaded, languages) = match &state.phase {
                Phase::Loaded(set) => {
                    let mut langs: Vec<Language> = set.keys().copied().collect();
                    langs.sort_unstable();
                    (true, langs.into_iter().map(Language::code).collect())
                }
                _ => (false, Vec::new()),
            };
            ModelStatus {
                model_loaded: loaded,
                device: self.shared.device,
                unload_timeout: state.unload_timeout.as_secs(),
                time_since_last_activity: loaded
                    .then(|| state.last_activity.elapsed().as_secs_f64()),
                is_loading: matches!(state.phase, Phase::Loading),
                available_languages: languages,
                active_leases: state.leases,
                load_count: state.load_count,
                memory: None,
            }
        };
        status.memory = self.shared.loader.memory_usage(self.shared.device);
        status
    }

    /// Replace the idle timeout.  Values under [`MIN_UNLOAD_TIMEOUT`] are
    /// rejected.
    pub fn update_timeout(&self, seconds: u64) -> Result<(), ModelError> {
        if seconds < MIN_UNLOAD_TIMEOUT {
            return Err(ModelError::InvalidTimeout {
                requested: seconds,
                minimum: MIN_UNLOAD_TIMEOUT,
            });
        }
        self.shared.state.lock().unload_timeout = Duration::from_secs(seconds);
        tracing::info!(seconds, "updated unload timeout");
        Ok(())
    }

    /// Stop the idle sweeper and unload.  Safe to call more than once.
    pub fn shutdown(&self) {
        let first = {
            let mut state = self.shared.state.lock();
            let first = !state.shutdown;
            state.shutdown = true;
            first
        };
        self.shared.sweep_wake.notify_all();
        self.shared.load_done.notify_all();

        if let Some(handle) = self.sweeper.lock().take() {
            if handle.join().is_err() {
                tracing::warn!("idle sweeper thread panicked");
            }
        }
        self.force_unload();
        if first {
            tracing::info!("model manager shut down");
        }
    }

    fn ensure_sweeper(&self) {
        let mut slot = self.sweeper.lock();
        if slot.is_some() || self.shared.state.lock().shutdown {
            return;
        }
        let shared = Arc::clone(&self.shared);
        match thread::Builder::new()
            .name("model-idle-sweep".into())
            .spawn(move || run_sweeper(shared))
        {
            Ok(handle) => {
                tracing::debug!("started idle sweeper");
                *slot = Some(handle);
            }
            Err(err) => tracing::warn!(error = %err, "could not start idle sweeper"),
        }
    }
}

impl Drop for ModelManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Scoped access to one language's backend.
pub struct BackendLease {
    pipeline: Arc<Pipeline>,
    shared: Arc<Shared>,
}

impl BackendLease {
    pub fn language(&self) -> Language {
        self.pipeline.language
    }
}

impl Deref for BackendLease {
    type Target = dyn SynthesisBackend;

    fn deref(&self) -> &Self::Target {
        self.pipeline.backend.as_ref()
    }
}

impl Drop for BackendLease {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.leases = state.leases.saturating_sub(1);
        state.last_activity = Instant::now();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unloading
// ─────────────────────────────────────────────────────────────────────────────

/// Drop the manager's hold on the pipelines.  Pipelines without a live
/// lease are released here; the rest when their last lease ends.
fn unload_locked(state: &mut State) -> bool {
    match mem::replace(&mut state.phase, Phase::Unloaded) {
        Phase::Loaded(set) => {
            drop(set);
            true
        }
        other => {
            state.phase = other;
            false
        }
    }
}

/// A waiter that finds the model unloaded may load it again only if the
/// load it waited on succeeded (and was since unloaded).
fn check_reload(waited_from: Option<u64>, load_count: u64) -> Result<(), ModelError> {
    match waited_from {
        Some(count) if count == load_count => {
            Err(ModelError::LoadFailed("model load by another request failed".into()))
        }
        _ => Ok(()),
    }
}

/// Re-check idleness under the lock, then unload.
fn sweep(state: &mut State) -> bool {
    if !matches!(state.phase, Phase::Loaded(_)) || state.leases > 0 {
        return false;
    }
    let idle = state.last_activity.elapsed();
    if idle < state.unload_timeout {
        return false;
    }
    tracing::info!(idle_secs = idle.as_secs(), "unloading model due to inactivity");
    unload_locked(state)
}

fn run_sweeper(shared: Arc<Shared>) {
    let mut state = shared.state.lock();
    let mut pause = shared.poll_interval;
    loop {
        let deadline = Instant::now() + pause;
        while !state.shutdown && !shared.sweep_wake.wait_until(&mut state, deadline).timed_out() {}
        if state.shutdown {
            break;
        }
        pause = match panic::catch_unwind(AssertUnwindSafe(|| sweep(&mut state))) {
            Ok(_) => shared.poll_interval,
            Err(_) => {
                tracing::warn!(
                    backoff_secs = shared.error_backoff.as_secs(),
                    "idle sweep failed, backing off"
                );
                shared.error_backoff
            }
        };
    }
    tracing::debug!("idle sweeper stopped");
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
