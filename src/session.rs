//! Active generation sessions.
//!
//! A session id stays in the set while its generation may still be stopped.
//! The synthesis loop polls [`SessionTracker::is_active`] between buffers;
//! removing the id is how a client cancels.  The lock is held only for the
//! set operation itself, never across synthesis.
//!
//! Ids left registered between requests (see [`SessionGuard::keep`]) expire
//! once idle for the tracker's TTL.  Expired ids are purged on `begin`, at
//! most once per TTL.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;

/// Idle lifetime of a kept session.
pub const DEFAULT_KEPT_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy)]
struct Entry {
    touched: Instant,
    /// No request is currently generating for this id.
    kept: bool,
}

#[derive(Debug)]
struct Sessions {
    entries: HashMap<String, Entry>,
    last_purge: Instant,
}

#[derive(Debug)]
pub struct SessionTracker {
    active: Mutex<Sessions>,
    kept_ttl: Duration,
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_KEPT_TTL)
    }
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(kept_ttl: Duration) -> Self {
        Self {
            active: Mutex::new(Sessions { entries: HashMap::new(), last_purge: Instant::now() }),
            kept_ttl,
        }
    }

    /// Mark `id` active.  Re-registering an active id is allowed.
    pub fn begin(&self, id: &str) {
        let mut sessions = self.active.lock();
        let now = Instant::now();
        if now.duration_since(sessions.last_purge) >= self.kept_ttl {
            let ttl = self.kept_ttl;
            let before = sessions.entries.len();
            sessions
                .entries
                .retain(|_, e| !e.kept || now.duration_since(e.touched) < ttl);
            let purged = before - sessions.entries.len();
            if purged > 0 {
                tracing::debug!(purged, "expired idle sessions");
            }
            sessions.last_purge = now;
        }
        sessions.entries.insert(id.to_owned(), Entry { touched: now, kept: false });
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active.lock().entries.contains_key(id)
    }

    /// Remove `id`; returns whether it was active.
    pub fn end(&self, id: &str) -> bool {
        self.active.lock().entries.remove(id).is_some()
    }

    /// Leave `id` registered with no generation running; it expires after
    /// the TTL unless begun again.
    fn park(&self, id: &str) {
        if let Some(entry) = self.active.lock().entries.get_mut(id) {
            *entry = Entry { touched: Instant::now(), kept: true };
        }
    }

    pub fn len(&self) -> usize {
        self.active.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.lock().entries.is_empty()
    }
}

/// Registers a session on creation and ends it on drop unless
/// [`keep`](SessionGuard::keep) was called.
pub struct SessionGuard {
    tracker: Arc<SessionTracker>,
    id: String,
    armed: bool,
}

impl SessionGuard {
    pub fn begin(tracker: Arc<SessionTracker>, id: String) -> Self {
        tracker.begin(&id);
        Self { tracker, id, armed: true }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_active(&self) -> bool {
        self.tracker.is_active(&self.id)
    }

    /// Leave the session registered after the guard is dropped, until it
    /// idles past the tracker's TTL.
    pub fn keep(mut self) -> String {
        self.armed = false;
        self.tracker.park(&self.id);
        std::mem::take(&mut self.id)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.armed {
            self.tracker.end(&self.id);
        }
    }
}
