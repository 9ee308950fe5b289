use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use super::SessionState;

/// Handle to one session's state. The async mutex is held for a whole user
/// action so actions on the same session run one at a time.
pub type SharedSession = Arc<tokio::sync::Mutex<SessionState>>;

pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(2 * 60 * 60);
pub const DEFAULT_MAX_SESSIONS: usize = 1000;

struct Entry {
    session: SharedSession,
    last_seen: Instant,
}

/// In-memory sessions keyed by the id stored in the browser cookie.
///
/// Sessions idle for longer than the TTL are dropped, and the store never
/// holds more than `max_sessions` entries: creating one past the bound evicts
/// the least recently seen.
pub struct SessionStore {
    sessions: Mutex<HashMap<Uuid, Entry>>,
    idle_ttl: Duration,
    max_sessions: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_limits(DEFAULT_IDLE_TTL, DEFAULT_MAX_SESSIONS)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(idle_ttl: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_ttl,
            max_sessions: max_sessions.max(1),
        }
    }

    pub fn get_or_create(&self, id: Uuid) -> SharedSession {
        self.get_or_create_at(id, Instant::now())
    }

    /// Existing, non-expired session; refreshes its idle timer.
    pub fn get(&self, id: Uuid) -> Option<SharedSession> {
        self.get_at(id, Instant::now())
    }

    pub fn remove(&self, id: Uuid) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn get_or_create_at(&self, id: Uuid, now: Instant) -> SharedSession {
        let mut sessions = self.lock();
        if let Some(entry) = sessions.get_mut(&id) {
            if now.saturating_duration_since(entry.last_seen) < self.idle_ttl {
                entry.last_seen = now;
                return entry.session.clone();
            }
        }

        self.evict(&mut sessions, now);
        let session = Arc::new(tokio::sync::Mutex::new(SessionState::new()));
        sessions.insert(
            id,
            Entry {
                session: session.clone(),
                last_seen: now,
            },
        );
        session
    }

    fn get_at(&self, id: Uuid, now: Instant) -> Option<SharedSession> {
        let mut sessions = self.lock();
        let entry = sessions.get_mut(&id)?;
        if now.saturating_duration_since(entry.last_seen) >= self.idle_ttl {
            sessions.remove(&id);
            return None;
        }
        entry.last_seen = now;
        Some(entry.session.clone())
    }

    /// Make room for one more entry.
    fn evict(&self, sessions: &mut HashMap<Uuid, Entry>, now: Instant) {
        let before = sessions.len();
        sessions.retain(|_, e| now.saturating_duration_since(e.last_seen) < self.idle_ttl);

        while sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, e)| e.last_seen)
                .map(|(id, _)| *id);
            match oldest {
                Some(id) => sessions.remove(&id),
                None => break,
            };
        }

        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, remaining = sessions.len(), "sessions evicted");
        }
    }

    // The map holds no invariant a panicking holder could break.
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Entry>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
