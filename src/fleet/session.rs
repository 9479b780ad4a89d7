//! Session affinity bindings
//!
//! Bindings live in a sharded concurrent map so the router can read and
//! record them while holding only the registry's shared lock.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Default affinity window
pub const DEFAULT_AFFINITY_TTL: Duration = Duration::from_secs(30 * 60);

/// A session pinned to a server
#[derive(Debug, Clone)]
pub struct SessionBinding {
    pub server_id: String,
    pub bound_at: Instant,
}

impl SessionBinding {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.bound_at.elapsed() > ttl
    }
}

/// session_id -> server binding
#[derive(Debug, Default)]
pub struct SessionStore {
    bindings: DashMap<String, SessionBinding>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind (or rebind) a session to a server
    pub fn bind(&self, session_id: &str, server_id: &str) {
        self.bindings.insert(
            session_id.to_string(),
            SessionBinding {
                server_id: server_id.to_string(),
                bound_at: Instant::now(),
            },
        );
    }

    /// Server bound to this session, dropping the binding if it outlived `ttl`
    pub fn lookup(&self, session_id: &str, ttl: Duration) -> Option<String> {
        let binding = self.bindings.get(session_id)?;
        if !binding.is_expired(ttl) {
            return Some(binding.server_id.clone());
        }
        drop(binding);

        self.bindings
            .remove_if(session_id, |_, b| b.is_expired(ttl));
        None
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.bindings.remove(session_id).is_some()
    }

    /// Drop every binding that points at `server_id`
    pub fn purge_server(&self, server_id: &str) -> usize {
        let mut removed = 0;
        self.bindings.retain(|_, b| {
            let keep = b.server_id != server_id;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Drop every binding older than `ttl`
    pub fn purge_expired(&self, ttl: Duration) -> usize {
        let mut removed = 0;
        self.bindings.retain(|_, b| {
            let keep = !b.is_expired(ttl);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
