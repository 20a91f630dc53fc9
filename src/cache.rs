use std::collections::HashMap;
use std::time::Duration;

use log::{debug, trace};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::status::StatusCode;

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Lowercased lookup key. Every cache and lookup operation goes through this.
pub fn normalize(username: &str) -> String {
    username.trim().to_lowercase()
}

struct CacheEntry {
    status: StatusCode,
    resolved_at: Instant,
}

// ─── Status Cache ───────────────────────────────────────────────────
//
// Entries expire lazily: a `get` past the TTL evicts and reports a miss.
// There is no capacity bound; one entry per distinct chat sender.

pub struct StatusCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl StatusCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, username: &str) -> Option<StatusCode> {
        let key = normalize(username);
        let mut entries = self.entries.lock();
        let entry = entries.get(&key)?;
        if entry.resolved_at.elapsed() < self.ttl {
            trace!("cache hit for {} -> {}", key, entry.status);
            return Some(entry.status);
        }
        debug!("cache entry for {} expired", key);
        entries.remove(&key);
        None
    }

    pub fn put(&self, username: &str, status: StatusCode) {
        let key = normalize(username);
        trace!("cache put {} -> {}", key, status);
        self.entries.lock().insert(
            key,
            CacheEntry {
                status,
                resolved_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, username: &str) {
        self.entries.lock().remove(&normalize(username));
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        if !entries.is_empty() {
            debug!("clearing {} cached statuses", entries.len());
        }
        entries.clear();
    }

    /// Number of stored entries, stale ones included. Does not evict.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StatusCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
