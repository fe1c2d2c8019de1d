use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How long a dedup entry stays alive after insertion.
pub const ENTRY_TTL: Duration = Duration::from_secs(60 * 60);

/// How often the background sweep runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Time-bounded set of already-alerted event keys.
///
/// Locking is internal; `seen`/`mark_seen` are safe from any number of tasks.
/// Growth is bounded by the periodic TTL sweep, there is no capacity cap.
#[derive(Debug, Default)]
pub struct DedupCache {
    entries: Mutex<HashMap<(i64, i32), Instant>>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self, key: (i64, i32)) -> bool {
        self.entries
            .lock()
            .map(|m| m.contains_key(&key))
            .unwrap_or(false)
    }

    /// Record a key with a fresh TTL. Idempotent: marking an already-seen key
    /// keeps the original expiry.
    pub fn mark_seen(&self, key: (i64, i32)) {
        if let Ok(mut map) = self.entries.lock() {
            map.entry(key).or_insert_with(|| Instant::now() + ENTRY_TTL);
        }
    }

    /// Drop every entry whose expiry has passed.
    pub fn sweep(&self, now: Instant) {
        if let Ok(mut map) = self.entries.lock() {
            map.retain(|_, expiry| *expiry > now);
        }
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or(0)
    }
}
