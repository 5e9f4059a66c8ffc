//! Replay protection
//!
//! Single-use nonce tracking with a time-bounded retention window.
//! Membership is the only signal: a nonce present in the table is used,
//! even when its entry has outlived the window but has not been swept
//! yet.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// How often the background sweep evicts aged-out nonces.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Thread-safe table of recently seen nonces.
pub struct ReplayGuard {
    seen: DashMap<String, Instant>,
    ttl: Duration,
}

impl ReplayGuard {
    /// Create a guard retaining nonces for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            ttl,
        }
    }

    /// Atomically test and record a nonce.
    ///
    /// Returns `true` when the nonce was fresh (now recorded), `false`
    /// when it was already present. Concurrent submissions of one nonce
    /// resolve to exactly one `true`.
    pub fn check_and_record(&self, nonce: &str) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.seen.entry(nonce.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(Instant::now());
                true
            }
        }
    }

    /// Evict entries older than the retention window.
    pub fn sweep(&self) {
        // checked_sub: shortly after boot the monotonic clock may not
        // reach back a full window yet, and then nothing can be old
        let Some(cutoff) = Instant::now().checked_sub(self.ttl) else {
            return;
        };
        let before = self.seen.len();
        self.seen.retain(|_, first_seen| *first_seen > cutoff);
        let evicted = before.saturating_sub(self.seen.len());
        if evicted > 0 {
            debug!(evicted, retained = self.seen.len(), "nonce sweep");
        }
    }

    /// Number of recorded nonces, aged-out entries included.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Spawn the periodic sweep task. Runs for the life of the process.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let guard = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick fires immediately; skip it
            ticker.tick().await;
            loop {
                ticker.tick().await;
                guard.sweep();
            }
        })
    }
}
