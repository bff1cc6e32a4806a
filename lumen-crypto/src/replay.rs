//! Nonce replay suppression.
//!
//! A nonce is accepted at most once within its TTL. The cache is a
//! process-wide map; insert-if-absent is atomic under the mutex, and every
//! insert opportunistically sweeps expired entries so the map stays bounded
//! without a dedicated janitor task.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::Duration,
};

use lumen_common::time::TimestampMs;

/// Nonces are remembered for 10 minutes, comfortably covering the 5-minute
/// envelope timestamp window on both sides.
pub const NONCE_TTL: Duration = Duration::from_secs(10 * 60);

/// Sweep on insert once the map exceeds this many entries.
const SWEEP_THRESHOLD: usize = 4096;

pub struct NonceCache {
    ttl: Duration,
    seen: Mutex<HashMap<String, TimestampMs>>,
}

impl NonceCache {
    pub fn new() -> Self {
        Self::with_ttl(NONCE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Record `nonce` at `now`. Returns `false` iff the nonce was already
    /// seen within the TTL (i.e. this is a replay).
    pub fn insert_if_absent(&self, nonce: &str, now: TimestampMs) -> bool {
        let mut seen = self.seen.lock().expect("Nonce cache poisoned");

        if let Some(&ts) = seen.get(nonce) {
            if now.saturating_since(ts) < self.ttl {
                return false;
            }
            // expired entry; fall through and overwrite
        }

        if seen.len() >= SWEEP_THRESHOLD {
            let ttl = self.ttl;
            seen.retain(|_, &mut ts| now.saturating_since(ts) < ttl);
        }

        seen.insert(nonce.to_owned(), now);
        true
    }

    /// Drop every entry older than the TTL.
    pub fn sweep(&self, now: TimestampMs) {
        let mut seen = self.seen.lock().expect("Nonce cache poisoned");
        let ttl = self.ttl;
        seen.retain(|_, &mut ts| now.saturating_since(ts) < ttl);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

impl Default for NonceCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accepts_once_within_ttl() {
        let cache = NonceCache::new();
        let now = TimestampMs(1_000_000);
        assert!(cache.insert_if_absent("n1", now));
        assert!(!cache.insert_if_absent("n1", now));
        assert!(!cache.insert_if_absent(
            "n1",
            now.saturating_add(Duration::from_secs(9 * 60))
        ));
        assert!(cache.insert_if_absent("n2", now));
    }

    #[test]
    fn expired_nonce_is_accepted_again() {
        let cache = NonceCache::with_ttl(Duration::from_secs(60));
        let now = TimestampMs(1_000_000);
        assert!(cache.insert_if_absent("n1", now));
        let later = now.saturating_add(Duration::from_secs(61));
        assert!(cache.insert_if_absent("n1", later));
    }

    #[test]
    fn sweep_purges_old_entries() {
        let cache = NonceCache::with_ttl(Duration::from_secs(60));
        let now = TimestampMs(0);
        cache.insert_if_absent("old", now);
        cache.insert_if_absent("new", TimestampMs(59_000));
        cache.sweep(TimestampMs(61_000));
        assert_eq!(cache.len(), 1);
    }
}
