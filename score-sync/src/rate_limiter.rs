use crate::config::RateLimitConfig;
use crate::counter;
use crate::metrics_defs::RATE_LIMIT_REJECTED;
use crate::types::FieldKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RateWindowEntry {
    count: u32,
    window_start: Instant,
}

/// Per-field fixed window admission control.
///
/// Entries are only touched by admission checks, so expired ones are evicted
/// lazily on each call instead of by a background sweep.
pub struct RateLimiter {
    window: Duration,
    capacity: u32,
    entries: Mutex<HashMap<FieldKey, RateWindowEntry>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        RateLimiter {
            window: config.window(),
            capacity: config.capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn try_admit(&self, key: &FieldKey) -> bool {
        self.try_admit_at(key, Instant::now())
    }

    /// Admission check against an explicit clock reading. A rejection leaves
    /// the entry untouched.
    pub fn try_admit_at(&self, key: &FieldKey, now: Instant) -> bool {
        let mut entries = self.entries.lock();
        let window = self.window;

        entries.retain(|_, entry| !is_expired(entry, window, now));

        match entries.get_mut(key) {
            None => {
                entries.insert(
                    *key,
                    RateWindowEntry {
                        count: 1,
                        window_start: now,
                    },
                );
                true
            }
            Some(entry) if entry.count < self.capacity => {
                entry.count += 1;
                true
            }
            Some(entry) => {
                tracing::debug!(key = %key, count = entry.count, "rate limited");
                counter!(RATE_LIMIT_REJECTED).increment(1);
                false
            }
        }
    }

    /// Number of keys with a live window.
    #[cfg(test)]
    pub(crate) fn tracked_keys(&self) -> usize {
        self.entries.lock().len()
    }
}

fn is_expired(entry: &RateWindowEntry, window: Duration, now: Instant) -> bool {
    entry.window_start + window < now
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(capacity: u32, window_ms: u64) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            window_ms,
            capacity,
        })
    }

    #[test]
    fn admits_capacity_then_rejects() {
        let limiter = limiter(5, 2000);
        let key = FieldKey::new(1, 1);
        let start = Instant::now();

        for i in 0..5 {
            assert!(
                limiter.try_admit_at(&key, start + Duration::from_millis(i * 100)),
                "admission {i}"
            );
        }
        assert!(!limiter.try_admit_at(&key, start + Duration::from_millis(600)));
        assert!(!limiter.try_admit_at(&key, start + Duration::from_millis(2000)));
    }

    #[test]
    fn window_resets_after_expiry() {
        let limiter = limiter(2, 2000);
        let key = FieldKey::new(1, 1);
        let start = Instant::now();

        assert!(limiter.try_admit_at(&key, start));
        assert!(limiter.try_admit_at(&key, start));
        assert!(!limiter.try_admit_at(&key, start + Duration::from_millis(1500)));

        let later = start + Duration::from_millis(2001);
        assert!(limiter.try_admit_at(&key, later));
        assert!(limiter.try_admit_at(&key, later));
        assert!(!limiter.try_admit_at(&key, later));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = limiter(1, 2000);
        let start = Instant::now();
        let a = FieldKey::new(1, 1);
        let b = FieldKey::new(1, 2);

        assert!(limiter.try_admit_at(&a, start));
        assert!(!limiter.try_admit_at(&a, start));
        assert!(limiter.try_admit_at(&b, start));
    }

    #[test]
    fn expired_entries_are_evicted_lazily() {
        let limiter = limiter(5, 2000);
        let start = Instant::now();

        limiter.try_admit_at(&FieldKey::new(1, 1), start);
        limiter.try_admit_at(&FieldKey::new(2, 1), start);
        assert_eq!(limiter.tracked_keys(), 2);

        limiter.try_admit_at(&FieldKey::new(3, 1), start + Duration::from_millis(2500));
        assert_eq!(limiter.tracked_keys(), 1);
    }
}
