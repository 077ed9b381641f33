use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Number of lock shards in the counter store
const SHARD_COUNT: usize = 16;

/// Identity a call counter is keyed by: the caller identity (subscription
/// key or network identity, per the configured key mode) plus the scope
/// of the declaring rate-limit directive
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub identity: String,
    pub scope: String,
}

impl RateLimitKey {
    pub fn new(identity: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            scope: scope.into(),
        }
    }
}

/// Admission decision for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Call admitted; `remaining` is the budget left in the window
    Allowed { remaining: u32 },

    /// Call rejected; retry once the window renews
    Rejected { retry_after: Duration },
}

/// One fixed window of call budget
#[derive(Debug)]
struct Window {
    window_end: Instant,
    count: u32,
}

/// Fixed-window call counter store, shared across all in-flight requests.
///
/// Counters are sharded over independently locked maps; a decision takes
/// one short critical section, so concurrent calls for the same key
/// observe a linearizable admit/reject sequence. Windows are not
/// smoothed: bursts at window edges are accepted.
pub struct RateLimiter {
    shards: Vec<Mutex<HashMap<RateLimitKey, Window>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT)
                .map(|_| Mutex::new(HashMap::new()))
                .collect(),
        }
    }

    fn shard(&self, key: &RateLimitKey) -> &Mutex<HashMap<RateLimitKey, Window>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Decide admission for one call against a `limit` calls per
    /// `window` budget.
    pub fn admit(&self, key: &RateLimitKey, limit: u32, window: Duration) -> RateLimitDecision {
        self.admit_at(key, limit, window, Instant::now())
    }

    /// Admission decision at an explicit point in time
    pub fn admit_at(
        &self,
        key: &RateLimitKey,
        limit: u32,
        window: Duration,
        now: Instant,
    ) -> RateLimitDecision {
        let mut shard = self.shard(key).lock().unwrap_or_else(|e| e.into_inner());

        match shard.get_mut(key) {
            None => {
                shard.insert(
                    key.clone(),
                    Window {
                        window_end: now + window,
                        count: 1,
                    },
                );
                RateLimitDecision::Allowed {
                    remaining: limit.saturating_sub(1),
                }
            }
            Some(entry) => {
                if now >= entry.window_end {
                    // renewal period elapsed: open a fresh window
                    entry.window_end = now + window;
                    entry.count = 1;
                    RateLimitDecision::Allowed {
                        remaining: limit.saturating_sub(1),
                    }
                } else if entry.count < limit {
                    entry.count += 1;
                    RateLimitDecision::Allowed {
                        remaining: limit - entry.count,
                    }
                } else {
                    RateLimitDecision::Rejected {
                        retry_after: entry.window_end - now,
                    }
                }
            }
        }
    }

    /// Drop counters whose window has ended. Rejecting and re-admitting
    /// works without this; it only bounds memory for long-idle keys.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap_or_else(|e| e.into_inner());
            let before = shard.len();
            shard.retain(|_, window| now < window.window_end);
            removed += before - shard.len();
        }
        removed
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key(identity: &str) -> RateLimitKey {
        RateLimitKey::new(identity, "stock")
    }

    #[test]
    fn test_calls_within_budget_all_allowed() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        let window = Duration::from_secs(60);

        for i in 0..5 {
            let decision = limiter.admit_at(&key("sub-1"), 5, window, now);
            assert_eq!(
                decision,
                RateLimitDecision::Allowed { remaining: 4 - i },
                "call {} should be allowed",
                i + 1
            );
        }
    }

    #[test]
    fn test_sixth_call_rejected_with_remaining_window() {
        // 5 calls/60s: calls 1-5 at t=0 allowed, call 6 at t=10 rejected
        // with retry-after ~50s, call 7 at t=61 allowed again
        let limiter = RateLimiter::new();
        let start = Instant::now();
        let window = Duration::from_secs(60);

        for _ in 0..5 {
            assert!(matches!(
                limiter.admit_at(&key("sub-1"), 5, window, start),
                RateLimitDecision::Allowed { .. }
            ));
        }

        let at_10s = start + Duration::from_secs(10);
        match limiter.admit_at(&key("sub-1"), 5, window, at_10s) {
            RateLimitDecision::Rejected { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(50));
            }
            other => panic!("unexpected decision: {:?}", other),
        }

        let at_61s = start + Duration::from_secs(61);
        assert_eq!(
            limiter.admit_at(&key("sub-1"), 5, window, at_61s),
            RateLimitDecision::Allowed { remaining: 4 }
        );
    }

    #[test]
    fn test_window_reset_after_renewal_period() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        let window = Duration::from_secs(60);

        assert!(matches!(
            limiter.admit_at(&key("sub-1"), 1, window, start),
            RateLimitDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.admit_at(&key("sub-1"), 1, window, start),
            RateLimitDecision::Rejected { .. }
        ));

        // counter resets to 1 regardless of prior rejections
        let renewed = start + window;
        assert_eq!(
            limiter.admit_at(&key("sub-1"), 1, window, renewed),
            RateLimitDecision::Allowed { remaining: 0 }
        );
    }

    #[test]
    fn test_keys_do_not_share_budget() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        let window = Duration::from_secs(60);

        assert!(matches!(
            limiter.admit_at(&key("sub-1"), 1, window, now),
            RateLimitDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.admit_at(&key("sub-2"), 1, window, now),
            RateLimitDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.admit_at(
                &RateLimitKey::new("sub-1", "other-scope"),
                1,
                window,
                now
            ),
            RateLimitDecision::Allowed { .. }
        ));
    }

    #[test]
    fn test_concurrent_admissions_never_exceed_limit() {
        let limiter = Arc::new(RateLimiter::new());
        let now = Instant::now();
        let window = Duration::from_secs(60);
        let limit = 50;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    let mut admitted = 0;
                    for _ in 0..25 {
                        if matches!(
                            limiter.admit_at(&key("shared"), limit, window, now),
                            RateLimitDecision::Allowed { .. }
                        ) {
                            admitted += 1;
                        }
                    }
                    admitted
                })
            })
            .collect();

        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, limit);
    }

    #[test]
    fn test_purge_drops_only_ended_windows() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        limiter.admit_at(&key("short"), 5, Duration::from_secs(10), now);
        limiter.admit_at(&key("long"), 5, Duration::from_secs(120), now);

        let removed = limiter.purge_expired(now + Duration::from_secs(30));
        assert_eq!(removed, 1);

        // the surviving window still counts prior calls
        assert_eq!(
            limiter.admit_at(&key("long"), 5, Duration::from_secs(120), now),
            RateLimitDecision::Allowed { remaining: 3 }
        );
    }
}
