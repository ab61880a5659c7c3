//! Single-lock admission limiter.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::config::{KeyEviction, LimiterConfig};

use super::backend::Admission;
use super::clock::{Clock, MonotonicClock};
use super::key::RateLimitKey;
use super::policy::LimitPolicy;
use super::window::{Decision, WindowLog};

/// Admission limiter guarding all window logs with one mutex.
///
/// Same admission semantics as `AdmissionLimiter`, but every check
/// serializes against every other. Suitable for low to medium throughput,
/// and as a reference when comparing the sharded limiter's behavior.
pub struct SerialLimiter<C: Clock = MonotonicClock> {
    logs: Mutex<HashMap<RateLimitKey, WindowLog>>,
    clock: C,
    eviction: KeyEviction,
    sweep_interval: u64,
    checks: AtomicU64,
}

impl SerialLimiter {
    /// Create a limiter on a monotonic clock with default settings.
    pub fn new() -> Self {
        Self::with_clock(MonotonicClock::new())
    }
}

impl Default for SerialLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> SerialLimiter<C> {
    /// Create a limiter reading time from `clock`.
    pub fn with_clock(clock: C) -> Self {
        Self::with_config(&LimiterConfig::default(), clock)
    }

    /// Create a limiter from configuration, reading time from `clock`.
    pub fn with_config(config: &LimiterConfig, clock: C) -> Self {
        info!(
            eviction = ?config.eviction,
            sweep_interval = config.sweep_interval,
            "Serial limiter initialized"
        );
        Self {
            logs: Mutex::new(HashMap::new()),
            clock,
            eviction: config.eviction,
            sweep_interval: config.sweep_interval,
            checks: AtomicU64::new(0),
        }
    }

    /// Check a request from `identifier` against `policy`.
    pub fn check(&self, identifier: &str, policy: &LimitPolicy) -> Decision {
        let key = RateLimitKey::new(policy.bucket(), identifier);
        trace!(key = %key, limit = policy.limit(), "Checking admission");

        let mut logs = self.logs.lock();
        // Read under the lock so stamps arrive in order
        let now = self.clock.now_ms();

        let decision = match logs.entry(key) {
            Entry::Occupied(mut entry) => {
                let decision = entry
                    .get_mut()
                    .check(now, policy.limit(), policy.window_ms());
                if self.eviction == KeyEviction::EvictIdle && entry.get().is_empty() {
                    entry.remove();
                }
                decision
            }
            Entry::Vacant(entry) => {
                let mut log = WindowLog::new();
                let decision = log.check(now, policy.limit(), policy.window_ms());
                if self.eviction == KeyEviction::Retain || !log.is_empty() {
                    entry.insert(log);
                }
                decision
            }
        };

        if self.sweep_due() {
            logs.retain(|_, log| !log.is_idle(now));
        }
        drop(logs);

        if decision.is_limited() {
            debug!(
                bucket = policy.bucket(),
                identifier = identifier,
                "Rate limit exceeded"
            );
        }
        decision
    }

    fn sweep_due(&self) -> bool {
        if self.eviction != KeyEviction::EvictIdle || self.sweep_interval == 0 {
            return false;
        }
        let checks = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        checks % self.sweep_interval == 0
    }

    /// Get the number of tracked keys.
    pub fn key_count(&self) -> usize {
        self.logs.lock().len()
    }

    /// Clear all window logs.
    pub fn clear(&self) {
        self.logs.lock().clear();
    }
}

impl<C: Clock> Admission for SerialLimiter<C> {
    fn check(&self, identifier: &str, policy: &LimitPolicy) -> Decision {
        SerialLimiter::check(self, identifier, policy)
    }

    fn key_count(&self) -> usize {
        SerialLimiter::key_count(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::policy::PolicySpec;
    use crate::ratelimit::AdmissionLimiter;

    fn policy(limit: u64, window_ms: u64) -> LimitPolicy {
        LimitPolicy::new(limit, window_ms).unwrap()
    }

    /// Drive any limiter through the same timeline and collect verdicts.
    fn replay<A: Admission>(
        limiter: &A,
        clock: &ManualClock,
        calls: &[(u64, &str, &str)],
    ) -> Vec<bool> {
        calls
            .iter()
            .map(|&(t, bucket, identifier)| {
                clock.set(t);
                limiter.check_and_record(identifier, &policy(2, 1000).with_bucket(bucket))
            })
            .collect()
    }

    #[test]
    fn test_limiter_creation() {
        let limiter = SerialLimiter::new();
        assert_eq!(limiter.key_count(), 0);
        assert!(!limiter.check_and_record("client", &LimitPolicy::default()));
        assert_eq!(limiter.key_count(), 1);
    }

    #[test]
    fn test_with_clock_retains_expired_keys() {
        let clock = ManualClock::new(0);
        let limiter = SerialLimiter::with_clock(clock.clone());

        limiter.check_and_record("a", &policy(1, 1000));
        clock.set(5000);
        limiter.check_and_record("b", &policy(1, 1000));
        assert_eq!(limiter.key_count(), 2);
    }

    #[test]
    fn test_concrete_scenario() {
        let clock = ManualClock::new(0);
        let limiter = SerialLimiter::with_clock(clock.clone());

        let verdicts = replay(
            &limiter,
            &clock,
            &[
                (0, "login", "client"),
                (100, "login", "client"),
                (200, "login", "client"),
                (1050, "login", "client"),
                (1200, "login", "client"),
            ],
        );
        assert_eq!(verdicts, vec![false, false, true, false, false]);
    }

    #[test]
    fn test_matches_sharded_limiter() {
        let calls = [
            (0, "login", "alice"),
            (10, "login", "alice"),
            (20, "login", "alice"),
            (30, "signup", "alice"),
            (40, "login", "bob"),
            (999, "login", "alice"),
            (1000, "login", "alice"),
            (1005, "login", "alice"),
            (1011, "login", "alice"),
            (2500, "signup", "alice"),
        ];

        let serial_clock = ManualClock::new(0);
        let serial = SerialLimiter::with_clock(serial_clock.clone());
        let sharded_clock = ManualClock::new(0);
        let sharded = AdmissionLimiter::with_clock(sharded_clock.clone());

        assert_eq!(
            replay(&serial, &serial_clock, &calls),
            replay(&sharded, &sharded_clock, &calls)
        );
    }

    #[test]
    fn test_evict_idle_drops_expired_keys() {
        let clock = ManualClock::new(0);
        let config = LimiterConfig {
            eviction: KeyEviction::EvictIdle,
            sweep_interval: 1,
            ..LimiterConfig::default()
        };
        let limiter = SerialLimiter::with_config(&config, clock.clone());

        limiter.check_and_record("a", &policy(1, 1000));
        limiter.check_and_record("b", &policy(1, 1000));
        assert_eq!(limiter.key_count(), 2);

        clock.set(5000);
        limiter.check_and_record("c", &policy(1, 1000));
        assert_eq!(limiter.key_count(), 1);
    }

    #[test]
    fn test_check_spec_through_trait() {
        let limiter = SerialLimiter::with_clock(ManualClock::new(0));
        let spec = PolicySpec::new().with_limit(0);

        assert!(limiter.check_spec("client", &spec).unwrap());
        assert_eq!(limiter.key_count(), 1);

        limiter.clear();
        assert_eq!(limiter.key_count(), 0);
    }
}
