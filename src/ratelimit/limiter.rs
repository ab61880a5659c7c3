//! Core admission limiter implementation.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, trace};

use crate::config::{KeyEviction, LimiterConfig};
use crate::error::Result;

use super::backend::Admission;
use super::clock::{Clock, MonotonicClock};
use super::key::RateLimitKey;
use super::policy::{LimitPolicy, PolicySpec};
use super::window::{Decision, WindowLog};

/// The core admission limiter that manages per-key window logs.
///
/// Logs live in a sharded concurrent map. A check holds the write lock of
/// its key's shard for the whole prune-compare-append sequence, so racing
/// checks on one key cannot both take the last slot, while checks on keys
/// in other shards proceed in parallel.
///
/// This struct is thread-safe and can be shared across threads or tasks
/// through an `Arc`.
pub struct AdmissionLimiter<C: Clock = MonotonicClock> {
    /// Window logs indexed by (bucket, identifier)
    logs: DashMap<RateLimitKey, WindowLog>,
    /// Source of "now"
    clock: C,
    /// What happens to keys whose log has emptied
    eviction: KeyEviction,
    /// Checks between automatic idle-key sweeps
    sweep_interval: u64,
    /// Checks performed so far, drives the sweep schedule
    checks: AtomicU64,
}

impl AdmissionLimiter {
    /// Create a limiter on a monotonic clock with default settings.
    pub fn new() -> Self {
        Self::with_clock(MonotonicClock::new())
    }
}

impl Default for AdmissionLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> AdmissionLimiter<C> {
    /// Create a limiter reading time from `clock`.
    pub fn with_clock(clock: C) -> Self {
        Self::with_config(&LimiterConfig::default(), clock)
    }

    /// Create a limiter from configuration, reading time from `clock`.
    pub fn with_config(config: &LimiterConfig, clock: C) -> Self {
        info!(
            eviction = ?config.eviction,
            sweep_interval = config.sweep_interval,
            "Admission limiter initialized"
        );
        Self {
            logs: DashMap::new(),
            clock,
            eviction: config.eviction,
            sweep_interval: config.sweep_interval,
            checks: AtomicU64::new(0),
        }
    }

    /// Check a request from `identifier` against `policy`.
    ///
    /// The request is recorded only when it is admitted.
    pub fn check(&self, identifier: &str, policy: &LimitPolicy) -> Decision {
        let key = RateLimitKey::new(policy.bucket(), identifier);

        trace!(
            bucket = policy.bucket(),
            identifier = identifier,
            limit = policy.limit(),
            window_ms = policy.window_ms(),
            "Checking admission"
        );

        // Read the clock under the shard lock so stamps are appended in the
        // order they were taken.
        let entry = self.logs.entry(key);
        let now = self.clock.now_ms();

        let decision = match entry {
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
                    debug!(
                        bucket = policy.bucket(),
                        identifier = identifier,
                        "Tracking new rate limit key"
                    );
                    entry.insert(log);
                }
                decision
            }
        };

        if decision.is_limited() {
            debug!(
                bucket = policy.bucket(),
                identifier = identifier,
                limit = policy.limit(),
                retry_after_ms = ?decision.retry_after_ms,
                "Rate limit exceeded"
            );
        }

        self.maybe_sweep();
        decision
    }

    /// Check a request and return whether it should be rejected.
    pub fn check_and_record(&self, identifier: &str, policy: &LimitPolicy) -> bool {
        self.check(identifier, policy).is_limited()
    }

    /// Resolve and validate a partial policy, then check the request.
    pub fn check_spec(&self, identifier: &str, spec: &PolicySpec) -> Result<bool> {
        let policy = spec.resolve()?;
        Ok(self.check_and_record(identifier, &policy))
    }

    /// Admissions for `identifier` currently inside `policy`'s window.
    ///
    /// Nothing is pruned or recorded.
    pub fn active_count(&self, identifier: &str, policy: &LimitPolicy) -> usize {
        let key = RateLimitKey::new(policy.bucket(), identifier);
        let now = self.clock.now_ms();
        self.logs
            .get(&key)
            .map(|log| log.active_at(now, policy.window_ms()))
            .unwrap_or(0)
    }

    /// Drop every key whose log has fully expired under its last window.
    ///
    /// Returns the number of keys removed.
    pub fn purge_idle(&self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;
        self.logs.retain(|_, log| {
            let idle = log.is_idle(now);
            if idle {
                removed += 1;
            }
            !idle
        });

        if removed > 0 {
            info!(removed = removed, remaining = self.logs.len(), "Purged idle keys");
        }
        removed
    }

    /// Clear all window logs.
    pub fn clear(&self) {
        self.logs.clear();
    }

    /// Get the number of tracked keys.
    pub fn key_count(&self) -> usize {
        self.logs.len()
    }

    /// The clock this limiter reads.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Run a sweep every `sweep_interval` checks when idle eviction is on.
    ///
    /// Must not be called while holding an entry guard.
    fn maybe_sweep(&self) {
        if self.eviction != KeyEviction::EvictIdle || self.sweep_interval == 0 {
            return;
        }
        let checks = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        if checks % self.sweep_interval == 0 {
            self.purge_idle();
        }
    }
}

impl<C: Clock> Admission for AdmissionLimiter<C> {
    fn check(&self, identifier: &str, policy: &LimitPolicy) -> Decision {
        AdmissionLimiter::check(self, identifier, policy)
    }

    fn key_count(&self) -> usize {
        AdmissionLimiter::key_count(self)
    }
}
