//! Sliding window log implementation.

use std::collections::VecDeque;

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request was rejected
    pub limited: bool,
    /// The limit the request was checked against
    pub limit: u64,
    /// Admissions still available in the window after this check
    pub remaining: u64,
    /// For rejections, milliseconds until a slot frees up.
    ///
    /// `None` for admissions, and for a limit of zero where no slot ever frees.
    pub retry_after_ms: Option<u64>,
}

impl Decision {
    /// Whether the request should be rejected by the caller.
    pub fn is_limited(&self) -> bool {
        self.limited
    }

    /// Whether the request was admitted and recorded.
    pub fn is_admitted(&self) -> bool {
        !self.limited
    }
}

/// Timestamps of recently admitted requests for a single key.
///
/// Timestamps are milliseconds from the limiter's clock and are kept in
/// insertion order, which is also chronological order.
#[derive(Debug, Clone, Default)]
pub struct WindowLog {
    /// Admission timestamps, oldest first
    stamps: VecDeque<u64>,
    /// Window length used by the most recent check
    window_ms: u64,
}

impl WindowLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of timestamps currently held.
    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    /// Whether the log holds no timestamps.
    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    /// The oldest logged admission.
    pub fn oldest(&self) -> Option<u64> {
        self.stamps.front().copied()
    }

    /// The newest logged admission.
    pub fn newest(&self) -> Option<u64> {
        self.stamps.back().copied()
    }

    /// Window length of the most recent check, zero if never checked.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Clamp a clock reading so it never precedes the newest timestamp.
    ///
    /// Keeps the log non-decreasing when a wall clock steps backwards.
    pub fn effective_now(&self, now_ms: u64) -> u64 {
        match self.newest() {
            Some(newest) if newest > now_ms => newest,
            _ => now_ms,
        }
    }

    /// Drop every timestamp whose age is at least `window_ms`.
    ///
    /// The window is half-open: `(now - window_ms, now]`.
    pub fn prune(&mut self, now_ms: u64, window_ms: u64) {
        self.window_ms = window_ms;
        while let Some(&oldest) = self.stamps.front() {
            if now_ms.saturating_sub(oldest) >= window_ms {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Prune, then admit and record `now_ms` if fewer than `limit` remain.
    ///
    /// A rejected check leaves the pruned log exactly as it is.
    pub fn check(&mut self, now_ms: u64, limit: u64, window_ms: u64) -> Decision {
        let now_ms = self.effective_now(now_ms);
        self.prune(now_ms, window_ms);

        let active = self.stamps.len() as u64;
        if active >= limit {
            return Decision {
                limited: true,
                limit,
                remaining: 0,
                retry_after_ms: self.retry_after(now_ms, limit, window_ms),
            };
        }

        self.stamps.push_back(now_ms);
        Decision {
            limited: false,
            limit,
            remaining: limit - active - 1,
            retry_after_ms: None,
        }
    }

    /// Count the admissions inside the window at `now_ms` without mutating.
    pub fn active_at(&self, now_ms: u64, window_ms: u64) -> usize {
        let now_ms = self.effective_now(now_ms);
        self.stamps
            .iter()
            .filter(|&&t| now_ms.saturating_sub(t) < window_ms)
            .count()
    }

    /// Whether every timestamp has expired under the last checked window.
    pub fn is_idle(&self, now_ms: u64) -> bool {
        match self.newest() {
            Some(newest) => now_ms.saturating_sub(newest) >= self.window_ms,
            None => true,
        }
    }

    /// Milliseconds until the log drops below `limit` entries.
    ///
    /// Expects an already pruned log holding at least `limit` entries.
    fn retry_after(&self, now_ms: u64, limit: u64, window_ms: u64) -> Option<u64> {
        if limit == 0 {
            return None;
        }
        // Expiring the stamp at this index brings the count to limit - 1.
        let index = self.stamps.len() - limit as usize;
        self.stamps
            .get(index)
            .map(|&t| t.saturating_add(window_ms).saturating_sub(now_ms))
    }
}
