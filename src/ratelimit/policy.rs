//! Per-call limit policies and their validation.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TurnstileError};

/// Admissions allowed per window when a policy leaves the limit unset.
pub const DEFAULT_LIMIT: u64 = 5;
/// Window length when a policy leaves it unset (one minute).
pub const DEFAULT_WINDOW_MS: u64 = 60_000;
/// Bucket used when a policy does not name one.
pub const DEFAULT_BUCKET: &str = "default";

/// A validated limit policy.
///
/// `limit` may be zero, which rejects every request for the bucket. The
/// window is always positive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitPolicy {
    limit: u64,
    window_ms: u64,
    bucket: String,
}

impl LimitPolicy {
    /// Create a policy for the default bucket.
    pub fn new(limit: u64, window_ms: u64) -> Result<Self> {
        if window_ms == 0 {
            return Err(TurnstileError::InvalidPolicy {
                field: "window_ms",
                value: 0,
                reason: "window must be positive",
            });
        }
        Ok(Self {
            limit,
            window_ms,
            bucket: DEFAULT_BUCKET.to_string(),
        })
    }

    /// Scope this policy to a named bucket.
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    /// Maximum admissions per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Window length in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// The bucket this policy applies to.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            window_ms: DEFAULT_WINDOW_MS,
            bucket: DEFAULT_BUCKET.to_string(),
        }
    }
}

/// A partially specified policy, as it arrives from callers or config files.
///
/// Missing fields take the defaults when resolved. Integer fields are signed
/// so that out-of-range input can be reported instead of wrapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySpec {
    /// Maximum admissions per window
    #[serde(default)]
    pub limit: Option<i64>,
    /// Window length in milliseconds
    #[serde(default, alias = "windowMs")]
    pub window_ms: Option<i64>,
    /// Bucket name
    #[serde(default)]
    pub bucket: Option<String>,
}

impl PolicySpec {
    /// An empty spec, resolving to the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_window_ms(mut self, window_ms: i64) -> Self {
        self.window_ms = Some(window_ms);
        self
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Fill fields left unset here from `fallback`.
    pub fn or(&self, fallback: &PolicySpec) -> PolicySpec {
        PolicySpec {
            limit: self.limit.or(fallback.limit),
            window_ms: self.window_ms.or(fallback.window_ms),
            bucket: self.bucket.clone().or_else(|| fallback.bucket.clone()),
        }
    }

    /// Apply defaults and validate.
    pub fn resolve(&self) -> Result<LimitPolicy> {
        let limit = match self.limit {
            None => DEFAULT_LIMIT,
            Some(limit) if limit < 0 => {
                return Err(TurnstileError::InvalidPolicy {
                    field: "limit",
                    value: limit,
                    reason: "limit must not be negative",
                })
            }
            Some(limit) => limit as u64,
        };

        let window_ms = match self.window_ms {
            None => DEFAULT_WINDOW_MS,
            Some(window_ms) if window_ms <= 0 => {
                return Err(TurnstileError::InvalidPolicy {
                    field: "window_ms",
                    value: window_ms,
                    reason: "window must be positive",
                })
            }
            Some(window_ms) => window_ms as u64,
        };

        let bucket = self.bucket.as_deref().unwrap_or(DEFAULT_BUCKET);
        Ok(LimitPolicy::new(limit, window_ms)?.with_bucket(bucket))
    }
}

impl From<&LimitPolicy> for PolicySpec {
    fn from(policy: &LimitPolicy) -> Self {
        Self {
            limit: Some(policy.limit.min(i64::MAX as u64) as i64),
            window_ms: Some(policy.window_ms.min(i64::MAX as u64) as i64),
            bucket: Some(policy.bucket.clone()),
        }
    }
}
