//! Admission trait for abstracting over limiter implementations.

use crate::error::Result;

use super::policy::{LimitPolicy, PolicySpec};
use super::window::Decision;

/// Trait for admission limiter implementations.
///
/// This trait abstracts over the sharded `AdmissionLimiter` and the
/// single-lock `SerialLimiter` so request-handling code can work with either.
pub trait Admission: Send + Sync {
    /// Check a request against `policy`, recording it if admitted.
    fn check(&self, identifier: &str, policy: &LimitPolicy) -> Decision;

    /// Number of keys currently tracked.
    fn key_count(&self) -> usize;

    /// Check a request and return whether it should be rejected.
    fn check_and_record(&self, identifier: &str, policy: &LimitPolicy) -> bool {
        self.check(identifier, policy).is_limited()
    }

    /// Resolve and validate a partial policy, then check the request.
    fn check_spec(&self, identifier: &str, spec: &PolicySpec) -> Result<bool> {
        let policy = spec.resolve()?;
        Ok(self.check_and_record(identifier, &policy))
    }
}
