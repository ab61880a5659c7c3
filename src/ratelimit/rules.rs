//! Named bucket policies loaded from configuration.
//!
//! A policy table maps bucket names ("login", "newsletter-signup", ...) to
//! partial policies, with a table-wide default that fills any field a bucket
//! leaves unset.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use super::policy::{LimitPolicy, PolicySpec};
use crate::error::{Result, TurnstileError};

/// Bucket name to policy mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyTable {
    /// Fallback for fields a bucket does not set, and for unknown buckets
    #[serde(default)]
    pub default: PolicySpec,
    /// Per-bucket policies
    #[serde(default)]
    pub buckets: HashMap<String, PolicySpec>,
}

impl PolicyTable {
    /// Create an empty table. Every bucket resolves to the built-in defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a table from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading bucket policies");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load a table from a YAML string and validate every entry.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let table: PolicyTable = serde_yaml::from_str(yaml).map_err(|e| {
            TurnstileError::Config(format!("Failed to parse bucket policies: {}", e))
        })?;
        table.validate()?;
        Ok(table)
    }

    /// Set the policy for a bucket, replacing any previous one.
    pub fn insert(&mut self, bucket: impl Into<String>, spec: PolicySpec) {
        self.buckets.insert(bucket.into(), spec);
    }

    /// Resolve the effective policy for `bucket`.
    ///
    /// Fields come from the bucket's entry, then the table default, then the
    /// built-in defaults. The resolved policy is always scoped to `bucket`.
    pub fn policy_for(&self, bucket: &str) -> Result<LimitPolicy> {
        let spec = match self.buckets.get(bucket) {
            Some(spec) => spec.or(&self.default),
            None => self.default.clone(),
        };
        Ok(spec.resolve()?.with_bucket(bucket))
    }

    /// Resolve every configured bucket, failing on the first invalid one.
    pub fn validate(&self) -> Result<()> {
        self.default.resolve()?;
        for bucket in self.buckets.keys() {
            self.policy_for(bucket).map_err(|e| {
                TurnstileError::Config(format!("bucket '{}': {}", bucket, e))
            })?;
        }
        Ok(())
    }

    /// Names of the configured buckets, sorted.
    pub fn bucket_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.buckets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
