//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{AdmissionLimiter, Clock, MonotonicClock, PolicyTable, SystemClock};

/// Prefix for environment variable overrides, e.g. `TURNSTILE__LIMITER__EVICTION`.
pub const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for Turnstile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TurnstileConfig {
    /// Limiter behavior
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Named bucket policies
    #[serde(default)]
    pub policies: PolicyTable,
}

/// What happens to keys whose window log has emptied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyEviction {
    /// Keep every key ever seen for the life of the limiter
    #[default]
    Retain,
    /// Drop keys once all of their admissions have expired
    EvictIdle,
}

/// Which clock a configured limiter reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockKind {
    /// Monotonic milliseconds since the limiter was built
    #[default]
    Monotonic,
    /// Wall clock milliseconds since the Unix epoch
    System,
}

impl ClockKind {
    /// Instantiate the clock.
    pub fn build(&self) -> Arc<dyn Clock> {
        match self {
            ClockKind::Monotonic => Arc::new(MonotonicClock::new()),
            ClockKind::System => Arc::new(SystemClock),
        }
    }
}

/// Limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Idle key handling
    #[serde(default)]
    pub eviction: KeyEviction,

    /// Checks between idle-key sweeps when eviction is enabled, 0 disables
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: u64,

    /// Clock source
    #[serde(default)]
    pub clock: ClockKind,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            eviction: KeyEviction::default(),
            sweep_interval: default_sweep_interval(),
            clock: ClockKind::default(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    1024
}

/// The part of the configuration environment variables may override.
#[derive(Debug, Serialize, Deserialize)]
struct LimiterSection {
    #[serde(default)]
    limiter: LimiterConfig,
}

impl TurnstileConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig =
            serde_yaml::from_str(yaml).map_err(|e| TurnstileError::Config(e.to_string()))?;
        config.policies.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional YAML file, then apply
    /// `TURNSTILE__LIMITER__*` environment overrides to the limiter section.
    ///
    /// The file is parsed with the same rules as `from_yaml`, so bucket
    /// names keep their case. Policies are never taken from the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        let seed = LimiterSection {
            limiter: config.limiter.clone(),
        };
        let section: LimiterSection = config::Config::builder()
            .add_source(config::Config::try_from(&seed)?)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.limiter = section.limiter;
        Ok(config)
    }

    /// Build a limiter from this configuration.
    pub fn build_limiter(&self) -> AdmissionLimiter<Arc<dyn Clock>> {
        AdmissionLimiter::with_config(&self.limiter, self.limiter.clock.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = TurnstileConfig::default();
        assert_eq!(config.limiter.eviction, KeyEviction::Retain);
        assert_eq!(config.limiter.sweep_interval, 1024);
        assert_eq!(config.limiter.clock, ClockKind::Monotonic);
        assert!(config.policies.buckets.is_empty());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
limiter:
  eviction: evict_idle
  sweep_interval: 64
  clock: system
policies:
  default:
    limit: 5
    window_ms: 60000
  buckets:
    login:
      limit: 3
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.limiter.eviction, KeyEviction::EvictIdle);
        assert_eq!(config.limiter.sweep_interval, 64);
        assert_eq!(config.limiter.clock, ClockKind::System);
        assert_eq!(config.policies.policy_for("login").unwrap().limit(), 3);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = TurnstileConfig::from_yaml("limiter:\n  eviction: evict_idle\n").unwrap();
        assert_eq!(config.limiter.sweep_interval, 1024);
        assert_eq!(config.limiter.clock, ClockKind::Monotonic);
    }

    #[test]
    fn test_invalid_policy_fails_load() {
        let yaml = r#"
policies:
  buckets:
    login:
      window_ms: -1
"#;
        assert!(TurnstileConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_unknown_eviction_rejected() {
        assert!(TurnstileConfig::from_yaml("limiter:\n  eviction: sometimes\n").is_err());
    }

    fn write_temp_config(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "turnstile-{}-{}.yaml",
            name,
            std::process::id()
        ));
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "{}", contents).unwrap();
        path
    }

    #[test]
    fn test_load_from_file() {
        let path = write_temp_config(
            "load",
            "limiter:\n  sweep_interval: 8\npolicies:\n  buckets:\n    login:\n      limit: 2\n",
        );

        let config = TurnstileConfig::load(path.to_str()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.limiter.sweep_interval, 8);
        assert_eq!(config.policies.policy_for("login").unwrap().limit(), 2);
    }

    #[test]
    fn test_load_keeps_bucket_case_and_camel_case_window() {
        let yaml = r#"
policies:
  buckets:
    Login:
      limit: 2
      windowMs: 1000
"#;
        let path = write_temp_config("mixed-case", yaml);

        let loaded = TurnstileConfig::load(path.to_str()).unwrap();
        let parsed = TurnstileConfig::from_file(path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.policies.bucket_names(), vec!["Login"]);
        assert_eq!(loaded.policies, parsed.policies);

        let policy = loaded.policies.policy_for("Login").unwrap();
        assert_eq!(policy.limit(), 2);
        assert_eq!(policy.window_ms(), 1000);
        assert_eq!(policy.bucket(), "Login");
    }

    #[test]
    fn test_from_file() {
        let path = write_temp_config("from-file", "limiter:\n  clock: system\n");

        let config = TurnstileConfig::from_file(path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.limiter.clock, ClockKind::System);
    }

    #[test]
    fn test_from_file_missing() {
        let err = TurnstileConfig::from_file("/nonexistent/turnstile.yaml").unwrap_err();
        assert!(matches!(err, TurnstileError::Io(_)));
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(TurnstileConfig::load(Some("/nonexistent/turnstile.yaml")).is_err());
    }

    #[test]
    fn test_env_overrides_limiter_section() {
        std::env::set_var("TURNSTILE__LIMITER__EVICTION", "evict_idle");
        let config = TurnstileConfig::load(None);
        std::env::remove_var("TURNSTILE__LIMITER__EVICTION");

        let config = config.unwrap();
        assert_eq!(config.limiter.eviction, KeyEviction::EvictIdle);
        assert!(config.policies.buckets.is_empty());
    }

    #[test]
    fn test_misspelled_policy_field_rejected() {
        let yaml = r#"
policies:
  buckets:
    login:
      limt: 2
"#;
        assert!(matches!(
            TurnstileConfig::from_yaml(yaml),
            Err(TurnstileError::Config(_))
        ));
    }

    #[test]
    fn test_build_limiter() {
        let config = TurnstileConfig::default();
        let limiter = config.build_limiter();
        let policy = config.policies.policy_for("login").unwrap();

        for _ in 0..5 {
            assert!(!limiter.check_and_record("client", &policy));
        }
        assert!(limiter.check_and_record("client", &policy));
    }
}
