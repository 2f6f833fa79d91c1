//! Engine configuration.
//!
//! An [`EngineConfig`] is built once (from defaults or a TOML file),
//! validated, and handed to [`crate::Engine::new`]. Nothing in the engine
//! reads configuration from anywhere else.

use evalbox_eval::{AllowList, Limits, UnknownBuiltin};
use evalbox_types::Language;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const MIN_MEMORY_BYTES: usize = 64 * 1024;
const MIN_STACK_BYTES: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error(transparent)]
    UnknownBuiltin(#[from] UnknownBuiltin),
}

fn default_timeout_secs() -> u64 {
    5
}

fn max_timeout_secs() -> u64 {
    60
}

fn memory_limit_bytes() -> usize {
    50 * 1024 * 1024
}

fn recursion_limit() -> usize {
    1000
}

fn max_parallel_tests() -> usize {
    4
}

fn worker_stack_bytes() -> usize {
    256 * 1024 * 1024
}

fn languages() -> Vec<Language> {
    vec![Language::Python]
}

fn allow_list() -> Vec<String> {
    AllowList::standard()
        .names()
        .into_iter()
        .map(str::to_owned)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Per-test deadline used when a request does not name one.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Upper clamp for a request's own timeout.
    #[serde(default = "max_timeout_secs")]
    pub max_timeout_secs: u64,
    #[serde(default = "memory_limit_bytes")]
    pub memory_limit_bytes: usize,
    #[serde(default = "recursion_limit")]
    pub recursion_limit: usize,
    /// Instruction budget per test case; unlimited when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u64>,
    /// Test cases of one batch evaluated at the same time.
    #[serde(default = "max_parallel_tests")]
    pub max_parallel_tests: usize,
    #[serde(default = "worker_stack_bytes")]
    pub worker_stack_bytes: usize,
    #[serde(default = "languages")]
    pub languages: Vec<Language>,
    /// Builtin functions and exception classes reachable from submissions.
    #[serde(default = "allow_list")]
    pub allow_list: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            max_timeout_secs: max_timeout_secs(),
            memory_limit_bytes: memory_limit_bytes(),
            recursion_limit: recursion_limit(),
            max_steps: None,
            max_parallel_tests: max_parallel_tests(),
            worker_stack_bytes: worker_stack_bytes(),
            languages: languages(),
            allow_list: allow_list(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.max_timeout_secs == 0 {
            return invalid("max_timeout_secs must be at least 1".into());
        }
        if !(1..=self.max_timeout_secs).contains(&self.default_timeout_secs) {
            return invalid(format!(
                "default_timeout_secs must be between 1 and max_timeout_secs ({})",
                self.max_timeout_secs
            ));
        }
        if self.memory_limit_bytes < MIN_MEMORY_BYTES {
            return invalid(format!("memory_limit_bytes must be at least {MIN_MEMORY_BYTES}"));
        }
        if self.recursion_limit == 0 {
            return invalid("recursion_limit must be at least 1".into());
        }
        if self.max_steps == Some(0) {
            return invalid("max_steps must be at least 1 when set".into());
        }
        if self.max_parallel_tests == 0 {
            return invalid("max_parallel_tests must be at least 1".into());
        }
        if self.worker_stack_bytes < MIN_STACK_BYTES {
            return invalid(format!("worker_stack_bytes must be at least {MIN_STACK_BYTES}"));
        }
        if self.languages.is_empty() {
            return invalid("at least one language must be enabled".into());
        }
        self.resolve_allow_list()?;
        Ok(())
    }

    pub fn resolve_allow_list(&self) -> Result<AllowList, ConfigError> {
        Ok(AllowList::from_names(&self.allow_list)?)
    }

    /// The request's timeout clamped to `[1, max_timeout_secs]`.
    pub fn effective_timeout(&self, requested: Option<u64>) -> Duration {
        let secs = requested
            .unwrap_or(self.default_timeout_secs)
            .clamp(1, self.max_timeout_secs.max(1));
        Duration::from_secs(secs)
    }

    pub fn limits(&self, requested_timeout: Option<u64>) -> Limits {
        Limits {
            timeout: self.effective_timeout(requested_timeout),
            memory_bytes: self.memory_limit_bytes,
            recursion_limit: self.recursion_limit,
            max_steps: self.max_steps,
            stack_bytes: self.worker_stack_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.default_timeout_secs, 5);
        assert_eq!(config.memory_limit_bytes, 50 * 1024 * 1024);
        assert!(config.allow_list.iter().any(|n| n == "sorted"));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = EngineConfig::from_toml_str("max_parallel_tests = 2\nmax_steps = 1000\n").unwrap();
        assert_eq!(config.max_parallel_tests, 2);
        assert_eq!(config.max_steps, Some(1000));
        assert_eq!(config.recursion_limit, 1000);
        assert_eq!(config.languages, vec![Language::Python]);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert_matches!(
            EngineConfig::from_toml_str("timeout = 3\n"),
            Err(ConfigError::Parse(_))
        );
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        assert_matches!(
            EngineConfig::from_toml_str("default_timeout_secs = 90\n"),
            Err(ConfigError::Invalid(_))
        );
        assert_matches!(
            EngineConfig::from_toml_str("max_parallel_tests = 0\n"),
            Err(ConfigError::Invalid(_))
        );
        assert_matches!(
            EngineConfig::from_toml_str("allow_list = [\"len\", \"open\"]\n"),
            Err(ConfigError::UnknownBuiltin(_))
        );
    }

    #[test]
    fn test_timeout_is_clamped() {
        let config = EngineConfig::default();
        assert_eq!(config.effective_timeout(None), Duration::from_secs(5));
        assert_eq!(config.effective_timeout(Some(0)), Duration::from_secs(1));
        assert_eq!(config.effective_timeout(Some(600)), Duration::from_secs(60));
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = EngineConfig {
            max_steps: Some(5),
            ..EngineConfig::default()
        };
        let text = config.to_toml_string().unwrap();
        assert_eq!(EngineConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert_matches!(EngineConfig::load(&missing), Err(ConfigError::Io { .. }));

        let present = dir.path().join("evalbox.toml");
        std::fs::write(&present, "recursion_limit = 50\n").unwrap();
        assert_eq!(EngineConfig::load(&present).unwrap().recursion_limit, 50);
    }
}
