// Engine configuration
//
// Resource bounds for one analysis run. All limits default to the same value
// so a truncated or malformed trace can grow no structure past it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default bound for stack depth, pending operations and in-flight dispatches
pub const DEFAULT_RESOURCE_LIMIT: usize = 100_000;

/// Errors loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration for an [`AnalysisEngine`](crate::engine::AnalysisEngine)
///
/// # Example
/// ```
/// use tracefold::config::EngineConfig;
///
/// let config = EngineConfig::default();
/// assert_eq!(config.max_stack_depth, 100_000);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deepest stack a context may reach before it is halted
    pub max_stack_depth: usize,

    /// Hard cap on live pending operations (point-to-point and collective)
    ///
    /// The oldest entry is evicted, with a diagnostic, when the cap is hit.
    pub max_pending_operations: usize,

    /// Hard cap on launched-but-not-executed dispatches
    pub max_dispatches_in_flight: usize,

    /// Pop the stack even when a Leave names a different symbol
    ///
    /// When false the mismatching Leave is ignored and the stack is untouched.
    pub close_on_leave_mismatch: bool,

    /// Record the zero-length root → root edge of a collective
    pub emit_self_edges: bool,

    /// How many diagnostics are kept verbatim (all are counted)
    pub max_diagnostics: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_stack_depth: DEFAULT_RESOURCE_LIMIT,
            max_pending_operations: DEFAULT_RESOURCE_LIMIT,
            max_dispatches_in_flight: DEFAULT_RESOURCE_LIMIT,
            close_on_leave_mismatch: true,
            emit_self_edges: true,
            max_diagnostics: 10_000,
        }
    }
}

impl EngineConfig {
    /// Same limit for stack depth, pending operations and dispatches
    pub fn bounded(limit: usize) -> Self {
        Self {
            max_stack_depth: limit,
            max_pending_operations: limit,
            max_dispatches_in_flight: limit,
            ..Self::default()
        }
    }

    /// Strict matching: mismatching leaves do not pop, no self edges
    pub fn strict() -> Self {
        Self {
            close_on_leave_mismatch: false,
            emit_self_edges: false,
            ..Self::default()
        }
    }

    /// Load from a TOML file; missing keys take their defaults
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let limits = [
            ("max_stack_depth", self.max_stack_depth),
            ("max_pending_operations", self.max_pending_operations),
            ("max_dispatches_in_flight", self.max_dispatches_in_flight),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be > 0", name)));
            }
        }
        Ok(())
    }
}
