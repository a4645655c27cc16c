//! Compiler configuration.
//!
//! Loaded from TOML; every key has a default so an empty file is valid.
//!
//! ```toml
//! deployment = "cloud"
//!
//! [limits]
//! default_returned_rows = 100
//! max_select_returned_rows = 50000
//!
//! [execution]
//! max_execution_time = 60
//! increased_max_execution_time = 600
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, Result};

/// Where the compiler is running.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Deployment {
    /// Operator-run installation.
    #[default]
    SelfHosted,
    /// Managed cloud deployment.
    Cloud,
}

/// Row-count defaults and ceilings.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitConfig {
    /// Default page size for interactive queries.
    pub default_returned_rows: i64,
    /// Ceiling for interactive, async, export and saved queries.
    pub max_select_returned_rows: i64,
    /// Default and ceiling for cohort membership calculation.
    pub cohort_calculation_limit: i64,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            default_returned_rows: 100,
            max_select_returned_rows: 50_000,
            cohort_calculation_limit: 1_000_000_000,
        }
    }
}

/// Settings forwarded to the storage engine.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionConfig {
    /// Seconds allowed for interactive queries.
    pub max_execution_time: u64,
    /// Seconds allowed for long-running limit contexts.
    pub increased_max_execution_time: u64,
    /// Storage-engine readonly level applied to every statement.
    pub readonly: u8,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_execution_time: 60,
            increased_max_execution_time: 600,
            readonly: 2,
        }
    }
}

/// Top-level compiler configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerConfig {
    /// Where the compiler runs.
    pub deployment: Deployment,
    /// Row defaults and ceilings.
    pub limits: LimitConfig,
    /// Engine settings.
    pub execution: ExecutionConfig,
}

impl CompilerConfig {
    /// Parses configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|err| QueryError::Config {
            path: None,
            message: err.to_string(),
        })
    }

    /// Reads configuration from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|err| QueryError::Config {
            path: Some(path.to_path_buf()),
            message: err.to_string(),
        })?;
        toml::from_str(&contents).map_err(|err| QueryError::Config {
            path: Some(path.to_path_buf()),
            message: err.to_string(),
        })
    }

    /// True for the managed cloud deployment.
    pub fn is_cloud(&self) -> bool {
        self.deployment == Deployment::Cloud
    }
}
