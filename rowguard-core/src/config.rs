//! Configuration.
//!
//! The dialect is chosen once, at startup, and never changes afterwards.
//! Configuration can come from a TOML document, from environment variables,
//! or both (environment values override the file).
//!
//! ```toml
//! dialect = "mssql"          # postgres (default) | mssql, case-insensitive
//! tenant_format = "integer"  # integer (default) | uuid | text
//!
//! [postgres]
//! setting = "app.tenant_id"
//!
//! [mssql]
//! session_key = "TenantId"
//! ```
//!
//! | variable                 | field                 |
//! |--------------------------|-----------------------|
//! | `ROWGUARD_DIALECT`       | `dialect`             |
//! | `ROWGUARD_TENANT_FORMAT` | `tenant_format`       |
//! | `ROWGUARD_PG_SETTING`    | `postgres.setting`    |
//! | `ROWGUARD_MSSQL_KEY`     | `mssql.session_key`   |

use std::collections::HashMap;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info};

use crate::dialect::{DEFAULT_MSSQL_KEY, DEFAULT_PG_SETTING, Dialect, DialectKind, DialectSettings};
use crate::error::{RowGuardError, RowGuardResult};
use crate::tenant::TenantIdFormat;

/// Selects the dialect.
pub const ENV_DIALECT: &str = "ROWGUARD_DIALECT";
/// Selects the tenant identifier format.
pub const ENV_TENANT_FORMAT: &str = "ROWGUARD_TENANT_FORMAT";
/// Overrides the PostgreSQL setting name.
pub const ENV_PG_SETTING: &str = "ROWGUARD_PG_SETTING";
/// Overrides the SQL Server session-context key.
pub const ENV_MSSQL_KEY: &str = "ROWGUARD_MSSQL_KEY";

/// Source for environment variables.
pub trait EnvSource: Send + Sync {
    /// Get a variable's value.
    fn get(&self, name: &str) -> Option<String>;

    /// Check if a variable exists.
    fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

/// Environment source backed by the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdEnvSource;

impl EnvSource for StdEnvSource {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Environment source backed by a map, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MapEnvSource {
    vars: HashMap<String, String>,
}

impl MapEnvSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl EnvSource for MapEnvSource {
    fn get(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RowGuardConfig {
    /// Database engine.
    #[serde(deserialize_with = "from_str_value")]
    pub dialect: DialectKind,
    /// Shape of tenant identifiers.
    #[serde(deserialize_with = "from_str_value")]
    pub tenant_format: TenantIdFormat,
    /// PostgreSQL options.
    pub postgres: PostgresSection,
    /// SQL Server options.
    pub mssql: MssqlSection,
}

/// `[postgres]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PostgresSection {
    /// Custom configuration parameter carrying the tenant.
    pub setting: String,
}

impl Default for PostgresSection {
    fn default() -> Self {
        Self {
            setting: DEFAULT_PG_SETTING.to_string(),
        }
    }
}

/// `[mssql]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MssqlSection {
    /// Session-context key carrying the tenant.
    pub session_key: String,
}

impl Default for MssqlSection {
    fn default() -> Self {
        Self {
            session_key: DEFAULT_MSSQL_KEY.to_string(),
        }
    }
}

impl RowGuardConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(input: &str) -> RowGuardResult<Self> {
        toml::from_str(input).map_err(|e| RowGuardError::config(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> RowGuardResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RowGuardError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Loaded configuration file");
        Self::from_toml_str(&content)
    }

    /// Build a configuration from the process environment.
    pub fn from_env() -> RowGuardResult<Self> {
        Self::default().with_env(&StdEnvSource)
    }

    /// Override fields with whatever `env` defines.
    pub fn with_env(mut self, env: &impl EnvSource) -> RowGuardResult<Self> {
        if let Some(value) = env.get(ENV_DIALECT) {
            self.dialect = value.parse()?;
        }
        if let Some(value) = env.get(ENV_TENANT_FORMAT) {
            self.tenant_format = value.parse()?;
        }
        if let Some(value) = env.get(ENV_PG_SETTING) {
            self.postgres.setting = value;
        }
        if let Some(value) = env.get(ENV_MSSQL_KEY) {
            self.mssql.session_key = value;
        }
        Ok(self)
    }

    /// Names and format handed to the dialect.
    pub fn dialect_settings(&self) -> DialectSettings {
        DialectSettings {
            pg_setting: self.postgres.setting.clone(),
            mssql_key: self.mssql.session_key.clone(),
            tenant_format: self.tenant_format,
        }
    }

    /// Validate the configuration and build the dialect.
    pub fn build_dialect(&self) -> RowGuardResult<Arc<dyn Dialect>> {
        let dialect = self.dialect.build(&self.dialect_settings())?;
        info!(
            dialect = %self.dialect,
            tenant_format = ?self.tenant_format,
            "Dialect configured"
        );
        Ok(dialect)
    }
}

/// Deserialize through `FromStr`, so enum values are case-insensitive.
fn from_str_value<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}
