//! Database dialects for binding a tenant to a session.
//!
//! A dialect renders the two statements the connection guard runs around each
//! borrow of a physical connection. Rendering is pure: no I/O and no state
//! beyond what was validated at construction.
//!
//! | dialect    | bind                                                                | unbind                                                              |
//! |------------|---------------------------------------------------------------------|---------------------------------------------------------------------|
//! | PostgreSQL | `SET app.tenant_id = '7'`                                           | `RESET app.tenant_id`                                               |
//! | SQL Server | `EXEC sys.sp_set_session_context @key = N'TenantId', @value = 7`   | `EXEC sys.sp_set_session_context @key = N'TenantId', @value = -1`  |
//!
//! SQL Server has no way to unset a session-context key, so unbinding writes a
//! sentinel no tenant can own.
//!
//! ```rust
//! use rowguard_core::{Dialect, PostgresDialect, TenantId};
//!
//! let dialect = PostgresDialect::default();
//! let sql = dialect.bind_statement(&TenantId::from(7_i64)).unwrap();
//! assert_eq!(sql, "SET app.tenant_id = '7'");
//! assert_eq!(dialect.unbind_statement(), "RESET app.tenant_id");
//!
//! // Anything that is not a valid literal for the configured format is refused.
//! assert!(dialect.bind_statement(&"7' OR '1'='1".parse().unwrap()).is_err());
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::{RowGuardError, RowGuardResult};
use crate::tenant::{TenantId, TenantIdFormat};

/// Default PostgreSQL setting carrying the tenant.
pub const DEFAULT_PG_SETTING: &str = "app.tenant_id";

/// Default SQL Server session-context key carrying the tenant.
pub const DEFAULT_MSSQL_KEY: &str = "TenantId";

/// Value written to the SQL Server session context on unbind.
pub const MSSQL_UNBOUND_SENTINEL: i64 = -1;

/// Renders the statements that attach and detach a tenant from a session.
///
/// Implement this to support another database engine.
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Statement that binds `tenant` to the session.
    ///
    /// Must fail with [`RowGuardError::InvalidTenant`] instead of producing a
    /// statement for an identifier that is not a safe literal.
    fn bind_statement(&self, tenant: &TenantId) -> RowGuardResult<String>;

    /// Statement that removes any tenant from the session.
    ///
    /// Must be safe to run on a session that was never bound.
    fn unbind_statement(&self) -> String;
}

/// PostgreSQL dialect using a custom configuration parameter.
///
/// The policy side reads the value with `current_setting('app.tenant_id', true)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresDialect {
    setting: SmolStr,
    format: TenantIdFormat,
}

impl PostgresDialect {
    /// Create a dialect writing to `setting`, which must be a custom
    /// parameter of the form `prefix.name`.
    pub fn new(setting: impl AsRef<str>, format: TenantIdFormat) -> RowGuardResult<Self> {
        let setting = setting.as_ref();
        let valid = setting
            .split_once('.')
            .is_some_and(|(prefix, name)| is_identifier(prefix) && is_identifier(name));
        if !valid {
            return Err(RowGuardError::config(format!(
                "invalid PostgreSQL setting name '{}': expected 'prefix.name'",
                setting
            )));
        }
        Ok(Self {
            setting: SmolStr::new(setting),
            format,
        })
    }

    /// The configuration parameter carrying the tenant.
    pub fn setting(&self) -> &str {
        &self.setting
    }
}

impl Default for PostgresDialect {
    fn default() -> Self {
        Self {
            setting: SmolStr::new_static(DEFAULT_PG_SETTING),
            format: TenantIdFormat::Integer,
        }
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn bind_statement(&self, tenant: &TenantId) -> RowGuardResult<String> {
        let literal = self.format.validate(tenant)?;
        Ok(format!("SET {} = '{}'", self.setting, literal))
    }

    fn unbind_statement(&self) -> String {
        format!("RESET {}", self.setting)
    }
}

/// SQL Server dialect using `sp_set_session_context`.
///
/// The policy side reads the value with `SESSION_CONTEXT(N'TenantId')`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MssqlDialect {
    key: SmolStr,
    format: TenantIdFormat,
}

impl MssqlDialect {
    /// Create a dialect writing to session-context `key`.
    pub fn new(key: impl AsRef<str>, format: TenantIdFormat) -> RowGuardResult<Self> {
        let key = key.as_ref();
        if !is_identifier(key) || key.len() > 128 {
            return Err(RowGuardError::config(format!(
                "invalid SQL Server session context key '{}'",
                key
            )));
        }
        Ok(Self {
            key: SmolStr::new(key),
            format,
        })
    }

    /// The session-context key carrying the tenant.
    pub fn key(&self) -> &str {
        &self.key
    }

    fn set_statement(&self, value: &str) -> String {
        format!(
            "EXEC sys.sp_set_session_context @key = N'{}', @value = {}",
            self.key, value
        )
    }
}

impl Default for MssqlDialect {
    fn default() -> Self {
        Self {
            key: SmolStr::new_static(DEFAULT_MSSQL_KEY),
            format: TenantIdFormat::Integer,
        }
    }
}

impl Dialect for MssqlDialect {
    fn name(&self) -> &'static str {
        "mssql"
    }

    fn bind_statement(&self, tenant: &TenantId) -> RowGuardResult<String> {
        let literal = self.format.validate(tenant)?;
        if self.format.is_numeric() {
            Ok(self.set_statement(&literal))
        } else {
            Ok(self.set_statement(&format!("N'{}'", literal)))
        }
    }

    fn unbind_statement(&self) -> String {
        self.set_statement(&MSSQL_UNBOUND_SENTINEL.to_string())
    }
}

/// The database engine, chosen once at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    /// PostgreSQL.
    #[default]
    Postgres,
    /// Microsoft SQL Server.
    Mssql,
}

impl DialectKind {
    /// Build the dialect for this engine.
    pub fn build(&self, settings: &DialectSettings) -> RowGuardResult<Arc<dyn Dialect>> {
        let dialect: Arc<dyn Dialect> = match self {
            Self::Postgres => Arc::new(PostgresDialect::new(
                &settings.pg_setting,
                settings.tenant_format,
            )?),
            Self::Mssql => Arc::new(MssqlDialect::new(
                &settings.mssql_key,
                settings.tenant_format,
            )?),
        };
        Ok(dialect)
    }

    /// Get the canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Mssql => "mssql",
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DialectKind {
    type Err = RowGuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "mssql" | "sqlserver" | "sql_server" => Ok(Self::Mssql),
            other => Err(RowGuardError::config(format!(
                "unknown database type: {}",
                other
            ))),
        }
    }
}

/// Names and formats used when building a dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialectSettings {
    /// PostgreSQL setting name.
    pub pg_setting: String,
    /// SQL Server session-context key.
    pub mssql_key: String,
    /// Accepted tenant identifier format.
    pub tenant_format: TenantIdFormat,
}

impl Default for DialectSettings {
    fn default() -> Self {
        Self {
            pg_setting: DEFAULT_PG_SETTING.to_string(),
            mssql_key: DEFAULT_MSSQL_KEY.to_string(),
            tenant_format: TenantIdFormat::default(),
        }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut bytes = s.bytes();
    matches!(bytes.next(), Some(b) if b.is_ascii_alphabetic() || b == b'_')
        && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> TenantId {
        TenantId::new(s).unwrap()
    }

    #[test]
    fn test_postgres_statements() {
        let dialect = PostgresDialect::default();
        assert_eq!(dialect.bind_statement(&id("7")).unwrap(), "SET app.tenant_id = '7'");
        assert_eq!(dialect.bind_statement(&id("42")).unwrap(), "SET app.tenant_id = '42'");
        assert_eq!(dialect.unbind_statement(), "RESET app.tenant_id");
    }

    #[test]
    fn test_postgres_custom_setting() {
        let dialect = PostgresDialect::new("rls.current_org", TenantIdFormat::Text).unwrap();
        assert_eq!(
            dialect.bind_statement(&id("acme")).unwrap(),
            "SET rls.current_org = 'acme'"
        );
        assert_eq!(dialect.unbind_statement(), "RESET rls.current_org");
    }

    #[test]
    fn test_postgres_rejects_bad_setting() {
        assert!(PostgresDialect::new("tenant_id", TenantIdFormat::Integer).is_err());
        assert!(PostgresDialect::new("app.tenant; RESET ALL", TenantIdFormat::Integer).is_err());
        assert!(PostgresDialect::new("app.1tenant", TenantIdFormat::Integer).is_err());
    }

    #[test]
    fn test_postgres_rejects_injection() {
        let dialect = PostgresDialect::default();
        let err = dialect.bind_statement(&id("7'; RESET ALL; --")).unwrap_err();
        assert!(matches!(err, RowGuardError::InvalidTenant(_)));
    }

    #[test]
    fn test_mssql_statements() {
        let dialect = MssqlDialect::default();
        assert_eq!(
            dialect.bind_statement(&id("7")).unwrap(),
            "EXEC sys.sp_set_session_context @key = N'TenantId', @value = 7"
        );
        assert_eq!(
            dialect.unbind_statement(),
            "EXEC sys.sp_set_session_context @key = N'TenantId', @value = -1"
        );
    }

    #[test]
    fn test_mssql_unbind_is_never_empty() {
        // Unbind does not depend on any prior bind.
        let dialect = MssqlDialect::default();
        let first = dialect.unbind_statement();
        assert!(first.ends_with("@value = -1"));
        assert_eq!(first, dialect.unbind_statement());
    }

    #[test]
    fn test_mssql_text_and_uuid_are_quoted() {
        let dialect = MssqlDialect::new("OrgId", TenantIdFormat::Text).unwrap();
        assert_eq!(
            dialect.bind_statement(&id("acme")).unwrap(),
            "EXEC sys.sp_set_session_context @key = N'OrgId', @value = N'acme'"
        );

        let dialect = MssqlDialect::new("TenantId", TenantIdFormat::Uuid).unwrap();
        let sql = dialect
            .bind_statement(&id("67e55044-10b1-426f-9247-bb680e5fe0c8"))
            .unwrap();
        assert!(sql.ends_with("@value = N'67e55044-10b1-426f-9247-bb680e5fe0c8'"));
    }

    #[test]
    fn test_mssql_rejects_non_numeric() {
        let dialect = MssqlDialect::default();
        assert!(dialect.bind_statement(&id("abc")).is_err());
        assert!(MssqlDialect::new("Tenant Id", TenantIdFormat::Integer).is_err());
    }

    #[test]
    fn test_dialect_kind_parse() {
        assert_eq!("MSSQL".parse::<DialectKind>().unwrap(), DialectKind::Mssql);
        assert_eq!("postgresql".parse::<DialectKind>().unwrap(), DialectKind::Postgres);
        assert_eq!(DialectKind::default(), DialectKind::Postgres);
        assert!("oracle".parse::<DialectKind>().is_err());
    }

    #[test]
    fn test_dialect_kind_build() {
        let settings = DialectSettings::default();
        assert_eq!(DialectKind::Postgres.build(&settings).unwrap().name(), "postgres");
        assert_eq!(DialectKind::Mssql.build(&settings).unwrap().name(), "mssql");

        let bad = DialectSettings {
            pg_setting: "nodot".to_string(),
            ..DialectSettings::default()
        };
        assert!(DialectKind::Postgres.build(&bad).is_err());
    }
}
