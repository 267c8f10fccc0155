//! Integration tests for configuration loading.
//!
//! These tests verify that a configured dialect ends up in the statements
//! a pool actually issues.

use std::io::Write;

use pretty_assertions::assert_eq;
use rowguard::config::MapEnvSource;
use rowguard::memory::MemorySource;
use rowguard::{DialectKind, RowGuardConfig, RowGuardError, TenantId, TenantIdFormat, TenantPool};

async fn bind_and_release(config: &RowGuardConfig, tenant: TenantId) -> Vec<String> {
    let pool = TenantPool::new(MemorySource::new(1), config.build_dialect().unwrap());
    let conn = pool.acquire_for(tenant).await.unwrap();
    conn.release().await.unwrap();
    pool.source().statements(1)
}

/// Test configuration with every option set
#[tokio::test]
async fn test_config_full_postgres() {
    let config = RowGuardConfig::from_toml_str(
        r#"
        dialect = "postgresql"
        tenant_format = "uuid"

        [postgres]
        setting = "acme.org_id"
    "#,
    )
    .unwrap();

    assert_eq!(config.dialect, DialectKind::Postgres);
    assert_eq!(config.tenant_format, TenantIdFormat::Uuid);

    let org = TenantId::new("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
    assert_eq!(
        bind_and_release(&config, org).await,
        vec![
            "SET acme.org_id = '67e55044-10b1-426f-9247-bb680e5fe0c8'".to_string(),
            "RESET acme.org_id".to_string(),
        ]
    );
}

/// Test SQL Server configuration with a custom session key
#[tokio::test]
async fn test_config_mssql() {
    let config = RowGuardConfig::from_toml_str(
        r#"
        dialect = "sqlserver"

        [mssql]
        session_key = "OrgId"
    "#,
    )
    .unwrap();

    assert_eq!(
        bind_and_release(&config, TenantId::from(12_i64)).await,
        vec![
            "EXEC sys.sp_set_session_context @key = N'OrgId', @value = 12".to_string(),
            "EXEC sys.sp_set_session_context @key = N'OrgId', @value = -1".to_string(),
        ]
    );
}

/// Test environment variables override the file
#[tokio::test]
async fn test_config_env_override() {
    let env = MapEnvSource::new()
        .set("ROWGUARD_DIALECT", "mssql")
        .set("ROWGUARD_TENANT_FORMAT", "text");
    let config = RowGuardConfig::from_toml_str(r#"dialect = "postgres""#)
        .unwrap()
        .with_env(&env)
        .unwrap();

    assert_eq!(config.dialect, DialectKind::Mssql);
    assert_eq!(
        bind_and_release(&config, TenantId::new("acme").unwrap()).await,
        vec![
            "EXEC sys.sp_set_session_context @key = N'TenantId', @value = N'acme'".to_string(),
            "EXEC sys.sp_set_session_context @key = N'TenantId', @value = -1".to_string(),
        ]
    );
}

/// Test configuration loaded from disk
#[test]
fn test_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "dialect = \"mssql\"").unwrap();

    let config = RowGuardConfig::from_file(file.path()).unwrap();
    assert_eq!(config.dialect, DialectKind::Mssql);

    let missing = RowGuardConfig::from_file(file.path().with_extension("missing"));
    assert!(matches!(missing, Err(RowGuardError::Config(_))));
}

/// Test that unsafe names are rejected before any pool exists
#[test]
fn test_config_rejects_unsafe_names() {
    let config = RowGuardConfig::from_toml_str(
        r#"
        [postgres]
        setting = "app.tenant_id; DROP TABLE orders"
    "#,
    )
    .unwrap();
    assert!(matches!(config.build_dialect(), Err(RowGuardError::Config(_))));

    let unknown = RowGuardConfig::from_toml_str(r#"provider = "postgres""#);
    assert!(unknown.is_err());
}

/// Test that the configured format is enforced at bind time
#[tokio::test]
async fn test_config_format_enforced() {
    let config = RowGuardConfig::default();
    let pool = TenantPool::new(MemorySource::new(1), config.build_dialect().unwrap());

    let err = pool.acquire_for(TenantId::new("acme").unwrap()).await.unwrap_err();
    assert!(matches!(err, RowGuardError::InvalidTenant(_)));
    assert!(pool.source().events().is_empty());
}
