//! Logging setup.
//!
//! All crates in the workspace log through `tracing`. Nothing is printed
//! unless the application installs a subscriber, either its own or the one
//! [`init`] builds when the `tracing-subscriber` feature is enabled.
//!
//! # Environment Variables
//!
//! - `ROWGUARD_DEBUG=true|1|yes` - Enable debug logging
//! - `ROWGUARD_LOG_LEVEL=trace|debug|info|warn|error` - Set a specific level
//! - `ROWGUARD_LOG_FORMAT=json|pretty|compact` - Output format (default: json)
//!
//! ```rust,no_run
//! use rowguard_core::logging;
//!
//! // Call once at startup.
//! logging::init();
//! ```
//!
//! Field conventions used across the crates:
//!
//! ```rust,ignore
//! debug!(handle, tenant = %tenant, sql = %sql, "Binding tenant");
//! warn!(dialect = dialect.name(), "Connection requested without a tenant in the session");
//! error!(handle, tenant = %tenant, error = %e, "Unbind failed, connection discarded");
//! ```

use std::sync::Once;

use crate::config::{EnvSource, StdEnvSource};

/// Enables debug logging.
pub const ENV_DEBUG: &str = "ROWGUARD_DEBUG";
/// Overrides the log level.
pub const ENV_LOG_LEVEL: &str = "ROWGUARD_LOG_LEVEL";
/// Selects the output format.
pub const ENV_LOG_FORMAT: &str = "ROWGUARD_LOG_FORMAT";

static INIT: Once = Once::new();

/// Check if debug logging is enabled via `ROWGUARD_DEBUG`.
#[inline]
pub fn is_debug_enabled() -> bool {
    debug_enabled_in(&StdEnvSource)
}

/// Get the configured log level.
///
/// Defaults to "debug" if `ROWGUARD_DEBUG` is enabled, otherwise "warn".
pub fn get_log_level() -> &'static str {
    log_level_in(&StdEnvSource)
}

/// Get the configured log format. Defaults to "json".
pub fn get_log_format() -> &'static str {
    log_format_in(&StdEnvSource)
}

fn debug_enabled_in(env: &impl EnvSource) -> bool {
    env.get(ENV_DEBUG)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

fn log_level_in(env: &impl EnvSource) -> &'static str {
    let fallback = if debug_enabled_in(env) { "debug" } else { "warn" };
    match env.get(ENV_LOG_LEVEL).map(|l| l.to_lowercase()).as_deref() {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("info") => "info",
        Some("warn") => "warn",
        Some("error") => "error",
        _ => fallback,
    }
}

fn log_format_in(env: &impl EnvSource) -> &'static str {
    match env.get(ENV_LOG_FORMAT).map(|f| f.to_lowercase()).as_deref() {
        Some("pretty") => "pretty",
        Some("compact") => "compact",
        _ => "json",
    }
}

/// Initialize logging from the environment.
///
/// Subsequent calls are no-ops. Does nothing unless `ROWGUARD_DEBUG` or
/// `ROWGUARD_LOG_LEVEL` is set.
pub fn init() {
    init_from(&StdEnvSource);
}

/// Initialize logging from an explicit environment source.
pub fn init_from(env: &impl EnvSource) {
    INIT.call_once(|| {
        if !debug_enabled_in(env) && !env.contains(ENV_LOG_LEVEL) {
            return;
        }

        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let level = log_level_in(env);
            let format = log_format_in(env);
            let filter = EnvFilter::try_new(format!(
                "rowguard={level},rowguard_core={level},rowguard_postgres={level},\
                 rowguard_mssql={level},rowguard_axum={level}"
            ))
            .unwrap_or_else(|_| EnvFilter::new("warn"));

            // try_init: the application may already own a global subscriber.
            let installed = match format {
                "json" => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().json())
                    .try_init(),
                "compact" => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().compact())
                    .try_init(),
                _ => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().pretty())
                    .try_init(),
            };

            if installed.is_ok() {
                tracing::info!(level, format, "rowguard logging initialized");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapEnvSource;

    #[test]
    fn test_defaults() {
        let env = MapEnvSource::new();
        assert!(!debug_enabled_in(&env));
        assert_eq!(log_level_in(&env), "warn");
        assert_eq!(log_format_in(&env), "json");
    }

    #[test]
    fn test_debug_flag_raises_level() {
        let env = MapEnvSource::new().set(ENV_DEBUG, "YES");
        assert!(debug_enabled_in(&env));
        assert_eq!(log_level_in(&env), "debug");
    }

    #[test]
    fn test_explicit_level_and_format() {
        let env = MapEnvSource::new()
            .set(ENV_LOG_LEVEL, "Trace")
            .set(ENV_LOG_FORMAT, "compact");
        assert_eq!(log_level_in(&env), "trace");
        assert_eq!(log_format_in(&env), "compact");

        let env = MapEnvSource::new().set(ENV_LOG_LEVEL, "loud");
        assert_eq!(log_level_in(&env), "warn");
    }
}
