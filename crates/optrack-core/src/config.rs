use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if a value is present but invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if a value is present but invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the process environment so it can be tested with a plain
/// `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::path::PathBuf;

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        or_default(var, default)
            .parse::<usize>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let env = parse_environment(&or_default("OPTRACK_ENV", "development"))?;
    let log_level = or_default("OPTRACK_LOG_LEVEL", "info");

    let data_dir = PathBuf::from(or_default("OPTRACK_DATA_DIR", "./data"));
    let checkpoint_path = lookup("OPTRACK_CHECKPOINT_PATH").map_or_else(
        |_| {
            data_dir
                .join("checkpoints")
                .join("pipeline_checkpoint.json")
        },
        PathBuf::from,
    );
    let artifacts_dir = lookup("OPTRACK_ARTIFACTS_DIR")
        .map_or_else(|_| data_dir.join("intermediate"), PathBuf::from);
    let output_dir =
        lookup("OPTRACK_OUTPUT_DIR").map_or_else(|_| data_dir.join("output"), PathBuf::from);
    let tuning_path = lookup("OPTRACK_TUNING_PATH").ok().map(PathBuf::from);

    let oracle_base_url = or_default("OPTRACK_ORACLE_BASE_URL", "https://api.openai.com/v1");
    let oracle_api_key = lookup("OPTRACK_ORACLE_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty());
    let oracle_model = or_default("OPTRACK_ORACLE_MODEL", "gpt-4o-mini");
    let oracle_timeout_secs = parse_u64("OPTRACK_ORACLE_TIMEOUT_SECS", "30")?;
    let oracle_max_retries = parse_u32("OPTRACK_ORACLE_MAX_RETRIES", "2")?;
    let oracle_retry_backoff_base_ms = parse_u64("OPTRACK_ORACLE_RETRY_BACKOFF_BASE_MS", "500")?;
    let max_concurrent_partitions = parse_usize("OPTRACK_MAX_CONCURRENT_PARTITIONS", "4")?;

    if oracle_timeout_secs == 0 {
        return Err(invalid(
            "OPTRACK_ORACLE_TIMEOUT_SECS",
            "must be at least 1".to_string(),
        ));
    }
    if max_concurrent_partitions == 0 {
        return Err(invalid(
            "OPTRACK_MAX_CONCURRENT_PARTITIONS",
            "must be at least 1".to_string(),
        ));
    }

    Ok(AppConfig {
        env,
        log_level,
        data_dir,
        checkpoint_path,
        artifacts_dir,
        output_dir,
        tuning_path,
        oracle_base_url,
        oracle_api_key,
        oracle_model,
        oracle_timeout_secs,
        oracle_max_retries,
        oracle_retry_backoff_base_ms,
        max_concurrent_partitions,
    })
}

/// Parse a string into an `Environment` variant.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "OPTRACK_ENV".to_string(),
            reason: format!("unknown environment '{other}'"),
        }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
