use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub env: Environment,
    pub log_level: String,
    pub data_dir: PathBuf,
    pub checkpoint_path: PathBuf,
    pub artifacts_dir: PathBuf,
    pub output_dir: PathBuf,
    pub tuning_path: Option<PathBuf>,
    pub oracle_base_url: String,
    pub oracle_api_key: Option<String>,
    pub oracle_model: String,
    pub oracle_timeout_secs: u64,
    pub oracle_max_retries: u32,
    pub oracle_retry_backoff_base_ms: u64,
    pub max_concurrent_partitions: usize,
}

impl AppConfig {
    /// The oracle is only reachable with an API key.
    #[must_use]
    pub fn oracle_enabled(&self) -> bool {
        self.oracle_api_key.is_some()
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("log_level", &self.log_level)
            .field("data_dir", &self.data_dir)
            .field("checkpoint_path", &self.checkpoint_path)
            .field("artifacts_dir", &self.artifacts_dir)
            .field("output_dir", &self.output_dir)
            .field("tuning_path", &self.tuning_path)
            .field("oracle_base_url", &self.oracle_base_url)
            .field(
                "oracle_api_key",
                &self.oracle_api_key.as_ref().map(|_| "[redacted]"),
            )
            .field("oracle_model", &self.oracle_model)
            .field("oracle_timeout_secs", &self.oracle_timeout_secs)
            .field("oracle_max_retries", &self.oracle_max_retries)
            .field(
                "oracle_retry_backoff_base_ms",
                &self.oracle_retry_backoff_base_ms,
            )
            .field("max_concurrent_partitions", &self.max_concurrent_partitions)
            .finish()
    }
}
