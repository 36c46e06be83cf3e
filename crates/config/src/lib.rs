//! Configuration schema and loader for siblingkv clients.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Writer identity as hex. A random id is generated when absent.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Maximum number of engine attempts in flight at once.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Defaults applied to every operation unless overridden per call.
    #[serde(default)]
    pub operation: OperationSettings,

    /// Sibling resolution strategy.
    #[serde(default)]
    pub resolver: ResolverKind,

    /// Embedded reference engine settings.
    #[serde(default)]
    pub cluster: ClusterSettings,

    /// Storage settings for the reference engine.
    #[serde(default)]
    pub storage: StorageSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            pool_size: default_pool_size(),
            operation: OperationSettings::default(),
            resolver: ResolverKind::default(),
            cluster: ClusterSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSettings {
    /// Retries after the first attempt.
    #[serde(default = "default_retry")]
    pub retry: u32,

    /// Replica quorum for reads and writes; engine default when absent.
    #[serde(default)]
    pub rw: Option<usize>,

    /// Whether stores return the post-write body.
    #[serde(default)]
    pub return_body: bool,

    /// Whether fetches surface raw siblings instead of resolving them.
    #[serde(default)]
    pub allow_siblings: bool,

    /// Deadline for a single engine attempt, in milliseconds.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,

    /// Delay between attempts.
    #[serde(default)]
    pub backoff: BackoffSettings,
}

impl Default for OperationSettings {
    fn default() -> Self {
        Self {
            retry: default_retry(),
            rw: None,
            return_body: false,
            allow_siblings: false,
            attempt_timeout_ms: default_attempt_timeout_ms(),
            backoff: BackoffSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffSettings {
    None,
    Fixed { delay_ms: u64 },
    Exponential { base_ms: u64, max_ms: u64 },
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self::Exponential {
            base_ms: default_backoff_base_ms(),
            max_ms: default_backoff_max_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverKind {
    /// Surface every conflict to the caller.
    #[default]
    Manual,
    /// Keep the most recently written sibling.
    LastWriterWins,
    /// Set union of all siblings.
    Union,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    /// Replica count (N).
    #[serde(default = "default_replicas")]
    pub replicas: usize,

    /// Default read quorum (R).
    #[serde(default = "default_r")]
    pub r: usize,

    /// Default write quorum (W).
    #[serde(default = "default_w")]
    pub w: usize,

    /// Whether reads push reconciled versions to stale replicas.
    #[serde(default = "default_true")]
    pub read_repair: bool,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            r: default_r(),
            w: default_w(),
            read_repair: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Directory holding one WAL per replica.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Fsync policy: "always", "batch", "none".
    #[serde(default = "default_fsync")]
    pub fsync: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            fsync: default_fsync(),
        }
    }
}

// --- Defaults ---

fn default_pool_size() -> usize {
    16
}
fn default_retry() -> u32 {
    3
}
fn default_attempt_timeout_ms() -> u64 {
    5000
}
fn default_backoff_base_ms() -> u64 {
    50
}
fn default_backoff_max_ms() -> u64 {
    2000
}
fn default_replicas() -> usize {
    3
}
fn default_r() -> usize {
    2
}
fn default_w() -> usize {
    2
}
fn default_true() -> bool {
    true
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_fsync() -> String {
    "batch".to_string()
}

// --- Loading ---

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ClientConfig {
    /// Validate that configuration values are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("pool_size must be > 0".into()));
        }
        if let Some(id) = &self.client_id {
            if id.len() != 8 || hex::decode(id).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "client_id ({}) must be 8 hex characters",
                    id
                )));
            }
        }
        if self.operation.attempt_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "operation.attempt_timeout_ms must be > 0".into(),
            ));
        }
        if let BackoffSettings::Exponential { base_ms, max_ms } = self.operation.backoff {
            if base_ms > max_ms {
                return Err(ConfigError::Invalid(format!(
                    "operation.backoff.base_ms ({}) must be <= max_ms ({})",
                    base_ms, max_ms
                )));
            }
        }
        if self.cluster.replicas == 0 {
            return Err(ConfigError::Invalid("cluster.replicas must be > 0".into()));
        }
        if self.cluster.r == 0 || self.cluster.r > self.cluster.replicas {
            return Err(ConfigError::Invalid(format!(
                "cluster.r ({}) must be in 1..=cluster.replicas ({})",
                self.cluster.r, self.cluster.replicas
            )));
        }
        if self.cluster.w == 0 || self.cluster.w > self.cluster.replicas {
            return Err(ConfigError::Invalid(format!(
                "cluster.w ({}) must be in 1..=cluster.replicas ({})",
                self.cluster.w, self.cluster.replicas
            )));
        }
        if let Some(rw) = self.operation.rw {
            if rw == 0 || rw > self.cluster.replicas {
                return Err(ConfigError::Invalid(format!(
                    "operation.rw ({}) must be in 1..=cluster.replicas ({})",
                    rw, self.cluster.replicas
                )));
            }
        }
        Ok(())
    }
}

/// Load a `ClientConfig` from a YAML file path.
pub fn load_from_file(path: &std::path::Path) -> Result<ClientConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    load_from_str(&contents)
}

/// Load a `ClientConfig` from a YAML string.
pub fn load_from_str(yaml: &str) -> Result<ClientConfig, ConfigError> {
    let config: ClientConfig = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}
