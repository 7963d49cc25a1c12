//! Layered configuration: compiled-in defaults, an optional TOML file, then
//! environment-variable overrides. Mirrors the env-var-driven configuration
//! convention used elsewhere in this codebase (see `env_vars` helpers).

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Environment variable name constants, centralized so every binary agrees on
/// the override surface.
pub mod env_vars {
    pub const CONFIG_PATH: &str = "DASHFLOW_ANALYSIS_CONFIG";
    pub const WORKER_COUNT: &str = "DASHFLOW_ANALYSIS_WORKER_COUNT";
    pub const PRIORITY_SLOTS: &str = "DASHFLOW_ANALYSIS_PRIORITY_SLOTS";
    pub const TASK_BATCH_SIZE: &str = "DASHFLOW_ANALYSIS_TASK_BATCH_SIZE";
    pub const POLL_INTERVAL_SECS: &str = "DASHFLOW_ANALYSIS_POLL_INTERVAL_SECS";
    pub const DATA_DIR: &str = "DASHFLOW_ANALYSIS_DATA_DIR";
    pub const LOG_LEVEL: &str = "DASHFLOW_ANALYSIS_LOG_LEVEL";
    pub const LOG_FORMAT: &str = "DASHFLOW_ANALYSIS_LOG_FORMAT";
    pub const METRICS_ADDR: &str = "DASHFLOW_ANALYSIS_METRICS_ADDR";
    pub const METRICS_ENABLED: &str = "DASHFLOW_ANALYSIS_METRICS_ENABLED";
    pub const ARTIFACT_STORE_ROOT: &str = "DASHFLOW_ANALYSIS_ARTIFACT_STORE_ROOT";
    pub const RESULT_STORE_CONNECTION_STRING: &str = "DASHFLOW_ANALYSIS_RESULT_STORE_CONNECTION_STRING";
    pub const RESULT_STORE_TABLE_PREFIX: &str = "DASHFLOW_ANALYSIS_RESULT_STORE_TABLE_PREFIX";
    pub const RESULT_STORE_TASKS_TABLE: &str = "DASHFLOW_ANALYSIS_RESULT_STORE_TASKS_TABLE";

    #[must_use]
    pub fn env_string(name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    #[must_use]
    pub fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
        env_string(name).and_then(|v| v.parse().ok())
    }
}

/// A single entry in `SourceConfig.options`: a loosely-typed value as it
/// arrives from TOML or environment, converted into a typed option only at
/// the point a source constructor reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    String(String),
    Integer(i64),
    Bool(bool),
    List(Vec<String>),
}

/// The free-form key/value options bag attached to a [`SourceConfig`]. Typed
/// getters are tolerant of the value having arrived as a different-but
/// compatible representation (e.g. `"30"` for an integer option).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceOptions(pub HashMap<String, OptionValue>);

impl SourceOptions {
    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            OptionValue::String(s) => Some(s.clone()),
            OptionValue::Integer(i) => Some(i.to_string()),
            OptionValue::Bool(b) => Some(b.to_string()),
            OptionValue::List(_) => None,
        }
    }

    #[must_use]
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.0.get(key)? {
            OptionValue::Integer(i) => Some(*i),
            OptionValue::String(s) => s.parse().ok(),
            OptionValue::Bool(_) | OptionValue::List(_) => None,
        }
    }

    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key)? {
            OptionValue::Bool(b) => Some(*b),
            OptionValue::String(s) => match s.to_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            OptionValue::Integer(i) => Some(*i != 0),
            OptionValue::List(_) => None,
        }
    }

    #[must_use]
    pub fn get_duration(&self, key: &str) -> Option<Duration> {
        self.get_int(key).map(|secs| Duration::from_secs(secs.max(0) as u64))
    }

    #[must_use]
    pub fn get_string_list(&self, key: &str) -> Option<Vec<String>> {
        match self.0.get(key)? {
            OptionValue::List(l) => Some(l.clone()),
            OptionValue::String(s) => Some(s.split(',').map(|p| p.trim().to_string()).collect()),
            OptionValue::Integer(_) | OptionValue::Bool(_) => None,
        }
    }

    pub fn require_string(&self, source: &str, key: &str) -> Result<String, ConfigError> {
        self.get_string(key).ok_or_else(|| ConfigError::MissingOption {
            source: source.to_string(),
            option: key.to_string(),
        })
    }

    pub fn require_int(&self, source: &str, key: &str) -> Result<i64, ConfigError> {
        self.get_int(key).ok_or_else(|| ConfigError::MissingOption {
            source: source.to_string(),
            option: key.to_string(),
        })
    }
}

/// Declarative configuration for one source instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub source_type: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub options: SourceOptions,
}

fn default_true() -> bool {
    true
}

/// Immutable once constructed; validated eagerly so a bad value is a
/// construction-time [`ConfigError`], never a runtime surprise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub worker_count: usize,
    pub priority_slots: usize,
    pub task_batch_size: usize,
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::InvalidScheduler(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.priority_slots > self.worker_count {
            return Err(ConfigError::InvalidScheduler(format!(
                "priority_slots ({}) must not exceed worker_count ({})",
                self.priority_slots, self.worker_count
            )));
        }
        if self.task_batch_size == 0 {
            return Err(ConfigError::InvalidScheduler(
                "task_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Queue capacity is a multiple of `task_batch_size` (see spec §3).
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        2 * self.task_batch_size
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            worker_count: 4,
            priority_slots: 1,
            task_batch_size: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub bind_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Filesystem-backed object storage for task artifacts (spec C8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactStoreConfig {
    pub root_dir: String,
}

impl Default for ArtifactStoreConfig {
    fn default() -> Self {
        Self {
            root_dir: "/var/lib/dashflow-analysis/artifacts".to_string(),
        }
    }
}

/// PostgreSQL-backed result persistence (spec C8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultStoreConfig {
    pub connection_string: String,
    #[serde(default = "default_result_store_table_prefix")]
    pub table_prefix: String,
    /// Name of the tasks table `check_and_complete_if_ready` counts
    /// sub-tasks against. Must match the database source's own
    /// `table_name` option when both point at the same tasks table.
    #[serde(default = "default_result_store_tasks_table")]
    pub tasks_table: String,
}

fn default_result_store_table_prefix() -> String {
    "dashflow_analysis".to_string()
}

fn default_result_store_tasks_table() -> String {
    "dashflow_analysis_tasks".to_string()
}

impl Default for ResultStoreConfig {
    fn default() -> Self {
        Self {
            connection_string: "host=localhost user=dashflow dbname=dashflow_analysis".to_string(),
            table_prefix: default_result_store_table_prefix(),
            tasks_table: default_result_store_tasks_table(),
        }
    }
}

/// The top-level configuration record loaded by the service binary.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServiceConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub artifact_store: ArtifactStoreConfig,
    #[serde(default)]
    pub result_store: ResultStoreConfig,
}

fn default_data_dir() -> String {
    "/var/lib/dashflow-analysis/tasks".to_string()
}

impl ServiceConfig {
    /// Loads config by layering compiled-in defaults, an optional TOML file,
    /// then environment-variable overrides. A config with no sources
    /// substitutes a single default database-source entry (spec §6).
    pub fn load(file_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = file_path {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
                path: path.display().to_string(),
                source,
            })?;
            config = toml::from_str(&contents).map_err(|source| ConfigError::ParseFile {
                path: path.display().to_string(),
                source,
            })?;
        }

        config.apply_env_overrides();

        if config.sources.is_empty() {
            config.sources.push(SourceConfig {
                source_type: "database".to_string(),
                name: "default".to_string(),
                enabled: true,
                options: SourceOptions::default(),
            });
        }

        config.scheduler.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_vars::env_parse::<usize>(env_vars::WORKER_COUNT) {
            self.scheduler.worker_count = v;
        }
        if let Some(v) = env_vars::env_parse::<usize>(env_vars::PRIORITY_SLOTS) {
            self.scheduler.priority_slots = v;
        }
        if let Some(v) = env_vars::env_parse::<usize>(env_vars::TASK_BATCH_SIZE) {
            self.scheduler.task_batch_size = v;
        }
        if let Some(v) = env_vars::env_parse::<u64>(env_vars::POLL_INTERVAL_SECS) {
            self.scheduler.poll_interval = Duration::from_secs(v);
        }
        if let Some(v) = env_vars::env_string(env_vars::DATA_DIR) {
            self.data_dir = v;
        }
        if let Some(v) = env_vars::env_string(env_vars::LOG_LEVEL) {
            self.log.level = v;
        }
        if let Some(v) = env_vars::env_string(env_vars::LOG_FORMAT) {
            self.log.format = if v.eq_ignore_ascii_case("json") {
                LogFormat::Json
            } else {
                LogFormat::Pretty
            };
        }
        if let Some(v) = env_vars::env_string(env_vars::METRICS_ADDR) {
            self.metrics.bind_addr = v;
        }
        if let Some(v) = env_vars::env_parse::<bool>(env_vars::METRICS_ENABLED) {
            self.metrics.enabled = v;
        }
        if let Some(v) = env_vars::env_string(env_vars::ARTIFACT_STORE_ROOT) {
            self.artifact_store.root_dir = v;
        }
        if let Some(v) = env_vars::env_string(env_vars::RESULT_STORE_CONNECTION_STRING) {
            self.result_store.connection_string = v;
        }
        if let Some(v) = env_vars::env_string(env_vars::RESULT_STORE_TABLE_PREFIX) {
            self.result_store.table_prefix = v;
        }
        if let Some(v) = env_vars::env_string(env_vars::RESULT_STORE_TASKS_TABLE) {
            self.result_store.tasks_table = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_rejects_zero_workers() {
        let cfg = SchedulerConfig {
            worker_count: 0,
            ..SchedulerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn scheduler_rejects_priority_slots_exceeding_worker_count() {
        let cfg = SchedulerConfig {
            worker_count: 2,
            priority_slots: 3,
            ..SchedulerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn scheduler_accepts_slots_equal_to_worker_count() {
        let cfg = SchedulerConfig {
            worker_count: 2,
            priority_slots: 2,
            ..SchedulerConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn queue_capacity_is_double_batch_size() {
        let cfg = SchedulerConfig {
            task_batch_size: 5,
            ..SchedulerConfig::default()
        };
        assert_eq!(cfg.queue_capacity(), 10);
    }

    #[test]
    fn no_sources_substitutes_default_database_source() {
        let config = ServiceConfig::load(None).expect("defaults must be valid");
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].source_type, "database");
    }

    #[test]
    fn artifact_and_result_store_defaults_are_non_empty() {
        let config = ServiceConfig::default();
        assert!(!config.artifact_store.root_dir.is_empty());
        assert!(!config.result_store.connection_string.is_empty());
        assert_eq!(config.result_store.table_prefix, "dashflow_analysis");
        assert_eq!(config.result_store.tasks_table, "dashflow_analysis_tasks");
    }

    #[test]
    fn options_typed_getters_tolerate_stringly_typed_values() {
        let mut map = HashMap::new();
        map.insert("count".to_string(), OptionValue::String("42".to_string()));
        map.insert("enabled".to_string(), OptionValue::String("true".to_string()));
        let opts = SourceOptions(map);

        assert_eq!(opts.get_int("count"), Some(42));
        assert_eq!(opts.get_bool("enabled"), Some(true));
        assert_eq!(opts.get_duration("count"), Some(Duration::from_secs(42)));
    }
}
