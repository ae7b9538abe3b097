//! Configuration management for the permweave service.
//!
//! Configuration is layered from three sources:
//! 1. Default values (hardcoded)
//! 2. Configuration file (YAML)
//! 3. Environment variables (override)
//!
//! # Configuration Hierarchy
//!
//! Environment variables take precedence over config file values, which
//! take precedence over defaults. Variables use the `PERMWEAVE_` prefix and
//! `__` as the nested key separator:
//!
//! - `PERMWEAVE_LOGGING__LEVEL=debug` overrides `logging.level`
//! - `PERMWEAVE_RESOLUTION__INHERITANCE_TRAVERSAL_ALGORITHM=breadth-first`
//!
//! # Example
//!
//! ```ignore
//! use permweave_server::config::ServerConfig;
//!
//! let config = ServerConfig::load("permweave.yaml")?;
//! let resolution = config.resolution_config()?;
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use permweave_domain::calculator::ProcessorKind;
use permweave_domain::context::{ContextSatisfyMode, ContextSet};
use permweave_domain::graph::TraversalAlgorithm;
use permweave_domain::metastack::{MetaStackDefinition, MetaValueSelector};
use permweave_domain::{CachedDataConfig, ResolutionConfig};

/// Service configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ServerConfig {
    /// Identity of this server instance
    #[serde(default)]
    pub server: ServerSettings,

    /// Storage settings
    #[serde(default)]
    pub storage: StorageSettings,

    /// Per-holder cache settings
    #[serde(default)]
    pub cache: CacheSettings,

    /// Permission and meta resolution settings
    #[serde(default)]
    pub resolution: ResolutionSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Metrics settings
    #[serde(default)]
    pub metrics: MetricsSettings,
}

/// Identity of this server instance.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServerSettings {
    /// Value of the `server` context for checks made on this instance.
    /// `global` means no server context.
    #[serde(default = "default_server_name")]
    pub name: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            name: default_server_name(),
        }
    }
}

fn default_server_name() -> String {
    "global".to_string()
}

/// Storage backend settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StorageSettings {
    /// Storage backend type. Only "memory" ships with this crate.
    #[serde(default = "default_storage_backend")]
    pub backend: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
        }
    }
}

fn default_storage_backend() -> String {
    "memory".to_string()
}

/// Per-holder cache settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CacheSettings {
    /// Cached entries idle longer than this are recomputed on the next read
    #[serde(default = "default_expire_after_access")]
    pub expire_after_access_secs: u64,

    /// Maximum cached entries per holder and cache kind
    #[serde(default = "default_max_cached_entries")]
    pub max_cached_entries: u64,

    /// Memoised lookups kept per permission calculator
    #[serde(default = "default_calculator_memo_capacity")]
    pub calculator_memo_capacity: u64,

    /// How often housekeeping runs cache cleanup and the expiry audit
    #[serde(default = "default_housekeeping_interval")]
    pub housekeeping_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            expire_after_access_secs: default_expire_after_access(),
            max_cached_entries: default_max_cached_entries(),
            calculator_memo_capacity: default_calculator_memo_capacity(),
            housekeeping_interval_secs: default_housekeeping_interval(),
        }
    }
}

fn default_expire_after_access() -> u64 {
    120
}

fn default_max_cached_entries() -> u64 {
    256
}

fn default_calculator_memo_capacity() -> u64 {
    10_000
}

fn default_housekeeping_interval() -> u64 {
    30
}

/// Meta stack definition as written in configuration.
///
/// ```yaml
/// prefix_stack:
///   elements: ["highest_on_track_staff", "highest_on_track_donor"]
///   duplicates: first-only
///   start_spacer: ""
///   middle_spacer: " "
///   end_spacer: ""
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StackSettings {
    #[serde(default = "default_stack_elements")]
    pub elements: Vec<String>,

    /// `retain-all`, `first-only` or `last-only`
    #[serde(default = "default_duplicates")]
    pub duplicates: String,

    #[serde(default)]
    pub start_spacer: String,

    #[serde(default = "default_middle_spacer")]
    pub middle_spacer: String,

    #[serde(default)]
    pub end_spacer: String,
}

impl Default for StackSettings {
    fn default() -> Self {
        Self {
            elements: default_stack_elements(),
            duplicates: default_duplicates(),
            start_spacer: String::new(),
            middle_spacer: default_middle_spacer(),
            end_spacer: String::new(),
        }
    }
}

impl StackSettings {
    pub fn to_definition(&self) -> Result<MetaStackDefinition, ConfigLoadError> {
        MetaStackDefinition::parse(
            &self.elements,
            &self.duplicates,
            &self.start_spacer,
            &self.middle_spacer,
            &self.end_spacer,
        )
        .map_err(|e| ConfigLoadError::Invalid {
            message: e.to_string(),
        })
    }
}

fn default_stack_elements() -> Vec<String> {
    vec!["highest".to_string()]
}

fn default_duplicates() -> String {
    "retain-all".to_string()
}

fn default_middle_spacer() -> String {
    " ".to_string()
}

/// Permission and meta resolution settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ResolutionSettings {
    /// `at-least-one-value-per-key` or `all-values-per-key`
    #[serde(default = "default_satisfy_mode")]
    pub context_satisfy_mode: String,

    /// `breadth-first`, `depth-first-pre-order` or `depth-first-post-order`
    #[serde(default = "default_traversal_algorithm")]
    pub inheritance_traversal_algorithm: String,

    #[serde(default)]
    pub post_traversal_inheritance_sort: bool,

    /// Processors consulted after the direct lookup, in order
    #[serde(default = "default_processor_order")]
    pub processor_order: Vec<String>,

    #[serde(default = "default_true")]
    pub apply_wildcards: bool,

    #[serde(default = "default_true")]
    pub apply_regex: bool,

    #[serde(default)]
    pub apply_sponge_implicit_wildcards: bool,

    #[serde(default)]
    pub apply_default_negations_before_wildcards: bool,

    /// `first`, `highest-number` or `lowest-number`
    #[serde(default = "default_meta_value_selector")]
    pub meta_value_selector: String,

    /// Weight of groups that carry no `weight.N` node
    #[serde(default)]
    pub group_weights: HashMap<String, i32>,

    #[serde(default = "default_primary_group")]
    pub default_primary_group: String,

    #[serde(default)]
    pub prefix_stack: StackSettings,

    #[serde(default)]
    pub suffix_stack: StackSettings,
}

impl Default for ResolutionSettings {
    fn default() -> Self {
        Self {
            context_satisfy_mode: default_satisfy_mode(),
            inheritance_traversal_algorithm: default_traversal_algorithm(),
            post_traversal_inheritance_sort: false,
            processor_order: default_processor_order(),
            apply_wildcards: true,
            apply_regex: true,
            apply_sponge_implicit_wildcards: false,
            apply_default_negations_before_wildcards: false,
            meta_value_selector: default_meta_value_selector(),
            group_weights: HashMap::new(),
            default_primary_group: default_primary_group(),
            prefix_stack: StackSettings::default(),
            suffix_stack: StackSettings::default(),
        }
    }
}

fn default_satisfy_mode() -> String {
    "at-least-one-value-per-key".to_string()
}

fn default_traversal_algorithm() -> String {
    "depth-first-pre-order".to_string()
}

fn default_processor_order() -> Vec<String> {
    ["wildcard", "sponge-wildcard", "regex", "defaults"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_meta_value_selector() -> String {
    "first".to_string()
}

fn default_primary_group() -> String {
    "default".to_string()
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format (true for production, false for development)
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MetricsSettings {
    /// Install the Prometheus recorder
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ServerConfig {
    /// Load configuration from a YAML file with environment variable overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            // PERMWEAVE_CACHE__EXPIRE_AFTER_ACCESS_SECS -> cache.expire_after_access_secs
            .add_source(
                Environment::with_prefix("PERMWEAVE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(
                Environment::with_prefix("PERMWEAVE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        let valid_backends = ["memory"];
        if !valid_backends.contains(&self.storage.backend.as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "storage.backend must be one of: {:?}, got: {}",
                    valid_backends, self.storage.backend
                ),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "logging.level must be one of: {:?}, got: {}",
                    valid_levels, self.logging.level
                ),
            });
        }

        if self.cache.housekeeping_interval_secs == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "cache.housekeeping_interval_secs must be greater than 0".to_string(),
            });
        }

        if self.server.name.trim().is_empty() {
            return Err(ConfigLoadError::Invalid {
                message: "server.name cannot be empty".to_string(),
            });
        }

        self.resolution_config().map(|_| ())
    }

    /// Builds the domain resolution options, rejecting unknown spellings.
    pub fn resolution_config(&self) -> Result<ResolutionConfig, ConfigLoadError> {
        let settings = &self.resolution;

        let satisfy_mode = ContextSatisfyMode::parse(&settings.context_satisfy_mode)
            .ok_or_else(|| invalid("resolution.context_satisfy_mode", &settings.context_satisfy_mode))?;

        let algorithm = TraversalAlgorithm::parse(&settings.inheritance_traversal_algorithm)
            .ok_or_else(|| {
                invalid(
                    "resolution.inheritance_traversal_algorithm",
                    &settings.inheritance_traversal_algorithm,
                )
            })?;

        let processor_order = settings
            .processor_order
            .iter()
            .map(|name| {
                ProcessorKind::parse(name)
                    .ok_or_else(|| invalid("resolution.processor_order", name))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let selector = MetaValueSelector::parse(&settings.meta_value_selector)
            .map_err(|_| invalid("resolution.meta_value_selector", &settings.meta_value_selector))?;

        let mut config = ResolutionConfig::default()
            .with_context_satisfy_mode(satisfy_mode)
            .with_traversal_algorithm(algorithm)
            .with_post_traversal_sort(settings.post_traversal_inheritance_sort)
            .with_processor_order(processor_order)
            .with_apply_wildcards(settings.apply_wildcards)
            .with_apply_regex(settings.apply_regex)
            .with_apply_sponge_implicit_wildcards(settings.apply_sponge_implicit_wildcards)
            .with_apply_default_negations_before_wildcards(
                settings.apply_default_negations_before_wildcards,
            )
            .with_meta_value_selector(selector)
            .with_default_primary_group(&settings.default_primary_group)
            .with_prefix_stack(settings.prefix_stack.to_definition()?)
            .with_suffix_stack(settings.suffix_stack.to_definition()?);
        for (group, weight) in &settings.group_weights {
            config = config.with_group_weight(group, *weight);
        }
        Ok(config)
    }

    pub fn cache_config(&self) -> CachedDataConfig {
        CachedDataConfig::default()
            .with_expire_after_access(Duration::from_secs(self.cache.expire_after_access_secs))
            .with_max_cached_entries(self.cache.max_cached_entries)
            .with_calculator_memo_capacity(self.cache.calculator_memo_capacity)
    }

    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_secs(self.cache.housekeeping_interval_secs)
    }

    /// Contexts a user is in when they first arrive on this server.
    pub fn login_contexts(&self) -> Result<ContextSet, ConfigLoadError> {
        ContextSet::of("server", &self.server.name).map_err(|e| ConfigLoadError::Invalid {
            message: format!("server.name: {e}"),
        })
    }
}

fn invalid(field: &str, value: &str) -> ConfigLoadError {
    ConfigLoadError::Invalid {
        message: format!("{field}: unknown value {value:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    #[serial]
    fn test_can_load_config_from_yaml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server:
  name: lobby

cache:
  expire_after_access_secs: 300
  max_cached_entries: 64
  calculator_memo_capacity: 500

resolution:
  inheritance_traversal_algorithm: breadth-first
  post_traversal_inheritance_sort: true
  processor_order: [wildcard, regex]
  group_weights:
    admin: 100
  prefix_stack:
    elements: [highest_on_track_staff, highest]
    duplicates: first-only

logging:
  level: debug
  json: true
"#
        )
        .unwrap();

        let config = ServerConfig::load(file.path()).unwrap();

        assert_eq!(config.server.name, "lobby");
        assert_eq!(config.cache.expire_after_access_secs, 300);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);

        let resolution = config.resolution_config().unwrap();
        assert_eq!(
            resolution.inheritance_traversal_algorithm,
            TraversalAlgorithm::BreadthFirst
        );
        assert!(resolution.post_traversal_inheritance_sort);
        assert_eq!(
            resolution.processor_order,
            vec![ProcessorKind::Wildcard, ProcessorKind::Regex]
        );
        assert_eq!(resolution.group_weights.get("admin"), Some(&100));
        assert_eq!(resolution.prefix_stack.elements().len(), 2);

        let cache = config.cache_config();
        assert_eq!(cache.expire_after_access, Duration::from_secs(300));
        assert_eq!(cache.max_cached_entries, 64);
        assert_eq!(cache.calculator_memo_capacity, 500);
    }

    #[test]
    #[serial]
    fn test_can_override_config_with_env_vars() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server:
  name: lobby

logging:
  level: info
"#
        )
        .unwrap();

        std::env::set_var(
            "PERMWEAVE_RESOLUTION__INHERITANCE_TRAVERSAL_ALGORITHM",
            "depth-first-post-order",
        );
        std::env::set_var("PERMWEAVE_LOGGING__LEVEL", "warn");

        let config = ServerConfig::load(file.path());

        std::env::remove_var("PERMWEAVE_RESOLUTION__INHERITANCE_TRAVERSAL_ALGORITHM");
        std::env::remove_var("PERMWEAVE_LOGGING__LEVEL");

        let config = config.unwrap();
        assert_eq!(config.server.name, "lobby"); // From file
        assert_eq!(config.logging.level, "warn"); // Overridden by env
        assert_eq!(
            config.resolution.inheritance_traversal_algorithm,
            "depth-first-post-order"
        );
    }

    #[test]
    #[serial]
    fn test_from_env_loads_defaults_with_env_overrides() {
        std::env::set_var("PERMWEAVE_SERVER__NAME", "survival");

        let config = ServerConfig::from_env();

        std::env::remove_var("PERMWEAVE_SERVER__NAME");

        let config = config.unwrap();
        assert_eq!(config.server.name, "survival");
        assert_eq!(config.cache.expire_after_access_secs, 120); // default
        assert!(config.login_contexts().unwrap().contains("server", "survival"));
    }

    #[test]
    fn test_config_validation_catches_errors() {
        let mut config = ServerConfig::default();
        config.storage.backend = "postgres".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("storage.backend"));

        let mut config = ServerConfig::default();
        config.logging.level = "verbose".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("logging.level"));

        let mut config = ServerConfig::default();
        config.resolution.inheritance_traversal_algorithm = "random".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("inheritance_traversal_algorithm"));

        let mut config = ServerConfig::default();
        config.resolution.processor_order = vec!["wildcard".to_string(), "magic".to_string()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("processor_order"));

        let mut config = ServerConfig::default();
        config.resolution.prefix_stack.elements = vec!["highest_on_nothing".to_string()];
        assert!(matches!(
            config.validate(),
            Err(ConfigLoadError::Invalid { .. })
        ));

        let mut config = ServerConfig::default();
        config.cache.housekeeping_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_config_returns_clear_error() {
        let result = ServerConfig::load("/nonexistent/path/permweave.yaml");
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigLoadError::FileNotFound { .. }));
        assert!(err.to_string().contains("not found"));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid: yaml: syntax: [").unwrap();

        let err = ServerConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Load(_)));
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());

        assert_eq!(config.server.name, "global");
        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.logging.level, "info");
        assert!(config.metrics.enabled);
        // The global server means no server context.
        assert!(config.login_contexts().unwrap().is_empty());

        let resolution = config.resolution_config().unwrap();
        assert_eq!(resolution.default_primary_group, "default");
        assert!(!resolution.apply_sponge_implicit_wildcards);
    }
}
