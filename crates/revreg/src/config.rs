use revreg_core::RegistryType;
use revreg_engine::context::{
    DEFAULT_REVOCATION_ATTEMPTS, DEFAULT_TAILS_BASE, MAX_REGISTRY_SIZE, MIN_REGISTRY_SIZE,
};
use revreg_engine::EngineConfig;
use revreg_registrar::RegistrarMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RootError, RootResult};

/// Which record store backs the engine.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local store; everything is lost on exit.
    Memory,
    /// SQLite database file (default).
    #[default]
    Sqlite,
}

/// Configuration for the record store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Database file. Defaults to `<data_dir>/revreg.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Bounds and defaults for newly created registries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_min_size")]
    pub min_size: u32,

    #[serde(default = "default_max_size")]
    pub max_size: u32,

    /// Capacity used when a registry is created automatically.
    #[serde(default = "default_capacity")]
    pub default_capacity: u32,

    #[serde(default)]
    pub registry_type: RegistryType,

    /// Base URL or path tails files are published under.
    #[serde(default = "default_tails_base")]
    pub tails_base: String,
}

fn default_tails_base() -> String {
    DEFAULT_TAILS_BASE.to_string()
}

fn default_min_size() -> u32 {
    MIN_REGISTRY_SIZE
}

fn default_max_size() -> u32 {
    MAX_REGISTRY_SIZE
}

fn default_capacity() -> u32 {
    100
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            min_size: default_min_size(),
            max_size: default_max_size(),
            default_capacity: default_capacity(),
            registry_type: RegistryType::default(),
            tails_base: default_tails_base(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationConfig {
    /// Attempts per revocation batch before giving up on conflicts.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    DEFAULT_REVOCATION_ATTEMPTS
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuanceConfig {
    /// Attempts to find a usable registry per issued credential.
    #[serde(default = "default_issuance_retries")]
    pub retries: u32,

    /// Pause between attempts while no registry is ready.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_issuance_retries() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    2000
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            retries: default_issuance_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Configuration of the built-in local registrar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrarConfig {
    /// Issuer identifiers this registrar accepts.
    #[serde(default = "default_method_prefix")]
    pub method_prefix: String,

    #[serde(default)]
    pub mode: RegistrarMode,
}

fn default_method_prefix() -> String {
    "did:".to_string()
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            method_prefix: default_method_prefix(),
            mode: RegistrarMode::default(),
        }
    }
}

/// Top-level configuration for the revreg binary.
///
/// Loaded from a TOML file (typically `~/.revreg/config.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootConfig {
    /// Directory holding the database and other state.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub revocation: RevocationConfig,

    #[serde(default)]
    pub issuance: IssuanceConfig,

    #[serde(default)]
    pub registrar: RegistrarConfig,
}

fn default_data_dir() -> PathBuf {
    dirs_or_default(".revreg")
}

/// Returns `$HOME/<suffix>` if HOME is available, otherwise `./<suffix>`.
fn dirs_or_default(suffix: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(suffix))
        .unwrap_or_else(|_| PathBuf::from(suffix))
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            store: StoreConfig::default(),
            registry: RegistryConfig::default(),
            revocation: RevocationConfig::default(),
            issuance: IssuanceConfig::default(),
            registrar: RegistrarConfig::default(),
        }
    }
}

impl RootConfig {
    /// Load configuration from a TOML file. If the file does not exist,
    /// returns a default configuration.
    pub fn load(path: &Path) -> RootResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(RootError::Io)?;
        let config: RootConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> RootResult<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| RootError::Config(format!("TOML serialize error: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(RootError::Io)?;
        }
        std::fs::write(path, contents).map_err(RootError::Io)?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> RootResult<()> {
        let registry = &self.registry;
        if registry.min_size == 0 {
            return Err(RootError::Config("registry.min_size must be > 0".into()));
        }
        if registry.min_size > registry.max_size {
            return Err(RootError::Config(format!(
                "registry.min_size ({}) exceeds registry.max_size ({})",
                registry.min_size, registry.max_size
            )));
        }
        if registry.default_capacity < registry.min_size
            || registry.default_capacity > registry.max_size
        {
            return Err(RootError::Config(format!(
                "registry.default_capacity must be between {} and {}, got {}",
                registry.min_size, registry.max_size, registry.default_capacity
            )));
        }
        if self.revocation.max_attempts == 0 {
            return Err(RootError::Config(
                "revocation.max_attempts must be > 0".into(),
            ));
        }
        if self.issuance.retries == 0 {
            return Err(RootError::Config("issuance.retries must be > 0".into()));
        }
        if self.registrar.method_prefix.is_empty() {
            return Err(RootError::Config(
                "registrar.method_prefix must not be empty".into(),
            ));
        }
        if self.registrar.mode == RegistrarMode::Fail {
            return Err(RootError::Config(
                "registrar.mode must be 'finish' or 'wait', got 'fail'".into(),
            ));
        }
        Ok(())
    }

    /// Path of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("revreg.db"))
    }

    /// Engine settings derived from this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            min_registry_size: self.registry.min_size,
            max_registry_size: self.registry.max_size,
            default_capacity: self.registry.default_capacity,
            registry_type: self.registry.registry_type,
            max_revocation_attempts: self.revocation.max_attempts,
            issuance_retries: self.issuance.retries,
            issuance_retry_delay: Duration::from_millis(self.issuance.retry_delay_ms),
            tails_base: self.registry.tails_base.clone(),
        }
    }

    /// Return the path to the default config file location.
    pub fn default_config_path() -> PathBuf {
        dirs_or_default(".revreg/config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RootConfig::default();
        assert!(config.data_dir.to_str().unwrap().contains(".revreg"));
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.registry.min_size, 4);
        assert_eq!(config.registry.max_size, 32768);
        assert_eq!(config.registry.default_capacity, 100);
        assert_eq!(config.revocation.max_attempts, 5);
        assert_eq!(config.issuance.retries, 5);
        assert_eq!(config.issuance.retry_delay_ms, 2000);
        assert_eq!(config.registrar.method_prefix, "did:");
        assert_eq!(config.registrar.mode, RegistrarMode::Finish);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
data_dir = "/tmp/test-revreg"

[store]
backend = "memory"

[registry]
default_capacity = 10
registry_type = "CL_ACCUM"
tails_base = "https://tails.example.org"

[revocation]
max_attempts = 3

[issuance]
retry_delay_ms = 0

[registrar]
method_prefix = "did:sov:"
mode = "wait"
"#;
        let config: RootConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/test-revreg"));
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.registry.default_capacity, 10);
        assert_eq!(config.registry.min_size, 4);
        assert_eq!(config.registry.tails_base, "https://tails.example.org");
        assert_eq!(config.revocation.max_attempts, 3);
        assert_eq!(config.issuance.retries, 5);
        assert_eq!(config.issuance.retry_delay_ms, 0);
        assert_eq!(config.registrar.method_prefix, "did:sov:");
        assert_eq!(config.registrar.mode, RegistrarMode::Wait);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validate_ok() {
        assert!(RootConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_validate_capacity_outside_bounds() {
        let mut config = RootConfig::default();
        config.registry.default_capacity = 2;
        assert!(config.validate().is_err());
        config.registry.default_capacity = 40000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validate_inverted_bounds() {
        let mut config = RootConfig::default();
        config.registry.min_size = 64;
        config.registry.max_size = 32;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validate_zero_attempts() {
        let mut config = RootConfig::default();
        config.revocation.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validate_rejects_fail_mode() {
        let mut config = RootConfig::default();
        config.registrar.mode = RegistrarMode::Fail;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_database_path() {
        let mut config = RootConfig {
            data_dir: PathBuf::from("/var/lib/revreg"),
            ..RootConfig::default()
        };
        assert_eq!(config.database_path(), PathBuf::from("/var/lib/revreg/revreg.db"));
        config.store.path = Some(PathBuf::from("/tmp/other.db"));
        assert_eq!(config.database_path(), PathBuf::from("/tmp/other.db"));
    }

    #[test]
    fn test_engine_config() {
        let mut config = RootConfig::default();
        config.issuance.retry_delay_ms = 250;
        config.revocation.max_attempts = 7;
        let engine = config.engine_config();
        assert_eq!(engine.max_revocation_attempts, 7);
        assert_eq!(engine.issuance_retry_delay, Duration::from_millis(250));
        assert_eq!(engine.default_capacity, 100);
        assert_eq!(engine.tails_base, "tails");
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = std::env::temp_dir().join(format!("revreg-config-test-{}", std::process::id()));
        let path = dir.join("config.toml");
        let mut config = RootConfig::default();
        config.data_dir = dir.clone();
        config.registry.default_capacity = 16;
        config.save(&path).unwrap();

        let loaded = RootConfig::load(&path).unwrap();
        assert_eq!(loaded.data_dir, dir);
        assert_eq!(loaded.registry.default_capacity, 16);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let config = RootConfig::load(Path::new("/nonexistent/revreg/config.toml")).unwrap();
        assert_eq!(config.registry.default_capacity, 100);
    }
}
