//! Configuration loading for the ZoneOpt service.
//!
//! A TOML file (`--config` or `ZONEOPT_CONFIG`) is optional; every setting
//! has a default and can be overridden with a `ZONEOPT_*` environment
//! variable. The merged result is validated before use.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use zoneopt_engine::{LocatorConfig, DEFAULT_ENGINE_TIMEOUT, DEFAULT_NETWORK_TIMEOUT};

use crate::db::DbConfig;
use crate::telemetry::LogFormat;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Directory the engine writes its artifacts into.
    pub output_dir: PathBuf,
    /// Directory for side-channel files; the system temp dir when unset.
    pub temp_dir: Option<PathBuf>,
    pub log_format: LogFormat,
    pub engine: EngineConfig,
    pub network: NetworkConfig,
    pub locator: LocatorConfig,
    pub storage: StorageConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            temp_dir: None,
            log_format: LogFormat::default(),
            engine: EngineConfig::default(),
            network: NetworkConfig::default(),
            locator: LocatorConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Interpreter or executable; `python3` then `python` on `PATH` when unset.
    pub program: Option<String>,
    pub script: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: None,
            script: None,
            timeout_secs: DEFAULT_ENGINE_TIMEOUT.as_secs(),
        }
    }
}

/// Road network generator. Disabled when no script is configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub program: Option<String>,
    pub script: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            program: None,
            script: None,
            timeout_secs: DEFAULT_NETWORK_TIMEOUT.as_secs(),
        }
    }
}

impl NetworkConfig {
    pub fn is_enabled(&self) -> bool {
        self.script.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Lmdb,
    Postgres,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "lmdb" => Ok(StorageBackend::Lmdb),
            "postgres" => Ok(StorageBackend::Postgres),
            other => Err(format!(
                "unknown storage backend '{}' (expected memory, lmdb or postgres)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub lmdb: LmdbConfig,
    pub postgres: DbConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LmdbConfig {
    pub path: PathBuf,
    pub max_size_mb: usize,
}

impl Default for LmdbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("zoneopt-runs.lmdb"),
            max_size_mb: 256,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ServiceConfig {
    /// Load from the optional config file, overlay the environment, validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let mut config = match path {
            Some(path) => Self::from_path(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: ServiceConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Overlay `ZONEOPT_*` variables from `lookup`. Path lists use the
    /// platform separator.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(dir) = lookup("ZONEOPT_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("ZONEOPT_TEMP_DIR") {
            self.temp_dir = Some(PathBuf::from(dir));
        }
        if let Some(format) = env_parse(&lookup, "ZONEOPT_LOG_FORMAT", "log_format")? {
            self.log_format = format;
        }

        if let Some(program) = lookup("ZONEOPT_ENGINE_PROGRAM") {
            self.engine.program = Some(program);
        }
        if let Some(script) = lookup("ZONEOPT_ENGINE_SCRIPT") {
            self.engine.script = Some(PathBuf::from(script));
        }
        if let Some(secs) = env_parse(&lookup, "ZONEOPT_ENGINE_TIMEOUT_SECS", "engine.timeout_secs")? {
            self.engine.timeout_secs = secs;
        }

        if let Some(program) = lookup("ZONEOPT_NETWORK_PROGRAM") {
            self.network.program = Some(program);
        }
        if let Some(script) = lookup("ZONEOPT_NETWORK_SCRIPT") {
            self.network.script = Some(PathBuf::from(script));
        }
        if let Some(secs) =
            env_parse(&lookup, "ZONEOPT_NETWORK_TIMEOUT_SECS", "network.timeout_secs")?
        {
            self.network.timeout_secs = secs;
        }

        if let Some(roots) = lookup("ZONEOPT_STORAGE_ROOTS") {
            self.locator.storage_roots = split_path_list(&roots);
        }
        if let Some(root) = lookup("ZONEOPT_SERVICE_ROOT") {
            self.locator.service_root = Some(PathBuf::from(root));
        }
        if let Some(dirs) = lookup("ZONEOPT_OUTPUT_DIRS") {
            self.locator.output_dirs = split_path_list(&dirs);
        }
        if let Some(files) = lookup("ZONEOPT_FALLBACK_RASTERS") {
            self.locator.fallback_rasters = split_path_list(&files);
        }

        if let Some(backend) = env_parse(&lookup, "ZONEOPT_STORAGE_BACKEND", "storage.backend")? {
            self.storage.backend = backend;
        }
        if let Some(path) = lookup("ZONEOPT_LMDB_PATH") {
            self.storage.lmdb.path = PathBuf::from(path);
        }
        if let Some(size) =
            env_parse(&lookup, "ZONEOPT_LMDB_MAX_SIZE_MB", "storage.lmdb.max_size_mb")?
        {
            self.storage.lmdb.max_size_mb = size;
        }
        self.storage.postgres.apply_overrides(&lookup)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "output_dir",
                reason: "must not be empty".to_string(),
            });
        }
        if self.engine.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "engine.timeout_secs",
                reason: "must be > 0".to_string(),
            });
        }
        if self.network.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "network.timeout_secs",
                reason: "must be > 0".to_string(),
            });
        }
        match self.storage.backend {
            StorageBackend::Memory => {}
            StorageBackend::Lmdb => {
                if self.storage.lmdb.path.as_os_str().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "storage.lmdb.path",
                        reason: "must not be empty".to_string(),
                    });
                }
                if self.storage.lmdb.max_size_mb == 0 {
                    return Err(ConfigError::InvalidValue {
                        field: "storage.lmdb.max_size_mb",
                        reason: "must be > 0".to_string(),
                    });
                }
            }
            StorageBackend::Postgres => self.storage.postgres.validate()?,
        }
        Ok(())
    }
}

/// Parse an optional variable, naming `field` when the value is malformed.
pub(crate) fn env_parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    field: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                field,
                reason: format!("{}={}: {}", key, raw, e),
            }),
    }
}

fn split_path_list(raw: &str) -> Vec<PathBuf> {
    std::env::split_paths(raw)
        .filter(|p| !p.as_os_str().is_empty())
        .collect()
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("ZONEOPT_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ServiceConfig::default();
        config.validate().unwrap();
        assert_eq!(config.engine.timeout_secs, 600);
        assert_eq!(config.network.timeout_secs, 120);
        assert!(!config.network.is_enabled());
        assert_eq!(config.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn test_from_path_reads_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
output_dir = "/srv/zoneopt/output"
log_format = "json"

[engine]
script = "/opt/engine/optimize.py"
timeout_secs = 900

[network]
script = "/opt/engine/roads.py"

[locator]
storage_roots = ["/srv/uploads", "/srv/analysis/uploads"]
fallback_rasters = ["/srv/samples/dem.tif"]

[storage]
backend = "lmdb"

[storage.lmdb]
path = "/var/lib/zoneopt/runs"
max_size_mb = 64
"#
        )
        .unwrap();

        let config = ServiceConfig::from_path(file.path()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.engine.timeout_secs, 900);
        assert!(config.network.is_enabled());
        assert_eq!(config.locator.storage_roots.len(), 2);
        assert_eq!(config.storage.backend, StorageBackend::Lmdb);
        assert_eq!(config.storage.lmdb.max_size_mb, 64);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[engine]\ninterpreter = \"python3\"\n").unwrap();
        assert!(matches!(
            ServiceConfig::from_path(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ServiceConfig::default();
        config
            .apply_overrides(lookup_from(&[
                ("ZONEOPT_ENGINE_SCRIPT", "/opt/engine/optimize.py"),
                ("ZONEOPT_ENGINE_TIMEOUT_SECS", "30"),
                ("ZONEOPT_STORAGE_BACKEND", "postgres"),
                ("ZONEOPT_DB_NAME", "landuse"),
                ("ZONEOPT_LOG_FORMAT", "json"),
            ]))
            .unwrap();
        assert_eq!(
            config.engine.script,
            Some(PathBuf::from("/opt/engine/optimize.py"))
        );
        assert_eq!(config.engine.timeout_secs, 30);
        assert_eq!(config.storage.backend, StorageBackend::Postgres);
        assert_eq!(config.storage.postgres.dbname, "landuse");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_malformed_override_names_field() {
        let mut config = ServiceConfig::default();
        let err = config
            .apply_overrides(lookup_from(&[("ZONEOPT_ENGINE_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "engine.timeout_secs",
                ..
            }
        ));
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let mut config = ServiceConfig::default();
        config.network.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.storage.backend = StorageBackend::Lmdb;
        config.storage.lmdb.max_size_mb = 0;
        assert!(config.validate().is_err());
    }
}
