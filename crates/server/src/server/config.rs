use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "FLEETDOCK_";

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub data_dir: String,
    pub log_dir: String,
    /// DuckDB file, relative to `data_dir` unless absolute.
    pub database_file: String,
    /// Connection registry JSON file, relative to `data_dir` unless absolute.
    pub connections_file: String,
    /// Hex-encoded 32-byte AES-256-GCM key for stored SSH secrets.
    pub secret_encryption_key: String,
    pub collection_interval_secs: u64,
    pub startup_delay_secs: u64,
    pub retention_hours: u64,
    pub max_concurrent_collections: usize,
    pub ssh_connect_timeout_secs: u64,
    pub ssh_command_timeout_secs: u64,
    pub health_check_interval_secs: u64,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialServerConfig {
    data_dir: Option<String>,
    log_dir: Option<String>,
    database_file: Option<String>,
    connections_file: Option<String>,
    secret_encryption_key: Option<String>,
    collection_interval_secs: Option<u64>,
    startup_delay_secs: Option<u64>,
    retention_hours: Option<u64>,
    max_concurrent_collections: Option<usize>,
    ssh_connect_timeout_secs: Option<u64>,
    ssh_command_timeout_secs: Option<u64>,
    health_check_interval_secs: Option<u64>,
}

fn default_secret_encryption_key() -> String {
    // Development convenience only. Override via FLEETDOCK_SECRET_ENCRYPTION_KEY.
    "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            log_dir: "logs".to_string(),
            database_file: "fleetdock.duckdb".to_string(),
            connections_file: "connections.json".to_string(),
            secret_encryption_key: default_secret_encryption_key(),
            collection_interval_secs: 30,
            startup_delay_secs: 10,
            retention_hours: 24,
            max_concurrent_collections: 5,
            ssh_connect_timeout_secs: 10,
            ssh_command_timeout_secs: 30,
            health_check_interval_secs: 60,
        }
    }
}

impl ServerConfig {
    /// Loads configuration: environment (`FLEETDOCK_*`) overrides the optional
    /// TOML file, which overrides the defaults.
    pub fn load(config_path: Option<&str>) -> Result<Self, String> {
        dotenv::dotenv().ok();

        let file_config = match config_path {
            Some(path_str) => Self::read_file(Path::new(path_str))?,
            None => PartialServerConfig::default(),
        };

        let env_config: PartialServerConfig = envy::prefixed(ENV_PREFIX)
            .from_env::<PartialServerConfig>()
            .map_err(|e| format!("Failed to load config from environment: {e}"))?;

        let config = Self::merge(env_config, file_config);
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<PartialServerConfig, String> {
        if !path.exists() {
            return Ok(PartialServerConfig::default());
        }
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file at {path:?}: {e}"))?;
        toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse TOML from config file at {path:?}: {e}"))
    }

    fn merge(primary: PartialServerConfig, fallback: PartialServerConfig) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: primary.data_dir.or(fallback.data_dir).unwrap_or(defaults.data_dir),
            log_dir: primary.log_dir.or(fallback.log_dir).unwrap_or(defaults.log_dir),
            database_file: primary
                .database_file
                .or(fallback.database_file)
                .unwrap_or(defaults.database_file),
            connections_file: primary
                .connections_file
                .or(fallback.connections_file)
                .unwrap_or(defaults.connections_file),
            secret_encryption_key: primary
                .secret_encryption_key
                .or(fallback.secret_encryption_key)
                .unwrap_or(defaults.secret_encryption_key),
            collection_interval_secs: primary
                .collection_interval_secs
                .or(fallback.collection_interval_secs)
                .unwrap_or(defaults.collection_interval_secs),
            startup_delay_secs: primary
                .startup_delay_secs
                .or(fallback.startup_delay_secs)
                .unwrap_or(defaults.startup_delay_secs),
            retention_hours: primary
                .retention_hours
                .or(fallback.retention_hours)
                .unwrap_or(defaults.retention_hours),
            max_concurrent_collections: primary
                .max_concurrent_collections
                .or(fallback.max_concurrent_collections)
                .unwrap_or(defaults.max_concurrent_collections),
            ssh_connect_timeout_secs: primary
                .ssh_connect_timeout_secs
                .or(fallback.ssh_connect_timeout_secs)
                .unwrap_or(defaults.ssh_connect_timeout_secs),
            ssh_command_timeout_secs: primary
                .ssh_command_timeout_secs
                .or(fallback.ssh_command_timeout_secs)
                .unwrap_or(defaults.ssh_command_timeout_secs),
            health_check_interval_secs: primary
                .health_check_interval_secs
                .or(fallback.health_check_interval_secs)
                .unwrap_or(defaults.health_check_interval_secs),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.collection_interval_secs == 0 {
            return Err("collection_interval_secs must be greater than zero".to_string());
        }
        if self.max_concurrent_collections == 0 {
            return Err("max_concurrent_collections must be greater than zero".to_string());
        }
        if self.retention_hours == 0 {
            return Err("retention_hours must be greater than zero".to_string());
        }
        if self.ssh_command_timeout_secs == 0 {
            return Err("ssh_command_timeout_secs must be greater than zero".to_string());
        }
        Ok(())
    }

    fn in_data_dir(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.data_dir).join(path)
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.in_data_dir(&self.database_file)
    }

    pub fn connections_path(&self) -> PathBuf {
        self.in_data_dir(&self.connections_file)
    }

    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_secs)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(60 * 60))
    }

    pub fn ssh_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh_connect_timeout_secs)
    }

    pub fn ssh_command_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh_command_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}
