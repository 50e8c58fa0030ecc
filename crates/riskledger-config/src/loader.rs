use parking_lot::RwLock;
use riskledger_core::{LedgerError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::schema::{FailMode, RiskLedgerConfig, StoreBackend};

/// Loads and reloads the riskledger configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<RiskLedgerConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > RISKLEDGER_CONFIG env > ~/.riskledger/riskledger.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("RISKLEDGER_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".riskledger")
            .join("riskledger.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            Self::parse(&raw, &config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            RiskLedgerConfig::default()
        };

        let config = Self::apply_env_overrides(config);
        Self::check(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Build a loader from an in-memory TOML document (no file backing).
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config_path = PathBuf::from("<inline>");
        let config = Self::parse(raw, &config_path)?;
        Self::check(&config)?;
        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> RiskLedgerConfig {
        self.config.read().clone()
    }

    /// Get a shared reference for subscription.
    pub fn shared(&self) -> Arc<RwLock<RiskLedgerConfig>> {
        Arc::clone(&self.config)
    }

    /// Path the config was loaded from.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Reload the config from disk. An invalid file leaves the current config in place.
    pub fn reload(&self) -> Result<()> {
        if !self.config_path.exists() {
            return Err(LedgerError::Configuration(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let raw = std::fs::read_to_string(&self.config_path)?;
        let new_config = Self::apply_env_overrides(Self::parse(&raw, &self.config_path)?);
        Self::check(&new_config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }

    fn parse(raw: &str, path: &Path) -> Result<RiskLedgerConfig> {
        toml::from_str::<RiskLedgerConfig>(raw).map_err(|e| {
            LedgerError::Configuration(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Validate config: log warnings, fail on errors.
    fn check(config: &RiskLedgerConfig) -> Result<()> {
        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
                Ok(())
            }
            Err(e) => Err(LedgerError::Configuration(e)),
        }
    }

    /// Apply env var overrides (RISKLEDGER_DB_PATH, RISKLEDGER_FAIL_MODE, etc.)
    fn apply_env_overrides(mut config: RiskLedgerConfig) -> RiskLedgerConfig {
        if let Ok(v) = std::env::var("RISKLEDGER_DB_PATH") {
            config.store.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("RISKLEDGER_STORE_BACKEND") {
            match v.as_str() {
                "memory" => config.store.backend = StoreBackend::Memory,
                "sqlite" => config.store.backend = StoreBackend::Sqlite,
                other => warn!(value = other, "ignoring unknown RISKLEDGER_STORE_BACKEND"),
            }
        }
        if let Ok(v) = std::env::var("RISKLEDGER_FAIL_MODE") {
            match v.as_str() {
                "closed" => config.store.fail_mode = FailMode::Closed,
                "open" => config.store.fail_mode = FailMode::Open,
                other => warn!(value = other, "ignoring unknown RISKLEDGER_FAIL_MODE"),
            }
        }
        if let Ok(v) = std::env::var("RISKLEDGER_STORE_TIMEOUT_MS")
            && let Ok(ms) = v.parse::<u64>()
        {
            config.store.timeout_ms = ms;
        }
        if let Ok(v) = std::env::var("RISKLEDGER_LOG_LEVEL") {
            config.logging.level = v;
        }
        config
    }
}
