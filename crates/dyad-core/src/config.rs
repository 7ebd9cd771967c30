use std::path::{Path, PathBuf};

use dyad_dtl::{DtlConfig, DtlMode};
use dyad_logging::LogConfig;
use dyad_types::{Address, ParticipantId};
use dyad_utils::{DEFAULT_KEY_BINS, DEFAULT_KEY_DEPTH};
use serde::{Deserialize, Serialize};

const MAX_KEY_DEPTH: u32 = 32;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("invalid value {value:?} for {var}")]
    Env { var: String, value: String },
    #[error("validation error: {0}")]
    Validation(String),
}

/// Participant configuration: the `[dyad]`-level keys of the TOML file plus
/// the `[dtl]` and `[log]` tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DyadConfig {
    /// Participant id; also the owner id written into location records.
    pub rank: u32,
    pub debug: bool,
    /// Record consume health for the consistency check.
    pub check: bool,
    /// All participants see one file system; consume never transfers.
    pub shared_storage: bool,
    pub key_depth: u32,
    pub key_bins: u32,
    pub kvs_namespace: String,
    pub producer_path: Option<PathBuf>,
    pub consumer_path: Option<PathBuf>,
    /// Build a storage view from the mount table at init.
    pub topology_check: bool,
    /// Broker the networked store connects to.
    pub broker_addr: String,
    /// Where this participant serves fetches. Must be reachable by peers.
    pub service_bind: String,
    pub dtl: DtlConfig,
    pub log: LogConfig,
}

impl Default for DyadConfig {
    fn default() -> Self {
        Self {
            rank: 0,
            debug: false,
            check: false,
            shared_storage: false,
            key_depth: DEFAULT_KEY_DEPTH,
            key_bins: DEFAULT_KEY_BINS,
            kvs_namespace: "dyad".to_string(),
            producer_path: None,
            consumer_path: None,
            topology_check: false,
            broker_addr: "127.0.0.1:8860".to_string(),
            service_bind: "127.0.0.1:0".to_string(),
            dtl: DtlConfig::default(),
            log: LogConfig::default(),
        }
    }
}

fn parse_flag(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Env {
            var: var.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_number(var: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        var: var.to_string(),
        value: value.to_string(),
    })
}

fn parse_address(name: &str, value: &str) -> Result<Address, ConfigError> {
    value
        .parse()
        .map_err(|e| ConfigError::Validation(format!("{} {:?}: {}", name, value, e)))
}

impl DyadConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DyadConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Overlay `DYAD_*` variables from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|var| std::env::var(var).ok())
    }

    /// Overlay `DYAD_*` variables, looking each one up through `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let flags: [(&str, &mut bool); 4] = [
            ("DYAD_SYNC_DEBUG", &mut self.debug),
            ("DYAD_SYNC_CHECK", &mut self.check),
            ("DYAD_SHARED_STORAGE", &mut self.shared_storage),
            ("DYAD_TOPOLOGY_CHECK", &mut self.topology_check),
        ];
        for (var, slot) in flags {
            if let Some(value) = lookup(var) {
                *slot = parse_flag(var, &value)?;
            }
        }

        let numbers: [(&str, &mut u32); 3] = [
            ("DYAD_KEY_DEPTH", &mut self.key_depth),
            ("DYAD_KEY_BINS", &mut self.key_bins),
            ("DYAD_RANK", &mut self.rank),
        ];
        for (var, slot) in numbers {
            if let Some(value) = lookup(var) {
                *slot = parse_number(var, &value)?;
            }
        }

        if let Some(ns) = lookup("DYAD_KVS_NAMESPACE") {
            self.kvs_namespace = ns;
        }
        if let Some(path) = lookup("DYAD_PATH_PRODUCER") {
            self.producer_path = (!path.is_empty()).then(|| PathBuf::from(path));
        }
        if let Some(path) = lookup("DYAD_PATH_CONSUMER") {
            self.consumer_path = (!path.is_empty()).then(|| PathBuf::from(path));
        }
        if let Some(mode) = lookup("DYAD_DTL_MODE") {
            self.dtl.mode = mode.parse::<DtlMode>().map_err(|_| ConfigError::Env {
                var: "DYAD_DTL_MODE".to_string(),
                value: mode.clone(),
            })?;
        }
        if let Some(bind) = lookup("DYAD_RMA_BIND") {
            self.dtl.rma_bind = bind;
        }
        if let Some(addr) = lookup("DYAD_BROKER_ADDR") {
            self.broker_addr = addr;
        }
        if let Some(bind) = lookup("DYAD_SERVICE_BIND") {
            self.service_bind = bind;
        }
        if self.debug {
            self.log = std::mem::take(&mut self.log).with_debug(true);
        }
        Ok(())
    }

    pub fn participant(&self) -> ParticipantId {
        ParticipantId(self.rank)
    }

    pub fn broker_address(&self) -> Result<Address, ConfigError> {
        parse_address("broker_addr", &self.broker_addr)
    }

    pub fn service_address(&self) -> Result<Address, ConfigError> {
        parse_address("service_bind", &self.service_bind)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.broker_address()?;
        self.service_address()?;
        if self.key_bins == 0 {
            return Err(ConfigError::Validation("key_bins must be positive".into()));
        }
        if self.key_depth > MAX_KEY_DEPTH {
            return Err(ConfigError::Validation(format!(
                "key_depth {} exceeds {}",
                self.key_depth, MAX_KEY_DEPTH
            )));
        }
        if self.kvs_namespace.is_empty() {
            return Err(ConfigError::Validation("kvs_namespace is empty".into()));
        }
        for (name, path) in [
            ("producer_path", &self.producer_path),
            ("consumer_path", &self.consumer_path),
        ] {
            if let Some(path) = path {
                if !path.is_absolute() {
                    return Err(ConfigError::Validation(format!(
                        "{} must be absolute: {}",
                        name,
                        path.display()
                    )));
                }
            }
        }
        Ok(())
    }
}
