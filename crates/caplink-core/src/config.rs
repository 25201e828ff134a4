//! Configuration system for caplink.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CAPLINK_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/caplink/config.toml
//!   3. ~/.config/caplink/config.toml

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::capability::{CapabilityError, CapabilityKind, Requirement};

/// Upper bound on the offline settle delay. The dispatcher must never hold
/// back an offline transition for longer than this.
pub const MAX_SETTLE_DELAY_MS: u64 = 200;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaplinkConfig {
    pub dispatch: DispatchConfig,
    pub capabilities: CapabilitiesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Wait before resolving an offline transition, letting in-flight
    /// discovery responses land. Must not exceed MAX_SETTLE_DELAY_MS.
    pub settle_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilitiesConfig {
    /// Send and advertise typing notifications.
    pub typing_notifications: bool,
    /// Capability kinds the local account supports. Only these are ever
    /// resolved for peers.
    pub local: Vec<String>,
    /// Kinds presumed present while a peer is offline.
    pub offline_allowed: Vec<String>,
    /// Per-kind overrides of the built-in requirement table.
    pub requirements: BTreeMap<String, RequirementConfig>,
}

/// One requirement override. `disabled = true` wins over `features`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequirementConfig {
    pub disabled: bool,
    pub features: Vec<String>,
}

impl RequirementConfig {
    pub fn to_requirement(&self) -> Requirement {
        if self.disabled {
            Requirement::Disabled
        } else {
            Requirement::features(self.features.iter().cloned())
        }
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 100,
        }
    }
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        Self {
            typing_notifications: true,
            local: CapabilityKind::BUILTIN
                .iter()
                .map(|k| k.as_str().to_string())
                .collect(),
            offline_allowed: [
                CapabilityKind::BasicMessaging,
                CapabilityKind::MessageCorrection,
                CapabilityKind::ContactInfo,
            ]
            .iter()
            .map(|k| k.as_str().to_string())
            .collect(),
            requirements: BTreeMap::new(),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("caplink")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("settle delay {0}ms exceeds the {max}ms bound", max = MAX_SETTLE_DELAY_MS)]
    SettleDelayTooLong(u64),
    #[error("invalid capability name in {section}: {source}")]
    InvalidCapability {
        section: &'static str,
        source: CapabilityError,
    },
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl CaplinkConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            CaplinkConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CAPLINK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&CaplinkConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Check bounds and capability names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.settle_delay_ms > MAX_SETTLE_DELAY_MS {
            return Err(ConfigError::SettleDelayTooLong(self.dispatch.settle_delay_ms));
        }
        self.capabilities.local_kinds()?;
        self.capabilities.offline_kinds()?;
        self.capabilities.requirement_overrides()?;
        Ok(())
    }

    /// Apply CAPLINK_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CAPLINK_DISPATCH__SETTLE_DELAY_MS") {
            if let Ok(ms) = v.parse() {
                self.dispatch.settle_delay_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("CAPLINK_CAPABILITIES__TYPING_NOTIFICATIONS") {
            self.capabilities.typing_notifications = v == "true" || v == "1";
        }
    }
}

impl CapabilitiesConfig {
    pub fn local_kinds(&self) -> Result<Vec<CapabilityKind>, ConfigError> {
        parse_kinds("capabilities.local", &self.local)
    }

    pub fn offline_kinds(&self) -> Result<Vec<CapabilityKind>, ConfigError> {
        parse_kinds("capabilities.offline_allowed", &self.offline_allowed)
    }

    pub fn requirement_overrides(&self) -> Result<Vec<(CapabilityKind, Requirement)>, ConfigError> {
        self.requirements
            .iter()
            .map(|(name, req)| {
                let kind = name.parse().map_err(|source| ConfigError::InvalidCapability {
                    section: "capabilities.requirements",
                    source,
                })?;
                Ok((kind, req.to_requirement()))
            })
            .collect()
    }
}

fn parse_kinds(section: &'static str, names: &[String]) -> Result<Vec<CapabilityKind>, ConfigError> {
    names
        .iter()
        .map(|name| {
            name.parse()
                .map_err(|source| ConfigError::InvalidCapability { section, source })
        })
        .collect()
}
