//! Configuration for UMI agents.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $UMI_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/umi/config.toml
//!   3. ~/.config/umi/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UmiConfig {
    pub link: LinkConfig,
    pub bridge: BridgeConfig,
    pub memory: MemoryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial link width code. Unset = auto mode (reset release and polling only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u8>,
    /// Request-channel credits programmed at bring-up.
    pub request_credits: u16,
    /// Response-channel credits programmed at bring-up.
    pub response_credits: u16,
    /// Link-active polls before giving up.
    pub poll_budget: u32,
    pub poll_interval_ms: u64,
    /// Address width in bits of side-band transactions.
    pub addr_width: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Foreign data bus width in bytes.
    pub data_bytes: usize,
    /// No protocol packet crosses a multiple of this address.
    pub boundary: u64,
    /// Largest payload of one protocol packet.
    pub max_packet_bytes: usize,
    /// Outbound protocol request queue depth.
    pub request_queue: usize,
    /// Foreign response queue depth.
    pub response_queue: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Value read back from never-written addresses.
    pub default_byte: u8,
    /// Inclusive-exclusive decode window. Unset = every address decodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<(u64, u64)>,
    /// Depth of the responder task's request and response channels.
    pub channel_depth: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for UmiConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            bridge: BridgeConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            width: None,
            request_credits: 16,
            response_credits: 16,
            poll_budget: 1000,
            poll_interval_ms: 1,
            addr_width: 64,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            data_bytes: 8,
            boundary: 4096,
            max_packet_bytes: 4096,
            request_queue: 32,
            response_queue: 32,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            default_byte: 0,
            window: None,
            channel_depth: 64,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("umi")
}

fn home_dir() -> PathBuf {
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
    #[error("failed to parse inline config: {0}")]
    ParseInline(toml::de::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl UmiConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            UmiConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: UmiConfig = toml::from_str(text).map_err(ConfigError::ParseInline)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("UMI_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Apply UMI_* overrides. Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("UMI_LINK__WIDTH") {
            if let Ok(w) = v.parse() {
                self.link.width = Some(w);
            }
        }
        if let Some(v) = var("UMI_LINK__POLL_BUDGET") {
            if let Ok(n) = v.parse() {
                self.link.poll_budget = n;
            }
        }
        if let Some(v) = var("UMI_BRIDGE__DATA_BYTES") {
            if let Ok(n) = v.parse() {
                self.bridge.data_bytes = n;
            }
        }
        if let Some(v) = var("UMI_BRIDGE__BOUNDARY") {
            if let Ok(n) = v.parse() {
                self.bridge.boundary = n;
            }
        }
        if let Some(v) = var("UMI_MEMORY__DEFAULT_BYTE") {
            if let Ok(b) = parse_byte(&v) {
                self.memory.default_byte = b;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key, reason: &str| {
            Err(ConfigError::Invalid {
                key,
                reason: reason.to_string(),
            })
        };
        if !self.bridge.data_bytes.is_power_of_two() || self.bridge.data_bytes > 128 {
            return invalid("bridge.data_bytes", "must be a power of two up to 128");
        }
        if !self.bridge.boundary.is_power_of_two() {
            return invalid("bridge.boundary", "must be a power of two");
        }
        if self.bridge.max_packet_bytes == 0 {
            return invalid("bridge.max_packet_bytes", "must be non-zero");
        }
        if self.bridge.request_queue == 0 || self.bridge.response_queue == 0 {
            return invalid("bridge", "queue depths must be non-zero");
        }
        if self.memory.channel_depth == 0 {
            return invalid("memory.channel_depth", "must be non-zero");
        }
        if self.link.addr_width == 0 || self.link.addr_width > 64 || self.link.addr_width % 8 != 0 {
            return invalid("link.addr_width", "must be a multiple of 8 up to 64");
        }
        if matches!(self.link.width, Some(w) if w > 7) {
            return invalid("link.width", "width code must be at most 7");
        }
        Ok(())
    }
}

fn parse_byte(v: &str) -> Result<u8, std::num::ParseIntError> {
    match v.strip_prefix("0x").or_else(|| v.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => v.parse(),
    }
}
