use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::portforward::{ports, PortForwardSettings, PortPair};

/// Top-level server config, loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Namespace used when a request omits one.
    pub default_namespace: String,
    pub port_forward: PortForwardConfig,
}

/// `[port_forward]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortForwardConfig {
    /// Pair used when a request omits `ports`, as `local[:remote]`.
    pub default_ports: String,
    /// Address local listeners bind to.
    pub bind_address: IpAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_namespace: "default".to_string(),
            port_forward: PortForwardConfig::default(),
        }
    }
}

impl Default for PortForwardConfig {
    fn default() -> Self {
        Self {
            default_ports: PortPair::DEFAULT.to_string(),
            bind_address: IpAddr::from([127, 0, 0, 1]),
        }
    }
}

impl Config {
    /// Load config from a TOML file path. Returns None if file doesn't exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        check_config_permissions(path);

        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::ReadFailed {
                path: path.to_path_buf(),
                source,
            })?;
        let config: Self =
            toml::from_str(&contents).map_err(|source| ConfigError::ParseFailed {
                path: path.to_path_buf(),
                source,
            })?;
        config.port_forward_settings()?;
        Ok(Some(config))
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        Ok(Self::load(path)?.unwrap_or_default())
    }

    /// Validated defaults for the port-forward manager.
    pub fn port_forward_settings(&self) -> Result<PortForwardSettings, ConfigError> {
        let default_ports = ports::parse_segment(self.port_forward.default_ports.trim())
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(PortForwardSettings {
            default_namespace: self.default_namespace.clone(),
            default_ports,
        })
    }
}

/// `~/.config/kmcp/config.toml`, or `./kmcp.toml` when there is no config dir.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("kmcp").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("kmcp.toml"))
}

/// Errors that can occur when loading config.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", .path.display())]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config {}: {source}", .path.display())]
    ParseFailed {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Warn if the config file is world-readable.
#[cfg(unix)]
pub fn check_config_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return,
    };

    let mode = metadata.permissions().mode();
    if is_world_readable(mode) {
        tracing::warn!(
            "Config file {} is world-readable (mode {:o}); consider restricting permissions to 600.",
            path.display(),
            mode & 0o7777,
        );
    }
}

/// No-op on non-Unix platforms.
#[cfg(not(unix))]
pub fn check_config_permissions(_path: &Path) {}

#[cfg(unix)]
pub fn is_world_readable(mode: u32) -> bool {
    mode & 0o004 != 0
}
