// WireGuard Tunnel Manager - Daemon Config Module
// Listener, tool paths and polling settings

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;
use wg_tunnel_common::{
    default_tunnels_dir, is_loopback_address, system_runtime_dir, user_runtime_dir, APP_DIR_NAME,
    SOCKET_FILE_NAME,
};

/// Get the runtime directory for daemon state
///
/// A daemon running as root uses the system directory so that every
/// user's CLI can find it; otherwise the per-user directory.
pub fn runtime_dir() -> Result<PathBuf> {
    if is_root() {
        return Ok(system_runtime_dir());
    }
    user_runtime_dir().ok_or_else(|| anyhow::anyhow!("Could not determine runtime directory"))
}

/// Get the socket path for the daemon
pub fn socket_path() -> Result<PathBuf> {
    Ok(runtime_dir()?.join(SOCKET_FILE_NAME))
}

fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions
    unsafe { libc::geteuid() == 0 }
}

/// Listener mode for the daemon
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ListenerMode {
    /// Unix domain socket (local-only)
    #[default]
    UnixSocket,
    /// TCP with HTTP (loopback only)
    TcpHttp,
}

/// Daemon configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DaemonConfig {
    #[serde(default)]
    pub listener_mode: ListenerMode,

    /// Bind host for TcpHttp mode
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// Bind port for TcpHttp mode
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Enable group access to the Unix socket and runtime directory
    /// (0770/0660 instead of 0700/0600)
    #[serde(default)]
    pub group_access: bool,

    /// Directory holding `<name>.conf` tunnel configurations
    #[serde(default = "default_tunnels_dir")]
    pub tunnels_dir: PathBuf,

    #[serde(default = "default_wg_path")]
    pub wg_path: String,

    #[serde(default = "default_wg_quick_path")]
    pub wg_quick_path: String,

    #[serde(default = "default_networksetup_path")]
    pub networksetup_path: String,

    /// Network services whose DNS servers are cleared after a tunnel goes
    /// down (macOS, e.g. `["Wi-Fi"]`); empty disables the reset
    #[serde(default)]
    pub reset_dns_services: Vec<String>,

    /// Run the tools through `sudo -n`
    #[serde(default = "default_use_sudo")]
    pub use_sudo: bool,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Kill a tool invocation after this long (defaults to the poll interval)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_timeout_secs: Option<u64>,

    /// Unconfirmed polls before a transition is reported as stalled
    #[serde(default = "default_stall_threshold")]
    pub stall_threshold: u32,
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    3443
}

fn default_wg_path() -> String {
    "wg".to_string()
}

fn default_wg_quick_path() -> String {
    "wg-quick".to_string()
}

fn default_networksetup_path() -> String {
    "networksetup".to_string()
}

fn default_use_sudo() -> bool {
    true
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_stall_threshold() -> u32 {
    6
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listener_mode: ListenerMode::default(),
            bind_host: default_bind_host(),
            bind_port: default_bind_port(),
            group_access: false,
            tunnels_dir: default_tunnels_dir(),
            wg_path: default_wg_path(),
            wg_quick_path: default_wg_quick_path(),
            networksetup_path: default_networksetup_path(),
            reset_dns_services: Vec::new(),
            use_sudo: default_use_sudo(),
            poll_interval_secs: default_poll_interval_secs(),
            command_timeout_secs: None,
            stall_threshold: default_stall_threshold(),
        }
    }
}

impl DaemonConfig {
    /// Validate the daemon configuration
    pub fn validate(&self) -> Result<()> {
        if self.listener_mode == ListenerMode::TcpHttp && !is_loopback_address(&self.bind_host) {
            anyhow::bail!(
                "Security violation: tcp-http mode must bind a loopback address (bind_host: {}).\n\
                 The API controls privileged VPN commands and has no authentication.\n\
                 Use 127.0.0.1, ::1 or localhost, or switch listener_mode to 'unix-socket'.",
                self.bind_host
            );
        }

        if self.wg_path.trim().is_empty() || self.wg_quick_path.trim().is_empty() {
            anyhow::bail!("wg_path and wg_quick_path must not be empty");
        }

        if !self.reset_dns_services.is_empty() && self.networksetup_path.trim().is_empty() {
            anyhow::bail!("networksetup_path must not be empty when reset_dns_services is set");
        }

        if self.reset_dns_services.iter().any(|s| s.trim().is_empty()) {
            anyhow::bail!("reset_dns_services must not contain empty service names");
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn command_timeout(&self) -> Duration {
        match self.command_timeout_secs {
            Some(secs) => Duration::from_secs(secs.max(1)),
            None => self.poll_interval(),
        }
    }

    pub fn stall_threshold(&self) -> u32 {
        self.stall_threshold.max(1)
    }

    /// Load daemon configuration, writing defaults on first start
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            info!("No daemon configuration found, using defaults");
            info!("Configuration will be saved to: {}", config_path.display());
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let contents =
            fs::read_to_string(config_path).context("Failed to read daemon configuration")?;

        let config: Self =
            toml::from_str(&contents).context("Failed to parse daemon configuration")?;

        config
            .validate()
            .context("Configuration validation failed")?;

        info!("Loaded daemon configuration from: {}", config_path.display());
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).context("Failed to create configuration directory")?;
        }

        let contents =
            toml::to_string_pretty(self).context("Failed to serialize daemon configuration")?;

        fs::write(config_path, contents).context("Failed to write daemon configuration")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(config_path, fs::Permissions::from_mode(0o600))
                .context("Failed to set config file permissions")?;
        }

        info!("Saved daemon configuration to: {}", config_path.display());
        Ok(())
    }

    /// Get the path to the daemon configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join(APP_DIR_NAME).join("daemon.toml"))
    }
}
