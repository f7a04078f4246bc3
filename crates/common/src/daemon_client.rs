// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 WireGuard Tunnel Manager Contributors

// WireGuard Tunnel Manager - Daemon Client Module
// Shared daemon connection logic for UI surfaces

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::network::format_host_port;
use crate::sse::EventStream;
use crate::tunnels::TunnelDetails;
use crate::types::{
    ErrorResponse, IntentResponse, SessionSnapshot, TunnelName, TunnelSummary,
    TunnelsListResponse,
};

pub const APP_DIR_NAME: &str = "wg-tunnel-manager";
pub const SOCKET_FILE_NAME: &str = "wg-tunnel-manager.sock";
const SYSTEM_RUNTIME_DIR: &str = "/var/run/wg-tunnel-manager";

/// Timeout for plain request/response calls; event streams have none
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection mode for client to daemon communication
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionMode {
    /// Unix domain socket (local-only)
    #[default]
    UnixSocket,
    /// Plain HTTP on a loopback address
    Http,
}

/// Client configuration for connecting to the daemon
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DaemonClientConfig {
    #[serde(default)]
    pub connection_mode: ConnectionMode,

    /// Daemon host for HTTP mode
    #[serde(default = "default_daemon_host")]
    pub daemon_host: String,

    /// Daemon port for HTTP mode
    #[serde(default = "default_daemon_port")]
    pub daemon_port: u16,

    /// Socket path override for UnixSocket mode (optional)
    #[serde(default)]
    pub daemon_url: String,
}

fn default_daemon_host() -> String {
    "127.0.0.1".to_string()
}

fn default_daemon_port() -> u16 {
    3443
}

impl Default for DaemonClientConfig {
    fn default() -> Self {
        Self {
            connection_mode: ConnectionMode::default(),
            daemon_host: default_daemon_host(),
            daemon_port: default_daemon_port(),
            daemon_url: String::new(),
        }
    }
}

/// Per-user runtime directory for the socket and PID file
///
/// macOS has no XDG runtime dir, so the user cache dir stands in for it.
pub fn user_runtime_dir() -> Option<PathBuf> {
    dirs::runtime_dir()
        .or_else(dirs::cache_dir)
        .map(|dir| dir.join(APP_DIR_NAME))
}

/// Runtime directory used by a daemon running as root
pub fn system_runtime_dir() -> PathBuf {
    PathBuf::from(SYSTEM_RUNTIME_DIR)
}

impl DaemonClientConfig {
    /// Get the daemon base URL based on connection mode
    pub fn daemon_base_url(&self) -> Result<String> {
        match self.connection_mode {
            // reqwest routes every request over the socket; the host is a placeholder
            ConnectionMode::UnixSocket => Ok("http://daemon".to_string()),
            ConnectionMode::Http => {
                if self.daemon_host.trim().is_empty() {
                    anyhow::bail!("daemon_host is required for HTTP mode but is empty");
                }
                Ok(format!(
                    "http://{}",
                    format_host_port(&self.daemon_host, self.daemon_port)
                ))
            }
        }
    }

    /// Get the Unix socket path
    ///
    /// Checks in priority order:
    /// 1. Explicit path in `daemon_url`
    /// 2. User runtime directory, if a socket exists there
    /// 3. System runtime directory, if a socket exists there
    /// 4. User runtime directory (the daemon will create it)
    pub fn socket_path(&self) -> Result<PathBuf> {
        let candidate = self.daemon_url.trim();
        if !candidate.is_empty()
            && (candidate.starts_with('/')
                || candidate.starts_with("./")
                || candidate.starts_with("../"))
        {
            return Ok(PathBuf::from(candidate));
        }

        let user_socket = user_runtime_dir().map(|dir| dir.join(SOCKET_FILE_NAME));
        if let Some(path) = &user_socket {
            if path.exists() {
                return Ok(path.clone());
            }
        }

        let system_socket = system_runtime_dir().join(SOCKET_FILE_NAME);
        if system_socket.exists() {
            return Ok(system_socket);
        }

        user_socket.ok_or_else(|| {
            anyhow::anyhow!("Could not determine runtime directory and no system socket found")
        })
    }
}

/// Create an HTTP client configured to connect to the daemon
pub fn create_daemon_client(config: &DaemonClientConfig) -> Result<Client> {
    let mut client_builder = Client::builder();

    if config.connection_mode == ConnectionMode::UnixSocket {
        let socket_path = config.socket_path()?;
        client_builder = client_builder.unix_socket(socket_path);
    }

    client_builder
        .build()
        .context("Failed to build daemon client")
}

/// Typed access to the daemon API
#[derive(Clone)]
pub struct DaemonClient {
    client: Client,
    base_url: Url,
    pub config: DaemonClientConfig,
}

impl DaemonClient {
    pub fn new(config: DaemonClientConfig) -> Result<Self> {
        let client = create_daemon_client(&config)?;
        let base_url = Url::parse(&config.daemon_base_url()?).context("Invalid daemon URL")?;
        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    /// URL for an API path given as segments, each one percent-encoded
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Daemon URL cannot be a base"))?
            .clear()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .context("Failed to connect to daemon. Is wg-tunnel-daemon running?")?;
        check_response(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = self.url(segments)?;
        self.send(self.client.get(url))
            .await?
            .json()
            .await
            .context("Failed to parse daemon response")
    }

    async fn post_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = self.url(segments)?;
        self.send(self.client.post(url))
            .await?
            .json()
            .await
            .context("Failed to parse daemon response")
    }

    /// Check daemon health
    pub async fn health_check(&self) -> Result<()> {
        let url = self.url(&["health"])?;
        self.send(self.client.get(url)).await?;
        Ok(())
    }

    pub async fn session(&self) -> Result<SessionSnapshot> {
        self.get_json(&["session"]).await
    }

    pub async fn tunnels(&self) -> Result<Vec<TunnelSummary>> {
        let list: TunnelsListResponse = self.get_json(&["tunnels"]).await?;
        Ok(list.tunnels)
    }

    pub async fn tunnel_details(&self, name: &TunnelName) -> Result<TunnelDetails> {
        self.get_json(&["tunnels", name.as_str()]).await
    }

    /// Select a tunnel and connect, switch or disconnect
    pub async fn select_tunnel(&self, name: &TunnelName) -> Result<IntentResponse> {
        self.post_json(&["tunnels", name.as_str(), "select"]).await
    }

    pub async fn toggle(&self) -> Result<IntentResponse> {
        self.post_json(&["toggle"]).await
    }

    /// Ask the daemon to poll `wg show` now
    pub async fn request_poll(&self) -> Result<()> {
        let url = self.url(&["poll"])?;
        self.send(self.client.post(url)).await?;
        Ok(())
    }

    /// Open the daemon's event stream
    pub async fn events(&self) -> Result<EventStream> {
        let url = self.url(&["events"])?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to connect to event stream")?;
        let response = check_response(response).await?;
        Ok(EventStream::new(response))
    }
}

/// Turn a non-success response into an error carrying the daemon's message
async fn check_response(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.error)
        .unwrap_or(body);

    if message.is_empty() {
        anyhow::bail!("Daemon returned {}", status);
    }
    anyhow::bail!("Daemon returned {}: {}", status, message)
}
