// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 WireGuard Tunnel Manager Contributors

// WireGuard Tunnel Manager - Common Library
// Shared types, tunnel lookup, status parsing and the daemon client

pub mod daemon_client;
pub mod error;
pub mod network;
pub mod sse;
pub mod status;
pub mod tunnels;
pub mod types;
pub mod view_models;

pub use daemon_client::{
    create_daemon_client, system_runtime_dir, user_runtime_dir, ConnectionMode, DaemonClient,
    DaemonClientConfig, APP_DIR_NAME, SOCKET_FILE_NAME,
};
pub use error::{Error, Result};
pub use network::{format_host_port, is_loopback_address};
pub use sse::{EventListener, EventStream, SseDecoder};
pub use status::parse_status;
pub use tunnels::{
    default_tunnels_dir, PeerSummary, TunnelConfig, TunnelDetails, TunnelDirectory, TunnelLookup,
};
pub use types::{
    ActiveTunnel, ErrorResponse, IgnoreReason, IntentOutcome, IntentResponse, PendingTransition,
    Phase, PollResult, SessionEvent, SessionSnapshot, StopTarget, TunnelName, TunnelSummary,
    TunnelsListResponse,
};
pub use view_models::{tunnel_menu_items, SessionViewModel, StatusIndicator, TunnelMenuItem};

// Re-export commonly used external types
pub use chrono::{DateTime, Utc};
