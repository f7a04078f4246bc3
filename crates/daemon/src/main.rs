// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 WireGuard Tunnel Manager Contributors

// WireGuard Tunnel Manager - Daemon
// Owns the tunnel session and drives wg / wg-quick on behalf of UI surfaces

mod api;
mod config;
mod controller;
mod permissions;
mod pidfile;
mod runner;
mod session;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use hyper_util::rt::TokioIo;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tower::Service;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wg_tunnel_common::{format_host_port, SessionEvent, TunnelDirectory};

use api::{create_router, AppState};
use config::{DaemonConfig, ListenerMode};
use controller::{Controller, ControllerSettings};
use runner::{SystemRunner, ToolPaths};

#[tokio::main]
async fn main() -> Result<()> {
    // Set restrictive umask before creating any files
    permissions::set_restrictive_umask();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wg_tunnel_daemon=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("WireGuard Tunnel Manager Daemon starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let _pid_guard = pidfile::PidFileGuard::create()
        .context("Failed to create PID file - another daemon may already be running")?;

    let daemon_config = DaemonConfig::load()?;
    info!("Listener mode: {:?}", daemon_config.listener_mode);
    info!("Tunnels directory: {}", daemon_config.tunnels_dir.display());
    info!(
        "Polling every {}s, stall after {} unconfirmed polls",
        daemon_config.poll_interval().as_secs(),
        daemon_config.stall_threshold()
    );
    if !daemon_config.reset_dns_services.is_empty() {
        info!(
            "Resetting DNS after each stop for: {}",
            daemon_config.reset_dns_services.join(", ")
        );
    }
    if !daemon_config.tunnels_dir.is_dir() {
        warn!(
            "Tunnels directory {} does not exist; no tunnels will be listed",
            daemon_config.tunnels_dir.display()
        );
    }

    let shutdown = CancellationToken::new();
    let tunnels = TunnelDirectory::new(&daemon_config.tunnels_dir);

    let runner = SystemRunner::new(
        ToolPaths::from_config(&daemon_config),
        daemon_config.command_timeout(),
    );
    let (controller, controller_tasks) = Controller::spawn(
        Arc::new(runner),
        Arc::new(tunnels.clone()),
        ControllerSettings {
            poll_interval: daemon_config.poll_interval(),
            stall_threshold: daemon_config.stall_threshold(),
            reset_dns_services: daemon_config.reset_dns_services.clone(),
        },
        shutdown.clone(),
    );

    // Log session events
    let mut event_rx = controller.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            match event {
                SessionEvent::StateChanged { snapshot } => info!(
                    "Session: phase={} active={} selected={}",
                    snapshot.phase,
                    snapshot.active_tunnel,
                    snapshot
                        .selected_tunnel
                        .as_ref()
                        .map(|n| n.as_str())
                        .unwrap_or("none")
                ),
                other => debug!("Session event: {:?}", other),
            }
        }
    });

    let state = Arc::new(AppState {
        controller,
        tunnels,
        shutdown: shutdown.clone(),
    });
    let app = create_router(state);

    // Cancel everything on Ctrl+C / SIGTERM
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(()) => {}
            Err(e) => error!("Failed to listen for shutdown signals: {:#}", e),
        }
        signal_token.cancel();
    });

    let served = match daemon_config.listener_mode {
        ListenerMode::UnixSocket => serve_unix_socket(app, &daemon_config, shutdown.clone()).await,
        ListenerMode::TcpHttp => {
            let bind_address = format_host_port(&daemon_config.bind_host, daemon_config.bind_port);
            serve_tcp_http(app, &bind_address, shutdown.clone()).await
        }
    };

    // Stop the controller whether the server ended cleanly or not
    shutdown.cancel();
    controller_tasks.join().await;
    served?;

    // Tunnels are left as they are; the VPN outlives the manager
    info!("Daemon shut down");
    Ok(())
}

/// Serve on Unix domain socket (local-only)
async fn serve_unix_socket(
    app: axum::Router,
    daemon_config: &DaemonConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let socket_path = config::socket_path()?;

    if socket_path.exists() {
        std::fs::remove_file(&socket_path).context("Failed to remove existing socket file")?;
    }

    if let Some(parent) = socket_path.parent() {
        permissions::ensure_directory_with_permissions(parent, daemon_config.group_access)?;
    }

    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("Failed to bind to socket: {}", socket_path.display()))?;

    // Set socket permissions immediately after binding
    permissions::set_socket_permissions(&socket_path, daemon_config.group_access)?;

    info!("Daemon listening on Unix socket: {}", socket_path.display());
    info!("Daemon started successfully");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Shutting down server...");
                break;
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, _addr)) => {
                        let app = app.clone();

                        tokio::spawn(async move {
                            let stream = TokioIo::new(stream);

                            let hyper_service = hyper::service::service_fn(move |request: hyper::Request<hyper::body::Incoming>| {
                                let mut app = app.clone();
                                async move { app.call(request).await }
                            });

                            if let Err(err) = hyper_util::server::conn::auto::Builder::new(hyper_util::rt::TokioExecutor::new())
                                .serve_connection_with_upgrades(stream, hyper_service)
                                .await
                            {
                                // Clients going away mid-stream (e.g. Ctrl+C on `wg-tunnel watch`) are normal
                                let err_msg = err.to_string();
                                if err_msg.contains("connection closed") || err_msg.contains("Broken pipe") {
                                    debug!("Client disconnected: {}", err);
                                } else {
                                    error!("Error serving connection: {}", err);
                                }
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }
        }
    }

    if socket_path.exists() {
        let _ = std::fs::remove_file(&socket_path);
    }

    Ok(())
}

/// Serve on TCP with HTTP (loopback only; validated at config load)
async fn serve_tcp_http(
    app: axum::Router,
    bind_address: &str,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_address))?;

    info!("Daemon listening on TCP (HTTP): {}", bind_address);
    info!("Daemon started successfully");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("TCP HTTP server error")?;

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("Failed to install SIGTERM handler")?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}
