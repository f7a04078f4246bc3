// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 WireGuard Tunnel Manager Contributors

// WireGuard Tunnel Manager - CLI Client
// Command-line surface for the tunnel session held by the daemon

mod config;
mod intent;
mod menu;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::{ColoredString, Colorize};
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
use tracing_subscriber::EnvFilter;

use wg_tunnel_common::{
    DaemonClient, EventListener, PendingTransition, SessionEvent, SessionSnapshot,
    SessionViewModel, StatusIndicator, TunnelName, TunnelSummary,
};

#[derive(Parser)]
#[command(name = "wg-tunnel")]
#[command(about = "WireGuard Tunnel Manager CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List tunnel configs
    List {
        /// Output as JSON for scripting
        #[arg(short, long)]
        json: bool,
    },

    /// Show the session status
    Status {
        /// Output the full session snapshot as JSON
        #[arg(short, long)]
        json: bool,

        /// Print the last `wg show` output
        #[arg(short, long)]
        raw: bool,
    },

    /// Select a tunnel and connect to it (or disconnect it if it is up)
    Select {
        /// Tunnel name
        name: String,

        /// Return as soon as the daemon accepts the request
        #[arg(long)]
        no_wait: bool,
    },

    /// Disconnect the active tunnel, or connect the selected one
    Toggle {
        /// Return as soon as the daemon accepts the request
        #[arg(long)]
        no_wait: bool,
    },

    /// Show a tunnel's config with keys hidden
    Info {
        /// Tunnel name
        name: String,
    },

    /// Print session events as they happen
    Watch,

    /// Interactive status menu
    Menu,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cli_config = config::CliConfig::load()?;
    let client = DaemonClient::new(cli_config.daemon_config.clone())?;
    tracing::debug!(
        "Connecting to daemon via {:?}",
        cli_config.daemon_config.connection_mode
    );

    match cli.command {
        Commands::List { json } => list_tunnels(&client, json).await,
        Commands::Status { json, raw } => show_status(&client, json, raw).await,
        Commands::Select { name, no_wait } => {
            let name = parse_name(name)?;
            intent::perform(&client, !no_wait, || client.select_tunnel(&name)).await
        }
        Commands::Toggle { no_wait } => {
            intent::perform(&client, !no_wait, || client.toggle()).await
        }
        Commands::Info { name } => show_tunnel_info(&client, parse_name(name)?).await,
        Commands::Watch => watch_events(cli_config.daemon_config).await,
        Commands::Menu => menu::run(&client).await,
    }
}

fn parse_name(name: String) -> Result<TunnelName> {
    TunnelName::new(name).context("Invalid tunnel name")
}

async fn list_tunnels(client: &DaemonClient, json: bool) -> Result<()> {
    let tunnels = client.tunnels().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tunnels)?);
        return Ok(());
    }

    if tunnels.is_empty() {
        println!("{}", "No tunnel configs found.".yellow());
        println!(
            "Put WireGuard configs ({}) in the daemon's tunnels directory.",
            "<name>.conf".cyan()
        );
        return Ok(());
    }

    print_tunnels_table(&tunnels);
    Ok(())
}

fn print_tunnels_table(tunnels: &[TunnelSummary]) {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Name")
            .add_attribute(Attribute::Bold)
            .fg(Color::Cyan),
        Cell::new("State")
            .add_attribute(Attribute::Bold)
            .fg(Color::Cyan),
        Cell::new("Selected")
            .add_attribute(Attribute::Bold)
            .fg(Color::Cyan),
    ]);

    for tunnel in tunnels {
        let state = if tunnel.active {
            Cell::new("✓ connected").fg(Color::Green)
        } else {
            Cell::new("inactive").fg(Color::DarkGrey)
        };
        let selected = if tunnel.selected { "yes" } else { "" };

        table.add_row(vec![
            Cell::new(tunnel.name.as_str()),
            state,
            Cell::new(selected),
        ]);
    }

    println!();
    println!("{}", table);
    println!();
    println!("{} tunnel(s) found", tunnels.len().to_string().cyan());
    println!();
}

async fn show_status(client: &DaemonClient, json: bool, raw: bool) -> Result<()> {
    let snapshot = client.session().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    if raw {
        print!("{}", snapshot.last_poll_raw);
        return Ok(());
    }

    print_status(&snapshot);
    Ok(())
}

fn colored_status(view: &SessionViewModel) -> ColoredString {
    let line = view.status_line();
    match view.indicator {
        StatusIndicator::Connected => line.green().bold(),
        StatusIndicator::Transitional => line.cyan().bold(),
        StatusIndicator::Stalled => line.red().bold(),
        StatusIndicator::Disconnected => line.bold(),
    }
}

fn describe_pending(pending: &PendingTransition) -> String {
    match pending {
        PendingTransition::Start { target } => format!("start {}", target),
        PendingTransition::Stop { target } => format!("stop {}", target),
        PendingTransition::Switch { from, to } => format!("switch {} → {}", from, to),
    }
}

fn print_status(snapshot: &SessionSnapshot) {
    let view = SessionViewModel::from_snapshot(snapshot);

    println!();
    println!("{}", colored_status(&view));

    let active = match (&view.active_label, &snapshot.active_interface) {
        (Some(label), Some(interface)) => format!("{} ({})", label, interface),
        (Some(label), None) => label.clone(),
        (None, _) => "none".to_string(),
    };
    println!("  Active:   {}", active.cyan());
    println!(
        "  Selected: {}",
        view.selected_label.as_deref().unwrap_or("none")
    );

    if let Some(pending) = &snapshot.pending {
        println!("  Pending:  {}", describe_pending(pending));
    }
    if snapshot.stalled {
        println!(
            "  {}",
            format!(
                "Unconfirmed after {} polls; the next select or toggle abandons it",
                snapshot.stall_polls
            )
            .red()
        );
    }
    if snapshot.consecutive_poll_failures > 0 {
        println!(
            "  {}",
            format!(
                "`wg show` failed {} time(s) in a row",
                snapshot.consecutive_poll_failures
            )
            .yellow()
        );
    }
    if let Some(at) = snapshot.last_poll_at {
        println!(
            "  Last poll: {}",
            at.with_timezone(&chrono::Local)
                .format("%H:%M:%S")
                .to_string()
                .dimmed()
        );
    }

    println!();
    let toggle = if view.toggle_enabled {
        view.toggle_label.normal()
    } else {
        view.toggle_label.dimmed()
    };
    println!("  Toggle:   {}", toggle);
    println!();
}

async fn show_tunnel_info(client: &DaemonClient, name: TunnelName) -> Result<()> {
    let details = client.tunnel_details(&name).await?;
    let config = &details.config;

    println!();
    let marker = if details.active {
        "connected".green().bold()
    } else {
        "inactive".dimmed()
    };
    println!(
        "{} [{}]",
        format!("Tunnel: {}", config.name).bold().green(),
        marker
    );
    if details.selected {
        println!("  {}", "selected".cyan());
    }

    if !config.addresses.is_empty() {
        println!("  Address: {}", config.addresses.join(", "));
    }
    if !config.dns.is_empty() {
        println!("  DNS:     {}", config.dns.join(", "));
    }

    for peer in &config.peers {
        println!();
        println!("{}", "  Peer:".bold());
        println!("    Public key:  {}", peer.public_key);
        if let Some(endpoint) = &peer.endpoint {
            println!("    Endpoint:    {}", endpoint);
        }
        if !peer.allowed_ips.is_empty() {
            println!("    Allowed IPs: {}", peer.allowed_ips.join(", "));
        }
    }

    println!();
    println!("{}", "─".repeat(60).dimmed());
    print!("{}", config.redacted);
    println!("{}", "─".repeat(60).dimmed());
    Ok(())
}

/// Line printed for an event in watch mode, `None` for keep-alives
fn describe_event(event: &SessionEvent) -> Option<ColoredString> {
    let line = match event {
        SessionEvent::StateChanged { snapshot } => {
            let view = SessionViewModel::from_snapshot(snapshot);
            let line = match &view.active_label {
                Some(active) => format!("{} - {}", view.status_line(), active),
                None => view.status_line(),
            };
            match view.indicator {
                StatusIndicator::Connected => line.green(),
                StatusIndicator::Transitional => line.cyan(),
                StatusIndicator::Stalled => line.red(),
                StatusIndicator::Disconnected => line.normal(),
            }
        }
        SessionEvent::IntentIgnored { reason } => format!("Request ignored: {}", reason).yellow(),
        SessionEvent::TransitionStalled { phase, polls } => {
            format!("Stalled while {} ({} polls)", phase, polls).red()
        }
        SessionEvent::DispatchFailed {
            command,
            diagnostic,
        } => format!("`{}` failed: {}", command, diagnostic).red(),
        SessionEvent::PollFailed {
            diagnostic,
            consecutive,
        } => format!("`wg show` failed ({} in a row): {}", consecutive, diagnostic).yellow(),
        SessionEvent::Heartbeat { .. } => return None,
    };
    Some(line)
}

async fn watch_events(daemon_config: config::DaemonClientConfig) -> Result<()> {
    let mut events = EventListener::new(daemon_config).listen()?;

    println!(
        "{}",
        "Watching session events. Press Ctrl+C to stop.".dimmed()
    );

    while let Some(event) = events.recv().await {
        if let Some(line) = describe_event(&event) {
            let now = chrono::Local::now().format("%H:%M:%S").to_string();
            println!("{} {}", now.dimmed(), line);
        }
    }

    Ok(())
}
