// Fakes shared by the controller and API tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use wg_tunnel_common::{TunnelLookup, TunnelName};

use crate::runner::{CommandOutput, CommandRunner, ToolCommand};

pub fn name(s: &str) -> TunnelName {
    TunnelName::new(s).unwrap()
}

/// Peer key the fakes use for a tunnel
pub fn peer_key(tunnel: &str) -> String {
    format!("{}PeerKey=", tunnel)
}

/// `wg show` output for one up tunnel
pub fn show_output(tunnel: &str) -> String {
    format!(
        "interface: utun4\n  public key: SW50ZXJmYWNl\n  listening port: 51820\n\n\
         peer: {}\n  endpoint: 203.0.113.7:51820\n  allowed ips: 0.0.0.0/0\n",
        peer_key(tunnel)
    )
}

/// Lookup over a fixed list of tunnels, using [`peer_key`]
pub struct StaticLookup {
    names: Vec<TunnelName>,
}

impl StaticLookup {
    pub fn new(names: &[&str]) -> Self {
        let mut names: Vec<TunnelName> = names.iter().map(|n| name(n)).collect();
        names.sort();
        Self { names }
    }
}

impl TunnelLookup for StaticLookup {
    fn list_tunnel_names(&self) -> wg_tunnel_common::Result<Vec<TunnelName>> {
        Ok(self.names.clone())
    }

    fn find_tunnel_by_peer_key(&self, key: &str) -> Option<TunnelName> {
        self.names
            .iter()
            .find(|n| peer_key(n.as_str()) == key)
            .cloned()
    }
}

#[derive(Default)]
struct FakeState {
    commands: Vec<ToolCommand>,
    show: String,
    failing: HashMap<&'static str, String>,
}

/// Runner that records every command and simulates `wg-quick`
///
/// `up` makes the tunnel visible to `wg show`, `down` clears it, unless
/// the runner is told to ignore one of them.
#[derive(Clone, Default)]
pub struct FakeRunner {
    state: Arc<Mutex<FakeState>>,
    ignore_up: Arc<Mutex<bool>>,
    ignore_down: Arc<Mutex<bool>>,
    show_delay: Arc<Mutex<Duration>>,
    shows_in_flight: Arc<AtomicUsize>,
    max_shows_in_flight: Arc<AtomicUsize>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a tunnel already up
    pub fn with_active(tunnel: &str) -> Self {
        let runner = Self::new();
        runner.set_show(show_output(tunnel));
        runner
    }

    pub fn set_show(&self, output: impl Into<String>) {
        self.state.lock().unwrap().show = output.into();
    }

    pub fn ignore_up(&self, ignore: bool) {
        *self.ignore_up.lock().unwrap() = ignore;
    }

    pub fn ignore_down(&self, ignore: bool) {
        *self.ignore_down.lock().unwrap() = ignore;
    }

    /// Make every `wg show` take this long
    pub fn set_show_delay(&self, delay: Duration) {
        *self.show_delay.lock().unwrap() = delay;
    }

    /// Most `wg show` runs ever in flight at once
    pub fn max_concurrent_shows(&self) -> usize {
        self.max_shows_in_flight.load(Ordering::SeqCst)
    }

    /// Make a command kind ("show", "up", "down", "dns") fail with a diagnostic
    pub fn fail(&self, kind: &'static str, diagnostic: &str) {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert(kind, diagnostic.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failing.clear();
    }

    pub fn commands(&self) -> Vec<ToolCommand> {
        self.state.lock().unwrap().commands.clone()
    }

    /// Recorded commands other than `wg show`
    pub fn dispatched(&self) -> Vec<ToolCommand> {
        self.commands()
            .into_iter()
            .filter(|c| *c != ToolCommand::Show)
            .collect()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, command: &ToolCommand) -> CommandOutput {
        if *command == ToolCommand::Show {
            let in_flight = self.shows_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_shows_in_flight.fetch_max(in_flight, Ordering::SeqCst);
            let delay = *self.show_delay.lock().unwrap();
            tokio::time::sleep(delay).await;
            self.shows_in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        // Let other tasks interleave like a real process would
        tokio::time::sleep(Duration::from_millis(5)).await;

        let ignore_up = *self.ignore_up.lock().unwrap();
        let ignore_down = *self.ignore_down.lock().unwrap();
        let mut state = self.state.lock().unwrap();
        state.commands.push(command.clone());

        let kind = match command {
            ToolCommand::Show => "show",
            ToolCommand::Up(_) => "up",
            ToolCommand::Down(_) => "down",
            ToolCommand::ResetDns(_) => "dns",
        };
        if let Some(diagnostic) = state.failing.get(kind) {
            return CommandOutput::failure(diagnostic.clone());
        }

        match command {
            ToolCommand::Show => CommandOutput::success(state.show.clone()),
            ToolCommand::Up(name) => {
                if !ignore_up {
                    state.show = show_output(name.as_str());
                }
                CommandOutput::success("")
            }
            ToolCommand::Down(_) => {
                if !ignore_down {
                    state.show.clear();
                }
                CommandOutput::success("")
            }
            ToolCommand::ResetDns(_) => CommandOutput::success(""),
        }
    }
}
