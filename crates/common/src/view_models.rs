// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 WireGuard Tunnel Manager Contributors

//! View models - Session state prepared for menu and terminal display

use crate::types::{Phase, SessionSnapshot, TunnelName};

pub const STATUS_CHECKING: &str = "Checking...";
pub const STATUS_RUNNING: &str = "VPN Running";
pub const STATUS_STOPPED: &str = "VPN Stopped";
pub const LABEL_CONNECTING: &str = "Connecting...";
pub const LABEL_DISCONNECTING: &str = "Disconnecting...";
pub const TOGGLE_DISCONNECT: &str = "Disconnect VPN";
pub const TOGGLE_CONNECT_SELECTED: &str = "Connect VPN";
pub const TOGGLE_SELECT_TUNNEL: &str = "Select a tunnel below to start connection";

/// Status indicator for the menu icon or a colored terminal marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusIndicator {
    Connected,
    Transitional, // Connecting, Disconnecting
    Stalled,
    Disconnected,
}

/// Session data prepared for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionViewModel {
    pub status_text: String,
    pub indicator: StatusIndicator,
    pub toggle_label: String,
    /// The toggle entry does something when activated
    pub toggle_enabled: bool,
    pub active_label: Option<String>,
    pub selected_label: Option<String>,
}

impl SessionViewModel {
    /// Placeholder shown before the first poll has completed
    pub fn checking() -> Self {
        Self {
            status_text: STATUS_CHECKING.to_string(),
            indicator: StatusIndicator::Disconnected,
            toggle_label: TOGGLE_SELECT_TUNNEL.to_string(),
            toggle_enabled: false,
            active_label: None,
            selected_label: None,
        }
    }

    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        if snapshot.polls == 0 && snapshot.phase == Phase::Idle {
            return Self::checking();
        }

        let active_label = snapshot
            .active_tunnel
            .is_some()
            .then(|| snapshot.active_tunnel.to_string());
        let selected_label = snapshot.selected_tunnel.as_ref().map(TunnelName::to_string);

        Self {
            status_text: Self::status_text_for(snapshot),
            indicator: Self::indicator_for(snapshot),
            toggle_label: Self::toggle_label_for(snapshot).to_string(),
            toggle_enabled: Self::toggle_enabled_for(snapshot),
            active_label,
            selected_label,
        }
    }

    /// Line shown at the top of the menu
    pub fn status_line(&self) -> String {
        format!("Status: {}", self.status_text)
    }

    pub fn indicator_for(snapshot: &SessionSnapshot) -> StatusIndicator {
        if snapshot.stalled {
            return StatusIndicator::Stalled;
        }
        match snapshot.phase {
            Phase::Connected => StatusIndicator::Connected,
            Phase::Connecting | Phase::Disconnecting => StatusIndicator::Transitional,
            Phase::Idle => StatusIndicator::Disconnected,
        }
    }

    pub fn status_text_for(snapshot: &SessionSnapshot) -> String {
        let text = Self::phase_text(snapshot.phase);
        if snapshot.stalled {
            format!("Stalled: {}", text)
        } else {
            text.to_string()
        }
    }

    fn phase_text(phase: Phase) -> &'static str {
        match phase {
            Phase::Idle => STATUS_STOPPED,
            Phase::Connecting => LABEL_CONNECTING,
            Phase::Connected => STATUS_RUNNING,
            Phase::Disconnecting => LABEL_DISCONNECTING,
        }
    }

    pub fn toggle_label_for(snapshot: &SessionSnapshot) -> &'static str {
        match snapshot.phase {
            Phase::Connecting => LABEL_CONNECTING,
            Phase::Disconnecting => LABEL_DISCONNECTING,
            Phase::Connected => TOGGLE_DISCONNECT,
            Phase::Idle if snapshot.selected_tunnel.is_some() => TOGGLE_CONNECT_SELECTED,
            Phase::Idle => TOGGLE_SELECT_TUNNEL,
        }
    }

    fn toggle_enabled_for(snapshot: &SessionSnapshot) -> bool {
        if snapshot.pending.is_some() && !snapshot.stalled {
            return false;
        }
        snapshot.active_tunnel.is_some() || snapshot.selected_tunnel.is_some()
    }
}

/// One tunnel entry in the menu
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelMenuItem {
    pub name: TunnelName,
    /// The tunnel reported up by `wg show`
    pub checked: bool,
    pub selected: bool,
}

impl TunnelMenuItem {
    pub fn label(&self) -> String {
        if self.checked {
            format!("✓ {}", self.name)
        } else {
            format!("  {}", self.name)
        }
    }
}

/// Menu entries for every tunnel, marking the active one by exact name
pub fn tunnel_menu_items(
    names: &[TunnelName],
    snapshot: Option<&SessionSnapshot>,
) -> Vec<TunnelMenuItem> {
    names
        .iter()
        .map(|name| TunnelMenuItem {
            name: name.clone(),
            checked: snapshot.is_some_and(|s| s.is_active(name)),
            selected: snapshot.is_some_and(|s| s.is_selected(name)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActiveTunnel, PendingTransition};
    use chrono::Utc;

    fn name(s: &str) -> TunnelName {
        TunnelName::new(s).unwrap()
    }

    fn snapshot(phase: Phase) -> SessionSnapshot {
        SessionSnapshot {
            phase,
            selected_tunnel: None,
            active_tunnel: ActiveTunnel::None,
            active_interface: None,
            pending: None,
            stalled: false,
            stall_polls: 0,
            consecutive_poll_failures: 0,
            last_poll_raw: String::new(),
            polls: 1,
            last_poll_at: Some(Utc::now()),
            updated_at: Utc::now(),
            revision: 1,
        }
    }

    #[test]
    fn test_checking_before_first_poll() {
        let mut snap = snapshot(Phase::Idle);
        snap.polls = 0;
        let vm = SessionViewModel::from_snapshot(&snap);
        assert_eq!(vm.status_line(), "Status: Checking...");
    }

    #[test]
    fn test_connected_labels() {
        let mut snap = snapshot(Phase::Connected);
        snap.active_tunnel = ActiveTunnel::Resolved(name("office"));
        let vm = SessionViewModel::from_snapshot(&snap);

        assert_eq!(vm.status_text, "VPN Running");
        assert_eq!(vm.toggle_label, "Disconnect VPN");
        assert_eq!(vm.indicator, StatusIndicator::Connected);
        assert_eq!(vm.active_label.as_deref(), Some("office"));
        assert!(vm.toggle_enabled);
    }

    #[test]
    fn test_idle_labels() {
        let snap = snapshot(Phase::Idle);
        let vm = SessionViewModel::from_snapshot(&snap);
        assert_eq!(vm.status_text, "VPN Stopped");
        assert_eq!(vm.toggle_label, "Select a tunnel below to start connection");
        assert_eq!(vm.indicator, StatusIndicator::Disconnected);
        assert!(!vm.toggle_enabled);

        let mut snap = snapshot(Phase::Idle);
        snap.selected_tunnel = Some(name("home"));
        let vm = SessionViewModel::from_snapshot(&snap);
        assert_eq!(vm.toggle_label, "Connect VPN");
        assert!(vm.toggle_enabled);
    }

    #[test]
    fn test_transitional_labels() {
        let mut snap = snapshot(Phase::Connecting);
        snap.pending = Some(PendingTransition::Start { target: name("home") });
        let vm = SessionViewModel::from_snapshot(&snap);
        assert_eq!(vm.status_text, "Connecting...");
        assert_eq!(vm.toggle_label, "Connecting...");
        assert_eq!(vm.indicator, StatusIndicator::Transitional);
        assert!(!vm.toggle_enabled);

        snap.phase = Phase::Disconnecting;
        let vm = SessionViewModel::from_snapshot(&snap);
        assert_eq!(vm.toggle_label, "Disconnecting...");
    }

    #[test]
    fn test_stalled_labels() {
        let mut snap = snapshot(Phase::Connecting);
        snap.selected_tunnel = Some(name("home"));
        snap.pending = Some(PendingTransition::Start { target: name("home") });
        snap.stalled = true;
        let vm = SessionViewModel::from_snapshot(&snap);
        assert_eq!(vm.status_text, "Stalled: Connecting...");
        assert_eq!(vm.indicator, StatusIndicator::Stalled);
        assert!(vm.toggle_enabled);
    }

    #[test]
    fn test_menu_items_match_exact_name() {
        let names = vec![name("Office"), name("office"), name("office-backup")];
        let mut snap = snapshot(Phase::Connected);
        snap.active_tunnel = ActiveTunnel::Resolved(name("office"));
        snap.selected_tunnel = Some(name("office"));

        let items = tunnel_menu_items(&names, Some(&snap));
        let checked: Vec<&str> = items
            .iter()
            .filter(|i| i.checked)
            .map(|i| i.name.as_str())
            .collect();
        assert_eq!(checked, vec!["office"]);
        assert_eq!(items[1].label(), "✓ office");
        assert_eq!(items[2].label(), "  office-backup");
    }

    #[test]
    fn test_menu_items_without_snapshot() {
        let names = vec![name("home")];
        let items = tunnel_menu_items(&names, None);
        assert!(!items[0].checked);
        assert!(!items[0].selected);
    }
}
