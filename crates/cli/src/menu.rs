// Interactive menu laid out like the status-bar menu

use anyhow::{Context, Result};
use colored::Colorize;
use dialoguer::Select;
use wg_tunnel_common::{
    tunnel_menu_items, DaemonClient, SessionViewModel, TunnelMenuItem, TunnelName,
};

use crate::intent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuEntry {
    Toggle { label: String, enabled: bool },
    Tunnel(TunnelMenuItem),
    Refresh,
    Quit,
}

impl MenuEntry {
    pub fn label(&self) -> String {
        match self {
            MenuEntry::Toggle { label, .. } => label.clone(),
            MenuEntry::Tunnel(item) => item.label(),
            MenuEntry::Refresh => "Refresh".to_string(),
            MenuEntry::Quit => "Quit".to_string(),
        }
    }
}

/// Toggle entry first, then one entry per tunnel, then Refresh and Quit
pub fn menu_entries(view: &SessionViewModel, items: &[TunnelMenuItem]) -> Vec<MenuEntry> {
    let mut entries = Vec::with_capacity(items.len() + 3);
    entries.push(MenuEntry::Toggle {
        label: view.toggle_label.clone(),
        enabled: view.toggle_enabled,
    });
    entries.extend(items.iter().cloned().map(MenuEntry::Tunnel));
    entries.push(MenuEntry::Refresh);
    entries.push(MenuEntry::Quit);
    entries
}

pub async fn run(client: &DaemonClient) -> Result<()> {
    loop {
        let snapshot = client.session().await?;
        let names: Vec<TunnelName> = client
            .tunnels()
            .await?
            .into_iter()
            .map(|tunnel| tunnel.name)
            .collect();

        let view = SessionViewModel::from_snapshot(&snapshot);
        let items = tunnel_menu_items(&names, Some(&snapshot));
        let entries = menu_entries(&view, &items);

        let prompt = view.status_line();
        let labels: Vec<String> = entries.iter().map(MenuEntry::label).collect();

        // dialoguer blocks on the terminal
        let choice = tokio::task::spawn_blocking(move || {
            Select::new()
                .with_prompt(prompt)
                .items(&labels)
                .default(0)
                .interact_opt()
        })
        .await
        .context("Menu task failed")?
        .context("Failed to read menu selection")?;

        let Some(index) = choice else {
            return Ok(());
        };

        let result = match &entries[index] {
            MenuEntry::Toggle { enabled: false, label } => {
                println!("{}", label.dimmed());
                Ok(())
            }
            MenuEntry::Toggle { enabled: true, .. } => {
                intent::perform(client, true, || client.toggle()).await
            }
            MenuEntry::Tunnel(item) => {
                intent::perform(client, true, || client.select_tunnel(&item.name)).await
            }
            MenuEntry::Refresh => client.request_poll().await,
            MenuEntry::Quit => return Ok(()),
        };

        // Keep the menu open after a failed action
        if let Err(e) = result {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wg_tunnel_common::{ActiveTunnel, Phase, SessionSnapshot, Utc};

    fn name(s: &str) -> TunnelName {
        TunnelName::new(s).unwrap()
    }

    fn connected_to(tunnel: &str) -> SessionSnapshot {
        SessionSnapshot {
            phase: Phase::Connected,
            selected_tunnel: Some(name(tunnel)),
            active_tunnel: ActiveTunnel::Resolved(name(tunnel)),
            active_interface: Some("utun4".to_string()),
            pending: None,
            stalled: false,
            stall_polls: 0,
            consecutive_poll_failures: 0,
            last_poll_raw: String::new(),
            polls: 2,
            last_poll_at: Some(Utc::now()),
            updated_at: Utc::now(),
            revision: 2,
        }
    }

    #[test]
    fn test_menu_layout() {
        let snapshot = connected_to("office");
        let view = SessionViewModel::from_snapshot(&snapshot);
        let items = tunnel_menu_items(&[name("home"), name("office")], Some(&snapshot));

        let labels: Vec<String> = menu_entries(&view, &items)
            .iter()
            .map(MenuEntry::label)
            .collect();

        assert_eq!(view.status_line(), "Status: VPN Running");
        assert_eq!(
            labels,
            vec!["Disconnect VPN", "  home", "✓ office", "Refresh", "Quit"]
        );
    }

    #[test]
    fn test_checkmark_is_case_sensitive() {
        let snapshot = connected_to("Office");
        let view = SessionViewModel::from_snapshot(&snapshot);
        let items = tunnel_menu_items(&[name("office")], Some(&snapshot));

        let entries = menu_entries(&view, &items);
        assert_eq!(entries[1].label(), "  office");
    }

    #[test]
    fn test_toggle_disabled_without_selection() {
        let mut snapshot = connected_to("office");
        snapshot.phase = Phase::Idle;
        snapshot.active_tunnel = ActiveTunnel::None;
        snapshot.active_interface = None;
        snapshot.selected_tunnel = None;
        let view = SessionViewModel::from_snapshot(&snapshot);

        assert_eq!(
            menu_entries(&view, &[])[0],
            MenuEntry::Toggle {
                label: "Select a tunnel below to start connection".to_string(),
                enabled: false,
            }
        );
    }
}
