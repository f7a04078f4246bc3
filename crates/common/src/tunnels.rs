// WireGuard Tunnel Manager - Tunnel Config Module
// Lists tunnel configurations and reverse-resolves peer keys to tunnel names

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::TunnelName;

const CONFIG_EXTENSION: &str = "conf";
const REDACTED: &str = "(hidden)";

/// Source of tunnel names and peer-key lookups
pub trait TunnelLookup: Send + Sync {
    /// All known tunnel names, sorted
    fn list_tunnel_names(&self) -> Result<Vec<TunnelName>>;

    /// Tunnel whose config declares a peer with this public key
    fn find_tunnel_by_peer_key(&self, key: &str) -> Option<TunnelName>;
}

/// Default directory holding `*.conf` tunnel configurations
pub fn default_tunnels_dir() -> PathBuf {
    if cfg!(target_os = "macos") {
        PathBuf::from("/usr/local/etc/wireguard")
    } else {
        PathBuf::from("/etc/wireguard")
    }
}

/// A directory of WireGuard configuration files
#[derive(Debug, Clone)]
pub struct TunnelDirectory {
    root: PathBuf,
}

impl TunnelDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the config file for a tunnel
    pub fn config_path(&self, name: &TunnelName) -> PathBuf {
        self.root.join(format!("{}.{}", name, CONFIG_EXTENSION))
    }

    pub fn contains(&self, name: &TunnelName) -> bool {
        self.config_path(name).is_file()
    }

    /// Load a tunnel config with secrets redacted
    pub fn read_tunnel_config(&self, name: &TunnelName) -> Result<TunnelConfig> {
        let path = self.config_path(name);

        if !path.is_file() {
            return Err(Error::TunnelNotFound(name.to_string()));
        }

        let contents = fs::read_to_string(&path)?;
        Ok(TunnelConfig::parse(name.clone(), &contents))
    }

    /// Config files in name order, paired with their tunnel names
    fn config_files(&self) -> Result<Vec<(TunnelName, PathBuf)>> {
        if !self.root.exists() {
            debug!("Tunnels directory does not exist: {}", self.root.display());
            return Ok(Vec::new());
        }

        if !self.root.is_dir() {
            return Err(Error::InvalidPath(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }

        let mut files = Vec::new();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();

            // Skip anything that is not a .conf file
            if !path.is_file()
                || path.extension().and_then(|s| s.to_str()) != Some(CONFIG_EXTENSION)
            {
                continue;
            }

            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            match TunnelName::new(stem) {
                Ok(name) => files.push((name, path)),
                Err(e) => warn!("Skipping config {}: {}", path.display(), e),
            }
        }

        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files)
    }
}

impl TunnelLookup for TunnelDirectory {
    fn list_tunnel_names(&self) -> Result<Vec<TunnelName>> {
        Ok(self
            .config_files()?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    fn find_tunnel_by_peer_key(&self, key: &str) -> Option<TunnelName> {
        let key = key.trim();
        if key.is_empty() {
            return None;
        }

        let files = match self.config_files() {
            Ok(files) => files,
            Err(e) => {
                warn!("Failed to list tunnel configs: {}", e);
                return None;
            }
        };

        for (name, path) in files {
            match fs::read_to_string(&path) {
                Ok(contents) => {
                    if peer_public_keys(&contents).any(|candidate| candidate == key) {
                        return Some(name);
                    }
                }
                Err(e) => warn!("Failed to read {}: {}", path.display(), e),
            }
        }

        None
    }
}

/// Peer details worth showing next to a tunnel
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerSummary {
    pub public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
}

/// Parsed tunnel config, safe to hand to a UI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TunnelConfig {
    pub name: TunnelName,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub dns: Vec<String>,
    #[serde(default)]
    pub peers: Vec<PeerSummary>,
    /// Config text with private and preshared keys replaced
    pub redacted: String,
}

impl TunnelConfig {
    pub fn parse(name: TunnelName, contents: &str) -> Self {
        let mut config = Self {
            name,
            addresses: Vec::new(),
            dns: Vec::new(),
            peers: Vec::new(),
            redacted: String::with_capacity(contents.len()),
        };

        let mut section = Section::Other;

        for line in contents.lines() {
            match parse_line(line) {
                Line::Section(s) => {
                    section = s;
                    if section == Section::Peer {
                        config.peers.push(PeerSummary::default());
                    }
                    config.redacted.push_str(line);
                }
                Line::Entry(key, value) => {
                    if is_secret_key(key) {
                        config.redacted.push_str(&format!("{} = {}", key, REDACTED));
                    } else {
                        config.redacted.push_str(line);
                    }

                    match (section, key.to_ascii_lowercase().as_str()) {
                        (Section::Interface, "address") => config.addresses.extend(split_list(value)),
                        (Section::Interface, "dns") => config.dns.extend(split_list(value)),
                        (Section::Peer, "publickey") => {
                            if let Some(peer) = config.peers.last_mut() {
                                peer.public_key = value.to_string();
                            }
                        }
                        (Section::Peer, "endpoint") => {
                            if let Some(peer) = config.peers.last_mut() {
                                peer.endpoint = Some(value.to_string());
                            }
                        }
                        (Section::Peer, "allowedips") => {
                            if let Some(peer) = config.peers.last_mut() {
                                peer.allowed_ips.extend(split_list(value));
                            }
                        }
                        _ => {}
                    }
                }
                Line::Other => config.redacted.push_str(line),
            }
            config.redacted.push('\n');
        }

        config
    }
}

/// Tunnel config plus its place in the current session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelDetails {
    pub config: TunnelConfig,
    pub active: bool,
    pub selected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Interface,
    Peer,
    Other,
}

enum Line<'a> {
    Section(Section),
    Entry(&'a str, &'a str),
    Other,
}

fn parse_line(line: &str) -> Line<'_> {
    let trimmed = line.trim();

    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        let section = match trimmed[1..trimmed.len() - 1].trim().to_ascii_lowercase().as_str() {
            "interface" => Section::Interface,
            "peer" => Section::Peer,
            _ => Section::Other,
        };
        return Line::Section(section);
    }

    if trimmed.starts_with('#') || trimmed.starts_with(';') {
        return Line::Other;
    }

    match trimmed.split_once('=') {
        Some((key, value)) => Line::Entry(key.trim(), value.trim()),
        None => Line::Other,
    }
}

fn is_secret_key(key: &str) -> bool {
    key.eq_ignore_ascii_case("PrivateKey") || key.eq_ignore_ascii_case("PresharedKey")
}

fn split_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
}

/// `PublicKey` values declared in `[Peer]` sections
fn peer_public_keys(contents: &str) -> impl Iterator<Item = &str> {
    let mut section = Section::Other;

    contents.lines().filter_map(move |line| match parse_line(line) {
        Line::Section(s) => {
            section = s;
            None
        }
        Line::Entry(key, value)
            if section == Section::Peer && key.eq_ignore_ascii_case("PublicKey") =>
        {
            Some(value)
        }
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFICE_CONF: &str = "\
[Interface]
PrivateKey = cHJpdmF0ZS1rZXktb2ZmaWNl
Address = 10.0.0.2/32, fd00::2/128
DNS = 10.0.0.1

[Peer]
PublicKey = T2ZmaWNlUGVlcktleUJhc2U2NA==
PresharedKey = cHJlc2hhcmVk
Endpoint = vpn.example.com:51820
AllowedIPs = 0.0.0.0/0, ::/0
";

    const HOME_CONF: &str = "\
[Interface]
PrivateKey = aG9tZS1wcml2YXRl
Address = 192.168.7.2/32

[Peer]
PublicKey = SG9tZVBlZXJLZXlCYXNlNjQ=
Endpoint = home.example.net:51820
AllowedIPs = 192.168.7.0/24
";

    fn fixture() -> (tempfile::TempDir, TunnelDirectory) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("office.conf"), OFFICE_CONF).unwrap();
        fs::write(dir.path().join("home.conf"), HOME_CONF).unwrap();
        fs::write(dir.path().join("notes.txt"), "not a tunnel").unwrap();
        let tunnels = TunnelDirectory::new(dir.path());
        (dir, tunnels)
    }

    #[test]
    fn test_list_tunnel_names_sorted_conf_only() {
        let (_dir, tunnels) = fixture();
        let names = tunnels.list_tunnel_names().unwrap();
        let names: Vec<&str> = names.iter().map(|n| n.as_str()).collect();
        assert_eq!(names, vec!["home", "office"]);
    }

    #[test]
    fn test_missing_directory_lists_nothing() {
        let tunnels = TunnelDirectory::new("/nonexistent/wg-tunnel-manager-test");
        assert!(tunnels.list_tunnel_names().unwrap().is_empty());
        assert!(tunnels.find_tunnel_by_peer_key("abc").is_none());
    }

    #[test]
    fn test_find_tunnel_by_peer_key() {
        let (_dir, tunnels) = fixture();

        let found = tunnels.find_tunnel_by_peer_key("SG9tZVBlZXJLZXlCYXNlNjQ=");
        assert_eq!(found.unwrap().as_str(), "home");

        let found = tunnels.find_tunnel_by_peer_key("T2ZmaWNlUGVlcktleUJhc2U2NA==");
        assert_eq!(found.unwrap().as_str(), "office");

        assert!(tunnels.find_tunnel_by_peer_key("unknown-key").is_none());
        assert!(tunnels.find_tunnel_by_peer_key("").is_none());
    }

    #[test]
    fn test_interface_keys_do_not_match_peers() {
        let (_dir, tunnels) = fixture();
        // The office private key appears in the file but not as a peer key
        assert!(tunnels
            .find_tunnel_by_peer_key("cHJpdmF0ZS1rZXktb2ZmaWNl")
            .is_none());
    }

    #[test]
    fn test_read_tunnel_config_redacts_secrets() {
        let (_dir, tunnels) = fixture();
        let name = TunnelName::new("office").unwrap();
        let config = tunnels.read_tunnel_config(&name).unwrap();

        assert!(!config.redacted.contains("cHJpdmF0ZS1rZXktb2ZmaWNl"));
        assert!(!config.redacted.contains("cHJlc2hhcmVk"));
        assert!(config.redacted.contains("PrivateKey = (hidden)"));
        assert!(config.redacted.contains("Endpoint = vpn.example.com:51820"));

        assert_eq!(config.addresses, vec!["10.0.0.2/32", "fd00::2/128"]);
        assert_eq!(config.dns, vec!["10.0.0.1"]);
        assert_eq!(config.peers.len(), 1);
        assert_eq!(config.peers[0].public_key, "T2ZmaWNlUGVlcktleUJhc2U2NA==");
        assert_eq!(config.peers[0].allowed_ips, vec!["0.0.0.0/0", "::/0"]);
    }

    #[test]
    fn test_read_unknown_tunnel() {
        let (_dir, tunnels) = fixture();
        let name = TunnelName::new("missing").unwrap();
        assert!(matches!(
            tunnels.read_tunnel_config(&name),
            Err(Error::TunnelNotFound(_))
        ));
        assert!(!tunnels.contains(&name));
    }
}
