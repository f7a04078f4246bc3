// Common types for WireGuard Tunnel Manager

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name of a tunnel configuration (the config file's base name, without `.conf`)
///
/// Comparisons are exact and case-sensitive. Names end up as arguments to
/// `wg-quick` and as file names, so path separators, whitespace and a
/// leading `-` are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TunnelName(String);

impl TunnelName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();

        if name.is_empty() {
            return Err(Error::InvalidTunnelName("name is empty".to_string()));
        }
        if name.starts_with('-') {
            return Err(Error::InvalidTunnelName(format!(
                "'{}' must not start with '-'",
                name
            )));
        }
        if name
            .chars()
            .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_whitespace())
        {
            return Err(Error::InvalidTunnelName(format!(
                "'{}' contains a path separator or whitespace",
                name
            )));
        }
        if name == "." || name == ".." {
            return Err(Error::InvalidTunnelName(format!("'{}' is reserved", name)));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TunnelName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<TunnelName> for String {
    fn from(name: TunnelName) -> Self {
        name.0
    }
}

impl FromStr for TunnelName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for TunnelName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TunnelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coarse connection phase of the session
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

impl Phase {
    /// Check if the phase is a transition waiting to be confirmed by a poll
    pub fn is_transient(&self) -> bool {
        matches!(self, Phase::Connecting | Phase::Disconnecting)
    }

    pub fn is_settled(&self) -> bool {
        !self.is_transient()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Idle => "idle",
            Phase::Connecting => "connecting",
            Phase::Connected => "connected",
            Phase::Disconnecting => "disconnecting",
        };
        f.write_str(label)
    }
}

/// The tunnel the external tool reports as up
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum ActiveTunnel {
    /// No interface is up
    #[default]
    None,
    /// An interface is up and its peer key matched a tunnel config
    Resolved(TunnelName),
    /// An interface is up but no tunnel config matched its peer key
    Unresolved,
}

impl ActiveTunnel {
    pub fn is_none(&self) -> bool {
        matches!(self, ActiveTunnel::None)
    }

    pub fn is_some(&self) -> bool {
        !self.is_none()
    }

    pub fn name(&self) -> Option<&TunnelName> {
        match self {
            ActiveTunnel::Resolved(name) => Some(name),
            _ => None,
        }
    }

    /// Exact, case-sensitive match against a resolved tunnel name
    pub fn is_named(&self, name: &TunnelName) -> bool {
        self.name() == Some(name)
    }
}

impl fmt::Display for ActiveTunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActiveTunnel::None => f.write_str("none"),
            ActiveTunnel::Resolved(name) => write!(f, "{}", name),
            ActiveTunnel::Unresolved => f.write_str("<unresolved>"),
        }
    }
}

/// What a stop command is aimed at
///
/// An unresolved active tunnel can still be taken down by the interface
/// name `wg show` reported for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum StopTarget {
    Tunnel(TunnelName),
    Interface(String),
}

impl StopTarget {
    /// Argument handed to `wg-quick down`
    pub fn as_arg(&self) -> &str {
        match self {
            StopTarget::Tunnel(name) => name.as_str(),
            StopTarget::Interface(interface) => interface,
        }
    }
}

impl fmt::Display for StopTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopTarget::Tunnel(name) => write!(f, "{}", name),
            StopTarget::Interface(interface) => write!(f, "interface {}", interface),
        }
    }
}

/// Result of one poll cycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollResult {
    pub has_active_interface: bool,
    /// First interface name reported by `wg show`, if any
    pub interface: Option<String>,
    pub active_tunnel: ActiveTunnel,
    pub raw: String,
    /// Set when the status command failed; the sample carries no information
    pub diagnostic: Option<String>,
}

impl PollResult {
    pub fn inactive(raw: impl Into<String>) -> Self {
        Self {
            has_active_interface: false,
            interface: None,
            active_tunnel: ActiveTunnel::None,
            raw: raw.into(),
            diagnostic: None,
        }
    }

    pub fn active(
        interface: Option<String>,
        active_tunnel: ActiveTunnel,
        raw: impl Into<String>,
    ) -> Self {
        // An up interface is never reported as "no tunnel"
        let active_tunnel = match active_tunnel {
            ActiveTunnel::None => ActiveTunnel::Unresolved,
            other => other,
        };

        Self {
            has_active_interface: true,
            interface,
            active_tunnel,
            raw: raw.into(),
            diagnostic: None,
        }
    }

    pub fn failed(diagnostic: impl Into<String>) -> Self {
        Self {
            diagnostic: Some(diagnostic.into()),
            ..Self::inactive(String::new())
        }
    }

    pub fn is_failure(&self) -> bool {
        self.diagnostic.is_some()
    }
}

/// Transition currently waiting to be confirmed by a poll
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingTransition {
    Start { target: TunnelName },
    Stop { target: StopTarget },
    /// Stop of `from` followed by start of `to`; becomes `Start` once the
    /// old tunnel is observed gone
    Switch { from: StopTarget, to: TunnelName },
}

/// Read-only view of the session published to UI surfaces
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub selected_tunnel: Option<TunnelName>,
    pub active_tunnel: ActiveTunnel,
    pub active_interface: Option<String>,
    pub pending: Option<PendingTransition>,
    /// The pending transition has gone unconfirmed for too many polls
    pub stalled: bool,
    /// Consecutive polls that did not confirm the pending transition
    pub stall_polls: u32,
    pub consecutive_poll_failures: u32,
    pub last_poll_raw: String,
    /// Number of polls folded since startup
    pub polls: u64,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Increments on every change to the session state
    pub revision: u64,
}

impl SessionSnapshot {
    /// Check if no transition is outstanding
    pub fn is_settled(&self) -> bool {
        self.pending.is_none() && self.phase.is_settled()
    }

    /// Check if the tunnel with this exact name is the one reported up
    pub fn is_active(&self, name: &TunnelName) -> bool {
        self.active_tunnel.is_named(name)
    }

    pub fn is_selected(&self, name: &TunnelName) -> bool {
        self.selected_tunnel.as_ref() == Some(name)
    }
}

/// Why an intent was not acted upon
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// Another transition is still outstanding
    TransitionInFlight,
    /// Toggle with no active tunnel and nothing selected
    NothingSelected,
    /// The active tunnel has neither a name nor an interface to stop
    NoStopTarget,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            IgnoreReason::TransitionInFlight => "another transition is still in progress",
            IgnoreReason::NothingSelected => "no tunnel is selected",
            IgnoreReason::NoStopTarget => "the active tunnel cannot be identified",
        };
        f.write_str(message)
    }
}

/// What the controller did with a user intent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IntentOutcome {
    Starting { tunnel: TunnelName },
    Stopping { target: StopTarget },
    Switching { from: StopTarget, to: TunnelName },
    Ignored { reason: IgnoreReason },
}

impl IntentOutcome {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, IntentOutcome::Ignored { .. })
    }
}

/// Response body for intent endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResponse {
    pub outcome: IntentOutcome,
    /// Session revision right after the intent was applied
    pub revision: u64,
}

/// Events emitted by the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Session state changed (also sent once when a stream opens)
    StateChanged { snapshot: SessionSnapshot },

    /// An intent was rejected
    IntentIgnored { reason: IgnoreReason },

    /// A transition crossed the stall threshold
    TransitionStalled { phase: Phase, polls: u32 },

    /// A start/stop command reported failure
    DispatchFailed { command: String, diagnostic: String },

    /// The status command failed
    PollFailed { diagnostic: String, consecutive: u32 },

    /// Keep-alive for idle streams
    Heartbeat { timestamp: DateTime<Utc> },
}

/// Tunnel entry for list endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TunnelSummary {
    pub name: TunnelName,
    pub selected: bool,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelsListResponse {
    pub tunnels: Vec<TunnelSummary>,
}

/// Error body returned by the daemon API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tunnel_name_validation() {
        assert!(TunnelName::new("office").is_ok());
        assert!(TunnelName::new("wg0").is_ok());
        assert!(TunnelName::new("home-vpn_2.backup").is_ok());

        assert!(TunnelName::new("").is_err());
        assert!(TunnelName::new("-up").is_err());
        assert!(TunnelName::new("../etc/passwd").is_err());
        assert!(TunnelName::new("two words").is_err());
        assert!(TunnelName::new("..").is_err());
    }

    #[test]
    fn test_tunnel_name_is_case_sensitive() {
        let lower = TunnelName::new("office").unwrap();
        let upper = TunnelName::new("Office").unwrap();
        assert_ne!(lower, upper);

        let active = ActiveTunnel::Resolved(lower.clone());
        assert!(active.is_named(&lower));
        assert!(!active.is_named(&upper));
    }

    #[test]
    fn test_tunnel_name_rejected_on_deserialize() {
        let ok: TunnelName = serde_json::from_str("\"home\"").unwrap();
        assert_eq!(ok.as_str(), "home");
        assert!(serde_json::from_str::<TunnelName>("\"\"").is_err());
    }

    #[test]
    fn test_active_poll_never_reports_none() {
        let result = PollResult::active(Some("utun3".into()), ActiveTunnel::None, "");
        assert!(result.has_active_interface);
        assert_eq!(result.active_tunnel, ActiveTunnel::Unresolved);
    }

    #[test]
    fn test_active_tunnel_display() {
        assert_eq!(ActiveTunnel::None.to_string(), "none");
        assert_eq!(ActiveTunnel::Unresolved.to_string(), "<unresolved>");
        assert_eq!(
            ActiveTunnel::Resolved(TunnelName::new("wg0").unwrap()).to_string(),
            "wg0"
        );
    }

    #[test]
    fn test_event_wire_format() {
        let event = SessionEvent::IntentIgnored {
            reason: IgnoreReason::TransitionInFlight,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"intent_ignored\""));
        assert!(json.contains("\"reason\":\"transition_in_flight\""));
    }
}
