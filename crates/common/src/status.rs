// WireGuard Tunnel Manager - Status Parser
// Turns `wg show` output into a PollResult

use tracing::debug;

use crate::tunnels::TunnelLookup;
use crate::types::{ActiveTunnel, PollResult};

const INTERFACE_MARKER: &str = "interface:";
const PEER_MARKER: &str = "peer:";

/// Value following `marker` on a line, ignoring leading indentation
fn marker_value<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.trim_start()
        .strip_prefix(marker)
        .map(str::trim)
        .and_then(|rest| rest.split_whitespace().next())
}

/// Name of the first interface reported
pub fn first_interface(raw: &str) -> Option<&str> {
    raw.lines().find_map(|line| marker_value(line, INTERFACE_MARKER))
}

/// Public key of the first peer reported
pub fn first_peer_key(raw: &str) -> Option<&str> {
    raw.lines().find_map(|line| marker_value(line, PEER_MARKER))
}

/// Check whether the output describes any interface at all
pub fn has_active_interface(raw: &str) -> bool {
    raw.lines().any(|line| {
        let line = line.trim_start();
        line.starts_with(INTERFACE_MARKER) || line.starts_with(PEER_MARKER)
    })
}

/// Parse the output of a successful `wg show`
///
/// The first peer's public key is resolved to a tunnel name through
/// `lookup`. An interface without a resolvable peer is reported as
/// [`ActiveTunnel::Unresolved`].
pub fn parse_status(raw: &str, lookup: &dyn TunnelLookup) -> PollResult {
    if !has_active_interface(raw) {
        return PollResult::inactive(raw);
    }

    let interface = first_interface(raw).map(str::to_string);

    let active_tunnel = match first_peer_key(raw) {
        Some(key) => match lookup.find_tunnel_by_peer_key(key) {
            Some(name) => ActiveTunnel::Resolved(name),
            None => {
                debug!("No tunnel config declares peer {}", key);
                ActiveTunnel::Unresolved
            }
        },
        None => ActiveTunnel::Unresolved,
    };

    PollResult::active(interface, active_tunnel, raw)
}
