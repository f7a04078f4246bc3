// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 WireGuard Tunnel Manager Contributors

// Address helpers for the daemon listener and client URLs

use std::net::IpAddr;

/// Check if a host is a loopback address or `localhost`
pub fn is_loopback_address(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }

    // Anything unparseable counts as non-loopback
    host.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
}

/// Join host and port, bracketing IPv6 literals
pub fn format_host_port(host: &str, port: u16) -> String {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => format!("[{}]:{}", host, port),
        _ => format!("{}:{}", host, port),
    }
}
