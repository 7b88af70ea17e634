//! Machine identity: the holder label written into lock records.
//!
//! Derived once per process from the host name and a best-effort local
//! network address. It is only a label; nothing authorizes on it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, UdpSocket};

const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineIdentity(String);

impl MachineIdentity {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// `"{hostname}_{address}"`, with `unknown` for whatever cannot be found.
    pub fn detect() -> Self {
        let host = hostname().unwrap_or_else(|| UNKNOWN.to_string());
        let addr = local_address()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| UNKNOWN.to_string());
        Self::from_parts(&host, &addr)
    }

    pub fn from_parts(host: &str, addr: &str) -> Self {
        Self(format!("{host}_{addr}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

fn hostname() -> Option<String> {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .chain(std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
}

/// Address of the interface that would route outward.
///
/// `connect` on a UDP socket only selects a route; no packet is sent.
fn local_address() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}
