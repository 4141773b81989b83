//! Text-file loaders for the routing table and the static ARP table.
//!
//! Routing table lines are `<prefix> <next_hop> <mask> <interface>` with
//! dotted-quad addresses; ARP table lines are `<ip> <XX:XX:XX:XX:XX:XX>`.
//! Blank lines are skipped.

use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

use thiserror::Error;

use crate::dataplane::route::RouteEntry;

/// Errors raised while loading router configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("{path}:{line}: {reason}")]
    Parse {
        path: String,
        line: usize,
        reason: String,
    },
}

/// Load a routing table file into route entries, in file order.
pub fn load_route_table(path: &Path) -> Result<Vec<RouteEntry>, ConfigError> {
    let contents = read(path)?;
    let mut entries = Vec::new();

    for (lineno, line) in numbered_lines(&contents) {
        let mut fields = line.split_whitespace();
        let entry = (|| {
            let prefix: Ipv4Addr = fields.next()?.parse().ok()?;
            let next_hop: Ipv4Addr = fields.next()?.parse().ok()?;
            let mask: Ipv4Addr = fields.next()?.parse().ok()?;
            let iface: u32 = fields.next()?.parse().ok()?;
            if fields.next().is_some() {
                return None;
            }
            Some(RouteEntry {
                prefix,
                mask,
                next_hop,
                iface,
            })
        })()
        .ok_or_else(|| parse_error(path, lineno, "expected `<prefix> <next_hop> <mask> <iface>`"))?;

        entries.push(entry);
    }

    Ok(entries)
}

/// Load a static ARP table file into `(ip, mac)` pairs.
pub fn load_arp_table(path: &Path) -> Result<Vec<(Ipv4Addr, [u8; 6])>, ConfigError> {
    let contents = read(path)?;
    let mut entries = Vec::new();

    for (lineno, line) in numbered_lines(&contents) {
        let mut fields = line.split_whitespace();
        let entry = (|| {
            let ip: Ipv4Addr = fields.next()?.parse().ok()?;
            let mac = parse_mac(fields.next()?)?;
            if fields.next().is_some() {
                return None;
            }
            Some((ip, mac))
        })()
        .ok_or_else(|| parse_error(path, lineno, "expected `<ip> <XX:XX:XX:XX:XX:XX>`"))?;

        entries.push(entry);
    }

    Ok(entries)
}

/// Parse a `XX:XX:XX:XX:XX:XX` hardware address.
pub fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = s.split(':');
    for byte in &mut mac {
        let part = parts.next()?;
        if part.len() != 2 {
            return None;
        }
        *byte = u8::from_str_radix(part, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(mac)
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })
}

fn numbered_lines(contents: &str) -> impl Iterator<Item = (usize, &str)> {
    contents
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line))
        .filter(|(_, line)| !line.trim().is_empty())
}

fn parse_error(path: &Path, line: usize, reason: &str) -> ConfigError {
    ConfigError::Parse {
        path: path.display().to_string(),
        line,
        reason: reason.to_string(),
    }
}
