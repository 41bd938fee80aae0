//! Host socket table, read from `/proc/net`
//!
//! Only Linux exposes the tables; elsewhere the listing is empty and callers
//! skip writing anything.

use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SocketAddress {
    pub ip: IpAddr,
    pub port: u16,
}

/// One row of a `/proc/net/{tcp,tcp6,udp,udp6}` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Connection {
    pub family: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub status: &'static str,
    #[serde(rename = "localaddr")]
    pub local: SocketAddress,
    #[serde(rename = "remoteaddr")]
    pub remote: SocketAddress,
    pub uid: u32,
    pub inode: u64,
}

#[derive(Clone, Copy)]
struct Table {
    path: &'static str,
    family: &'static str,
    kind: &'static str,
}

const TABLES: [Table; 4] = [
    Table { path: "/proc/net/tcp", family: "AF_INET", kind: "SOCK_STREAM" },
    Table { path: "/proc/net/tcp6", family: "AF_INET6", kind: "SOCK_STREAM" },
    Table { path: "/proc/net/udp", family: "AF_INET", kind: "SOCK_DGRAM" },
    Table { path: "/proc/net/udp6", family: "AF_INET6", kind: "SOCK_DGRAM" },
];

/// Every socket the kernel reports. Unreadable tables are skipped.
#[cfg(target_os = "linux")]
pub fn list_connections() -> Vec<Connection> {
    let mut connections = Vec::new();
    for table in TABLES {
        match std::fs::read_to_string(table.path) {
            Ok(text) => connections.extend(parse_table(table, &text)),
            Err(e) => tracing::debug!("Skipping {}: {}", table.path, e),
        }
    }
    connections
}

#[cfg(not(target_os = "linux"))]
pub fn list_connections() -> Vec<Connection> {
    Vec::new()
}

fn parse_table(table: Table, text: &str) -> Vec<Connection> {
    text.lines()
        .skip(1)
        .filter_map(|line| parse_row(table, line))
        .collect()
}

// sl local_address rem_address st tx_queue:rx_queue tr:tm->when retrnsmt uid timeout inode
fn parse_row(table: Table, line: &str) -> Option<Connection> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 10 {
        return None;
    }
    let state = u8::from_str_radix(fields[3], 16).ok()?;
    Some(Connection {
        family: table.family,
        kind: table.kind,
        status: if table.kind == "SOCK_STREAM" { tcp_state(state) } else { "NONE" },
        local: parse_address(fields[1])?,
        remote: parse_address(fields[2])?,
        uid: fields[7].parse().ok()?,
        inode: fields[9].parse().ok()?,
    })
}

/// `HEXADDR:HEXPORT`, the address printed as native-endian 32-bit words
fn parse_address(value: &str) -> Option<SocketAddress> {
    let (addr, port) = value.split_once(':')?;
    let port = u16::from_str_radix(port, 16).ok()?;
    let mut bytes = Vec::with_capacity(16);
    for i in (0..addr.len()).step_by(8) {
        let word = u32::from_str_radix(addr.get(i..i + 8)?, 16).ok()?;
        bytes.extend_from_slice(&word.to_ne_bytes());
    }
    let ip = match bytes.len() {
        4 => IpAddr::V4(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3])),
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return None,
    };
    Some(SocketAddress { ip, port })
}

fn tcp_state(state: u8) -> &'static str {
    match state {
        0x01 => "ESTABLISHED",
        0x02 => "SYN_SENT",
        0x03 => "SYN_RECV",
        0x04 => "FIN_WAIT1",
        0x05 => "FIN_WAIT2",
        0x06 => "TIME_WAIT",
        0x07 => "CLOSE",
        0x08 => "CLOSE_WAIT",
        0x09 => "LAST_ACK",
        0x0A => "LISTEN",
        0x0B => "CLOSING",
        _ => "UNKNOWN",
    }
}
