//! ARP table with per-address queues of frames awaiting resolution.

use std::collections::HashMap;
use std::net::Ipv4Addr;

/// A frame parked until its next hop resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPacket {
    /// Egress interface recorded at queue time.
    pub iface: u32,
    /// Complete ethernet frame; the MAC fields are rewritten on release.
    pub frame: Vec<u8>,
}

/// IPv4 → hardware address mapping plus the pending-frame queues.
#[derive(Default)]
pub struct ArpTable {
    entries: HashMap<Ipv4Addr, [u8; 6]>,
    pending: HashMap<Ipv4Addr, Vec<PendingPacket>>,
}

impl ArpTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a resolution. An existing entry for the address is kept.
    pub fn add_entry(&mut self, ip: Ipv4Addr, mac: [u8; 6]) {
        self.entries.entry(ip).or_insert(mac);
    }

    pub fn lookup(&self, ip: Ipv4Addr) -> Option<[u8; 6]> {
        self.entries.get(&ip).copied()
    }

    /// Park a frame until `ip` resolves. Queues are created on demand and
    /// keep arrival order.
    pub fn enqueue_pending(&mut self, ip: Ipv4Addr, packet: PendingPacket) {
        self.pending.entry(ip).or_default().push(packet);
    }

    /// Remove and return the whole pending queue for `ip`, if any.
    pub fn drain_pending(&mut self, ip: Ipv4Addr) -> Option<Vec<PendingPacket>> {
        self.pending.remove(&ip)
    }
}
