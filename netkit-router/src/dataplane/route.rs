//! Longest-prefix-match routing table.

use std::net::Ipv4Addr;

use crate::trie::BinaryTrie;

/// A single forwarding rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub prefix: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    pub iface: u32,
}

/// Routing table over a binary trie keyed by the prefix bits.
///
/// Entries are stored by value so a lookup returns the next hop and the
/// egress interface together.
pub struct RoutingTable {
    trie: BinaryTrie<RouteEntry>,
}

impl RoutingTable {
    pub fn new() -> Self {
        RoutingTable {
            trie: BinaryTrie::new(),
        }
    }

    /// Insert a route. The prefix length is the run of leading one bits in
    /// the mask.
    pub fn add_entry(&mut self, entry: RouteEntry) {
        let prefix_len = u32::from(entry.mask).leading_ones();
        self.trie.insert(u32::from(entry.prefix), prefix_len, entry);
    }

    pub fn add_entries(&mut self, entries: impl IntoIterator<Item = RouteEntry>) {
        for entry in entries {
            self.add_entry(entry);
        }
    }

    /// Longest-prefix match for a destination address.
    pub fn lookup(&self, dest: Ipv4Addr) -> Option<&RouteEntry> {
        self.trie.longest_prefix_match(u32::from(dest))
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}
