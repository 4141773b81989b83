//! Frame constants, the internet checksum and ARP frame construction.

use std::net::Ipv4Addr;

use smoltcp::wire::{
    ArpOperation, ArpPacket, ArpRepr, EthernetAddress, EthernetFrame, EthernetProtocol,
    EthernetRepr, Ipv4Address,
};

/// Ethernet header size.
pub const ETHERNET_HDR_SIZE: usize = 14;

/// IPv4 header size (no options).
pub const IP_HDR_SIZE: usize = 20;

/// ICMP header size.
pub const ICMP_HDR_SIZE: usize = 8;

/// ARP packet size (Ethernet + IPv4).
pub const ARP_PKT_SIZE: usize = 28;

/// Maximum frame length handled by the data path.
pub const MAX_FRAME_LEN: usize = 1400;

/// TTL for packets originated by the router.
pub const DEFAULT_TTL: u8 = 64;

/// Broadcast hardware address.
pub const BROADCAST_MAC: [u8; 6] = [0xff; 6];

/// RFC 1071 ones-complement checksum over `data`, as used by the IPv4 and
/// ICMP headers. A trailing odd byte is padded with zero.
///
/// A header whose checksum field holds the value returned for the
/// zero-field header sums to zero.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum = 0u32;

    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = words.remainder() {
        sum += u32::from(u16::from_be_bytes([*last, 0]));
    }

    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

/// Build a complete ARP frame.
///
/// When `dest_mac` is `None` the frame is a broadcast: the ethernet
/// destination is all-ones and the target hardware address is zeroed.
pub fn build_arp_frame(
    operation: ArpOperation,
    source_ip: Ipv4Addr,
    source_mac: [u8; 6],
    dest_ip: Ipv4Addr,
    dest_mac: Option<[u8; 6]>,
) -> [u8; ETHERNET_HDR_SIZE + ARP_PKT_SIZE] {
    let arp = ArpRepr::EthernetIpv4 {
        operation,
        source_hardware_addr: EthernetAddress::from_bytes(&source_mac),
        source_protocol_addr: Ipv4Address::from_bytes(&source_ip.octets()),
        target_hardware_addr: EthernetAddress::from_bytes(&dest_mac.unwrap_or([0; 6])),
        target_protocol_addr: Ipv4Address::from_bytes(&dest_ip.octets()),
    };
    let eth = EthernetRepr {
        src_addr: EthernetAddress::from_bytes(&source_mac),
        dst_addr: dest_mac
            .map(|mac| EthernetAddress::from_bytes(&mac))
            .unwrap_or(EthernetAddress::BROADCAST),
        ethertype: EthernetProtocol::Arp,
    };

    let mut buffer = [0u8; ETHERNET_HDR_SIZE + ARP_PKT_SIZE];
    let mut frame = EthernetFrame::new_unchecked(&mut buffer[..]);
    eth.emit(&mut frame);
    let mut packet = ArpPacket::new_unchecked(frame.payload_mut());
    arp.emit(&mut packet);
    buffer
}
