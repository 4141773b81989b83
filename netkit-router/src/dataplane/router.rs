//! Per-frame forwarding engine.
//!
//! Dispatches received frames by ethertype, answers ARP for the router's
//! own addresses, validates and rewrites IPv4 headers, generates ICMP
//! errors and echo replies, and parks frames whose next hop has no ARP
//! entry yet.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use smoltcp::wire::{
    ArpOperation, ArpPacket, ArpRepr, EthernetAddress, EthernetFrame, EthernetProtocol,
    Icmpv4Message, Icmpv4Packet, IpProtocol, Ipv4Address, Ipv4Packet,
};
use tracing::{debug, error, warn};

use super::arp::{ArpTable, PendingPacket};
use super::link::{LinkInfo, LinkSet};
use super::packet::{
    build_arp_frame, checksum, DEFAULT_TTL, ARP_PKT_SIZE, ETHERNET_HDR_SIZE, ICMP_HDR_SIZE,
    IP_HDR_SIZE,
};
use super::route::{RouteEntry, RoutingTable};

/// Size of a generated ICMP error frame: ethernet + new IP header + ICMP
/// header with 8 quoted payload bytes appended to the quoted IP header.
const ICMP_ERROR_FRAME_LEN: usize = ETHERNET_HDR_SIZE + 2 * IP_HDR_SIZE + ICMP_HDR_SIZE + 8;

/// The forwarding engine, generic over the link layer.
pub struct Router<L: LinkSet> {
    links: L,
    rtable: RoutingTable,
    arp: ArpTable,
    iface_info: HashMap<u32, LinkInfo>,
}

impl<L: LinkSet> Router<L> {
    pub fn new(links: L) -> Self {
        Router {
            links,
            rtable: RoutingTable::new(),
            arp: ArpTable::new(),
            iface_info: HashMap::new(),
        }
    }

    pub fn add_route(&mut self, entry: RouteEntry) {
        self.rtable.add_entry(entry);
    }

    pub fn add_routes(&mut self, entries: impl IntoIterator<Item = RouteEntry>) {
        self.rtable.add_entries(entries);
    }

    /// Seed a static ARP entry.
    pub fn add_arp_entry(&mut self, ip: Ipv4Addr, mac: [u8; 6]) {
        self.arp.add_entry(ip, mac);
    }

    pub fn links(&self) -> &L {
        &self.links
    }

    pub fn links_mut(&mut self) -> &mut L {
        &mut self.links
    }

    /// Process one received frame.
    pub fn handle_frame(&mut self, frame: &mut [u8], iface: u32) {
        if frame.len() < ETHERNET_HDR_SIZE {
            error!(len = frame.len(), "frame too short for an ethernet header");
            return;
        }

        let ethertype = EthernetFrame::new_unchecked(&frame[..]).ethertype();
        match ethertype {
            EthernetProtocol::Arp => self.handle_arp(frame, iface),
            EthernetProtocol::Ipv4 => self.handle_ipv4(frame, iface),
            other => debug!(ethertype = ?other, "dropping frame with unhandled ethertype"),
        }
    }

    fn handle_arp(&mut self, frame: &[u8], iface: u32) {
        if frame.len() < ETHERNET_HDR_SIZE + ARP_PKT_SIZE {
            error!(len = frame.len(), "frame too short for an ARP packet");
            return;
        }

        let packet = ArpPacket::new_unchecked(&frame[ETHERNET_HDR_SIZE..]);
        let repr = match ArpRepr::parse(&packet) {
            Ok(repr) => repr,
            Err(e) => {
                debug!(error = ?e, "undecodable ARP packet");
                return;
            }
        };

        let ArpRepr::EthernetIpv4 {
            operation,
            source_hardware_addr,
            source_protocol_addr,
            target_protocol_addr,
            ..
        } = repr
        else {
            return;
        };

        match operation {
            ArpOperation::Request => {
                let Some(local) = self.interface_info(iface) else {
                    return;
                };
                if Ipv4Addr::from(target_protocol_addr.0) != local.ip {
                    debug!(target = %target_protocol_addr, "ARP request not for this router");
                    return;
                }

                debug!(requester = %source_protocol_addr, iface, "answering ARP request");
                let reply = build_arp_frame(
                    ArpOperation::Reply,
                    local.ip,
                    local.mac,
                    Ipv4Addr::from(source_protocol_addr.0),
                    Some(source_hardware_addr.0),
                );
                self.transmit(iface, &reply);
            }
            ArpOperation::Reply => {
                let sender_ip = Ipv4Addr::from(source_protocol_addr.0);
                self.arp.add_entry(sender_ip, source_hardware_addr.0);
                debug!(ip = %sender_ip, mac = %source_hardware_addr, "ARP entry stored");

                let Some(pending) = self.arp.drain_pending(sender_ip) else {
                    return;
                };
                debug!(ip = %sender_ip, count = pending.len(), "releasing pending frames");
                for mut packet in pending {
                    self.send_frame(
                        &mut packet.frame,
                        packet.iface,
                        sender_ip,
                        EthernetProtocol::Ipv4,
                    );
                }
            }
            other => debug!(opcode = ?other, "dropping ARP packet with unknown opcode"),
        }
    }

    fn handle_ipv4(&mut self, frame: &mut [u8], iface: u32) {
        if frame.len() < ETHERNET_HDR_SIZE + IP_HDR_SIZE {
            error!(len = frame.len(), "frame too short for an IPv4 header");
            return;
        }

        let ip = Ipv4Packet::new_unchecked(&frame[ETHERNET_HDR_SIZE..]);
        let dest = Ipv4Addr::from(ip.dst_addr().0);
        let ttl = ip.hop_limit();

        let Some(local) = self.interface_info(iface) else {
            return;
        };
        let for_us = dest == local.ip;

        if ttl <= 1 && !for_us {
            debug!(dest = %dest, "TTL expired");
            self.send_icmp_error(frame, iface, Icmpv4Message::TimeExceeded, 0);
            return;
        }

        // The stored header sums to zero when the checksum is intact.
        if checksum(&frame[ETHERNET_HDR_SIZE..ETHERNET_HDR_SIZE + IP_HDR_SIZE]) != 0 {
            error!(dest = %dest, "IPv4 header checksum mismatch, dropping");
            return;
        }

        if for_us {
            self.handle_local(frame, iface);
            return;
        }

        {
            let mut ip = Ipv4Packet::new_unchecked(&mut frame[ETHERNET_HDR_SIZE..]);
            ip.set_hop_limit(ttl - 1);
        }
        store_ip_checksum(&mut frame[ETHERNET_HDR_SIZE..]);

        let (next_hop, egress) = match self.rtable.lookup(dest) {
            Some(route) => (route.next_hop, route.iface),
            None => {
                debug!(dest = %dest, "no matching route");
                self.send_icmp_error(frame, iface, Icmpv4Message::DstUnreachable, 0);
                return;
            }
        };

        debug!(dest = %dest, next_hop = %next_hop, egress, "forwarding");
        self.send_frame(frame, egress, next_hop, EthernetProtocol::Ipv4);
    }

    fn handle_local(&mut self, frame: &mut [u8], iface: u32) {
        let proto = Ipv4Packet::new_unchecked(&frame[ETHERNET_HDR_SIZE..]).next_header();
        match proto {
            IpProtocol::Icmp => self.handle_icmp(frame, iface),
            other => warn!(proto = ?other, "dropping local delivery for unhandled protocol"),
        }
    }

    fn handle_icmp(&mut self, frame: &mut [u8], iface: u32) {
        if frame.len() < ETHERNET_HDR_SIZE + IP_HDR_SIZE + ICMP_HDR_SIZE {
            error!(len = frame.len(), "frame too short for an ICMP header");
            return;
        }

        let msg_type =
            Icmpv4Packet::new_unchecked(&frame[ETHERNET_HDR_SIZE + IP_HDR_SIZE..]).msg_type();
        match msg_type {
            Icmpv4Message::EchoRequest => self.send_echo_reply(frame, iface),
            other => debug!(msg_type = ?other, "dropping unsupported ICMP type"),
        }
    }

    fn send_echo_reply(&mut self, frame: &mut [u8], iface: u32) {
        let reply_dest;
        {
            let mut ip = Ipv4Packet::new_unchecked(&mut frame[ETHERNET_HDR_SIZE..]);
            let src = ip.src_addr();
            let dst = ip.dst_addr();
            ip.set_src_addr(dst);
            ip.set_dst_addr(src);
            ip.set_hop_limit(DEFAULT_TTL);
            reply_dest = Ipv4Addr::from(src.0);
        }
        store_ip_checksum(&mut frame[ETHERNET_HDR_SIZE..]);

        {
            let mut icmp =
                Icmpv4Packet::new_unchecked(&mut frame[ETHERNET_HDR_SIZE + IP_HDR_SIZE..]);
            icmp.set_msg_type(Icmpv4Message::EchoReply);
            icmp.set_msg_code(0);
        }
        // The reply checksum covers the ICMP header and the echoed payload.
        store_icmp_checksum(&mut frame[ETHERNET_HDR_SIZE + IP_HDR_SIZE..]);

        debug!(dest = %reply_dest, "sending echo reply");
        self.send_frame(frame, iface, reply_dest, EthernetProtocol::Ipv4);
    }

    /// Emit an ICMP error quoting the offending packet's IP header and its
    /// first 8 payload bytes. The ingress frame is reused in place when it
    /// is large enough.
    fn send_icmp_error(&mut self, frame: &mut [u8], iface: u32, mtype: Icmpv4Message, code: u8) {
        debug!(msg_type = ?mtype, code, "sending ICMP error");

        let Some(local) = self.interface_info(iface) else {
            return;
        };

        let mut scratch = Vec::new();
        let icmp_frame: &mut [u8] = if frame.len() < ICMP_ERROR_FRAME_LEN {
            scratch.resize(ICMP_ERROR_FRAME_LEN, 0);
            let quoted = usize::min(frame.len() - ETHERNET_HDR_SIZE, IP_HDR_SIZE + 8);
            scratch[ETHERNET_HDR_SIZE..ETHERNET_HDR_SIZE + quoted]
                .copy_from_slice(&frame[ETHERNET_HDR_SIZE..ETHERNET_HDR_SIZE + quoted]);
            &mut scratch
        } else {
            &mut frame[..ICMP_ERROR_FRAME_LEN]
        };

        // Quote the original header and payload head into the ICMP payload
        // area before the outer header is rewritten over it.
        icmp_frame.copy_within(
            ETHERNET_HDR_SIZE..ETHERNET_HDR_SIZE + IP_HDR_SIZE + 8,
            ETHERNET_HDR_SIZE + IP_HDR_SIZE + ICMP_HDR_SIZE,
        );

        let dest_ip;
        {
            let mut ip = Ipv4Packet::new_unchecked(&mut icmp_frame[ETHERNET_HDR_SIZE..]);
            dest_ip = Ipv4Addr::from(ip.src_addr().0);
            ip.set_dst_addr(Ipv4Address::from_bytes(&dest_ip.octets()));
            ip.set_src_addr(Ipv4Address::from_bytes(&local.ip.octets()));
            ip.set_next_header(IpProtocol::Icmp);
            ip.set_hop_limit(DEFAULT_TTL);
            ip.set_total_len((ICMP_ERROR_FRAME_LEN - ETHERNET_HDR_SIZE) as u16);
        }
        store_ip_checksum(&mut icmp_frame[ETHERNET_HDR_SIZE..]);

        {
            let mut icmp =
                Icmpv4Packet::new_unchecked(&mut icmp_frame[ETHERNET_HDR_SIZE + IP_HDR_SIZE..]);
            icmp.set_msg_type(mtype);
            icmp.set_msg_code(code);
        }
        let icmp_region = &mut icmp_frame[ETHERNET_HDR_SIZE + IP_HDR_SIZE..];
        icmp_region[4..ICMP_HDR_SIZE].fill(0);
        store_icmp_checksum(icmp_region);

        self.send_frame(icmp_frame, iface, dest_ip, EthernetProtocol::Ipv4);
    }

    /// Resolve the next hop and transmit, or broadcast an ARP request and
    /// park the frame until the reply arrives.
    fn send_frame(
        &mut self,
        frame: &mut [u8],
        iface: u32,
        dest_ip: Ipv4Addr,
        ethertype: EthernetProtocol,
    ) {
        let Some(local) = self.interface_info(iface) else {
            return;
        };

        let Some(dest_mac) = self.arp.lookup(dest_ip) else {
            debug!(dest = %dest_ip, iface, "next hop unresolved, queueing frame");
            let request =
                build_arp_frame(ArpOperation::Request, local.ip, local.mac, dest_ip, None);
            self.transmit(iface, &request);
            self.arp.enqueue_pending(
                dest_ip,
                PendingPacket {
                    iface,
                    frame: frame.to_vec(),
                },
            );
            return;
        };

        {
            let mut eth = EthernetFrame::new_unchecked(&mut frame[..]);
            eth.set_src_addr(EthernetAddress::from_bytes(&local.mac));
            eth.set_dst_addr(EthernetAddress::from_bytes(&dest_mac));
            eth.set_ethertype(ethertype);
        }
        self.transmit(iface, frame);
    }

    fn transmit(&mut self, iface: u32, frame: &[u8]) {
        if let Err(e) = self.links.send(iface, frame) {
            error!(iface, error = %e, "link transmit failed");
        }
    }

    /// Addresses of an interface, queried lazily and cached.
    fn interface_info(&mut self, iface: u32) -> Option<LinkInfo> {
        if let Some(info) = self.iface_info.get(&iface) {
            return Some(*info);
        }
        match self.links.addr(iface) {
            Ok(info) => {
                debug!(iface, ip = %info.ip, "cached interface addresses");
                self.iface_info.insert(iface, info);
                Some(info)
            }
            Err(e) => {
                error!(iface, error = %e, "failed to read interface addresses");
                None
            }
        }
    }
}

fn store_ip_checksum(ip: &mut [u8]) {
    ip[10..12].fill(0);
    let value = checksum(&ip[..IP_HDR_SIZE]);
    ip[10..12].copy_from_slice(&value.to_be_bytes());
}

/// Checksum over the whole given ICMP region (header plus payload).
fn store_icmp_checksum(icmp: &mut [u8]) {
    icmp[2..4].fill(0);
    let value = checksum(icmp);
    icmp[2..4].copy_from_slice(&value.to_be_bytes());
}
