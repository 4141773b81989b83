//! Forwarding scenarios against a recording link set.

use std::io;
use std::net::Ipv4Addr;

use smoltcp::phy::ChecksumCapabilities;
use smoltcp::wire::{
    ArpOperation, ArpPacket, ArpRepr, EthernetAddress, EthernetFrame, EthernetProtocol,
    EthernetRepr, Icmpv4Message, Icmpv4Packet, Icmpv4Repr, IpProtocol, Ipv4Address, Ipv4Packet,
    Ipv4Repr,
};

use netkit_router::dataplane::packet::{checksum, ETHERNET_HDR_SIZE, IP_HDR_SIZE};
use netkit_router::dataplane::route::RouteEntry;
use netkit_router::dataplane::{LinkInfo, LinkSet, Router};

const ROUTER_MAC_0: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x10];
const ROUTER_MAC_1: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x11];
const HOST_MAC: [u8; 6] = [0x52, 0x54, 0x00, 0x12, 0x34, 0x56];
const NEXT_HOP_MAC: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];

/// Records every transmitted frame instead of touching real interfaces.
struct MockLinks {
    infos: Vec<LinkInfo>,
    sent: Vec<(u32, Vec<u8>)>,
}

impl MockLinks {
    fn new(infos: Vec<LinkInfo>) -> Self {
        MockLinks {
            infos,
            sent: Vec::new(),
        }
    }

    fn take_sent(&mut self) -> Vec<(u32, Vec<u8>)> {
        std::mem::take(&mut self.sent)
    }
}

impl LinkSet for MockLinks {
    fn send(&mut self, iface: u32, frame: &[u8]) -> io::Result<()> {
        self.sent.push((iface, frame.to_vec()));
        Ok(())
    }

    fn addr(&mut self, iface: u32) -> io::Result<LinkInfo> {
        self.infos
            .get(iface as usize)
            .copied()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such interface"))
    }
}

fn test_router() -> Router<MockLinks> {
    let links = MockLinks::new(vec![
        LinkInfo {
            ip: Ipv4Addr::new(192, 168, 1, 1),
            mac: ROUTER_MAC_0,
        },
        LinkInfo {
            ip: Ipv4Addr::new(10, 0, 0, 254),
            mac: ROUTER_MAC_1,
        },
    ]);

    let mut router = Router::new(links);
    router.add_route(RouteEntry {
        prefix: Ipv4Addr::new(10, 0, 0, 0),
        mask: Ipv4Addr::new(255, 0, 0, 0),
        next_hop: Ipv4Addr::new(10, 0, 0, 1),
        iface: 1,
    });
    router
}

fn ipv4_frame(
    src_mac: [u8; 6],
    src: Ipv4Addr,
    dst: Ipv4Addr,
    ttl: u8,
    proto: IpProtocol,
    payload: &[u8],
) -> Vec<u8> {
    let eth_repr = EthernetRepr {
        src_addr: EthernetAddress::from_bytes(&src_mac),
        dst_addr: EthernetAddress::from_bytes(&ROUTER_MAC_0),
        ethertype: EthernetProtocol::Ipv4,
    };
    let ipv4_repr = Ipv4Repr {
        src_addr: Ipv4Address::from_bytes(&src.octets()),
        dst_addr: Ipv4Address::from_bytes(&dst.octets()),
        next_header: proto,
        payload_len: payload.len(),
        hop_limit: ttl,
    };

    let mut buffer = vec![0u8; ETHERNET_HDR_SIZE + IP_HDR_SIZE + payload.len()];
    let mut frame = EthernetFrame::new_unchecked(&mut buffer[..]);
    eth_repr.emit(&mut frame);

    let mut ipv4_packet = Ipv4Packet::new_unchecked(frame.payload_mut());
    ipv4_repr.emit(&mut ipv4_packet, &ChecksumCapabilities::default());
    ipv4_packet.payload_mut().copy_from_slice(payload);

    buffer
}

fn echo_request_frame(src: Ipv4Addr, dst: Ipv4Addr, ttl: u8, ident: u16, data: &[u8]) -> Vec<u8> {
    let icmp_repr = Icmpv4Repr::EchoRequest {
        ident,
        seq_no: 1,
        data,
    };
    let mut icmp = vec![0u8; icmp_repr.buffer_len()];
    {
        let mut icmp_packet = Icmpv4Packet::new_unchecked(&mut icmp[..]);
        icmp_repr.emit(&mut icmp_packet, &ChecksumCapabilities::default());
    }
    ipv4_frame(HOST_MAC, src, dst, ttl, IpProtocol::Icmp, &icmp)
}

fn arp_frame(
    operation: ArpOperation,
    src_mac: [u8; 6],
    src_ip: Ipv4Addr,
    dst_mac: [u8; 6],
    dst_ip: Ipv4Addr,
) -> Vec<u8> {
    let arp_repr = ArpRepr::EthernetIpv4 {
        operation,
        source_hardware_addr: EthernetAddress::from_bytes(&src_mac),
        source_protocol_addr: Ipv4Address::from_bytes(&src_ip.octets()),
        target_hardware_addr: EthernetAddress::from_bytes(&dst_mac),
        target_protocol_addr: Ipv4Address::from_bytes(&dst_ip.octets()),
    };
    let eth_repr = EthernetRepr {
        src_addr: EthernetAddress::from_bytes(&src_mac),
        dst_addr: EthernetAddress::BROADCAST,
        ethertype: EthernetProtocol::Arp,
    };

    let mut buffer = vec![0u8; eth_repr.buffer_len() + arp_repr.buffer_len()];
    let mut frame = EthernetFrame::new_unchecked(&mut buffer[..]);
    eth_repr.emit(&mut frame);
    let mut packet = ArpPacket::new_unchecked(frame.payload_mut());
    arp_repr.emit(&mut packet);
    buffer
}

fn parse_arp(frame: &[u8]) -> ArpRepr {
    let eth = EthernetFrame::new_checked(frame).unwrap();
    assert_eq!(eth.ethertype(), EthernetProtocol::Arp);
    let packet = ArpPacket::new_checked(eth.payload()).unwrap();
    ArpRepr::parse(&packet).unwrap()
}

#[test]
fn test_forward_waits_for_arp_then_sends() {
    let mut router = test_router();

    let mut frame = ipv4_frame(
        HOST_MAC,
        Ipv4Addr::new(192, 168, 1, 2),
        Ipv4Addr::new(10, 0, 0, 42),
        64,
        IpProtocol::Udp,
        &[0u8; 32],
    );
    router.handle_frame(&mut frame, 0);

    // Only a broadcast ARP request for the next hop goes out, on iface 1.
    let sent = router.links_mut().take_sent();
    assert_eq!(sent.len(), 1);
    let (iface, request) = &sent[0];
    assert_eq!(*iface, 1);

    let eth = EthernetFrame::new_checked(&request[..]).unwrap();
    assert_eq!(eth.dst_addr(), EthernetAddress::BROADCAST);
    match parse_arp(request) {
        ArpRepr::EthernetIpv4 {
            operation,
            source_protocol_addr,
            target_protocol_addr,
            ..
        } => {
            assert_eq!(operation, ArpOperation::Request);
            assert_eq!(source_protocol_addr, Ipv4Address::new(10, 0, 0, 254));
            assert_eq!(target_protocol_addr, Ipv4Address::new(10, 0, 0, 1));
        }
        other => panic!("unexpected ARP representation: {other:?}"),
    }

    // The ARP reply releases the queued packet.
    let mut reply = arp_frame(
        ArpOperation::Reply,
        NEXT_HOP_MAC,
        Ipv4Addr::new(10, 0, 0, 1),
        ROUTER_MAC_1,
        Ipv4Addr::new(10, 0, 0, 254),
    );
    router.handle_frame(&mut reply, 1);

    let sent = router.links_mut().take_sent();
    assert_eq!(sent.len(), 1);
    let (iface, forwarded) = &sent[0];
    assert_eq!(*iface, 1);

    let eth = EthernetFrame::new_checked(&forwarded[..]).unwrap();
    assert_eq!(eth.ethertype(), EthernetProtocol::Ipv4);
    assert_eq!(eth.src_addr(), EthernetAddress::from_bytes(&ROUTER_MAC_1));
    assert_eq!(eth.dst_addr(), EthernetAddress::from_bytes(&NEXT_HOP_MAC));

    let ip = Ipv4Packet::new_checked(eth.payload()).unwrap();
    assert_eq!(ip.hop_limit(), 63);
    assert_eq!(ip.dst_addr(), Ipv4Address::new(10, 0, 0, 42));
    // Rewritten header still sums to zero.
    assert_eq!(
        checksum(&forwarded[ETHERNET_HDR_SIZE..ETHERNET_HDR_SIZE + IP_HDR_SIZE]),
        0
    );
}

#[test]
fn test_pending_frames_released_in_fifo_order() {
    let mut router = test_router();

    for marker in [1u8, 2] {
        let mut frame = ipv4_frame(
            HOST_MAC,
            Ipv4Addr::new(192, 168, 1, 2),
            Ipv4Addr::new(10, 0, 0, 40 + marker),
            64,
            IpProtocol::Udp,
            &[marker; 16],
        );
        router.handle_frame(&mut frame, 0);
    }

    // One ARP request per queued frame.
    let sent = router.links_mut().take_sent();
    assert_eq!(sent.len(), 2);
    for (_, frame) in &sent {
        assert!(matches!(
            parse_arp(frame),
            ArpRepr::EthernetIpv4 {
                operation: ArpOperation::Request,
                ..
            }
        ));
    }

    let mut reply = arp_frame(
        ArpOperation::Reply,
        NEXT_HOP_MAC,
        Ipv4Addr::new(10, 0, 0, 1),
        ROUTER_MAC_1,
        Ipv4Addr::new(10, 0, 0, 254),
    );
    router.handle_frame(&mut reply, 1);

    let sent = router.links_mut().take_sent();
    assert_eq!(sent.len(), 2);
    for ((iface, frame), marker) in sent.iter().zip([1u8, 2]) {
        assert_eq!(*iface, 1);
        let eth = EthernetFrame::new_checked(&frame[..]).unwrap();
        let ip = Ipv4Packet::new_checked(eth.payload()).unwrap();
        assert_eq!(ip.payload()[0], marker);
    }
}

#[test]
fn test_ttl_expired_generates_time_exceeded() {
    let mut router = test_router();
    let source = Ipv4Addr::new(192, 168, 1, 2);
    router.add_arp_entry(source, HOST_MAC);

    let mut frame = ipv4_frame(
        HOST_MAC,
        source,
        Ipv4Addr::new(10, 0, 0, 42),
        1,
        IpProtocol::Udp,
        &[0xabu8; 32],
    );
    let original_header = frame[ETHERNET_HDR_SIZE..ETHERNET_HDR_SIZE + IP_HDR_SIZE].to_vec();
    router.handle_frame(&mut frame, 0);

    let sent = router.links_mut().take_sent();
    assert_eq!(sent.len(), 1);
    let (iface, error_frame) = &sent[0];
    assert_eq!(*iface, 0);
    assert_eq!(error_frame.len(), 70);

    let eth = EthernetFrame::new_checked(&error_frame[..]).unwrap();
    assert_eq!(eth.dst_addr(), EthernetAddress::from_bytes(&HOST_MAC));

    let ip = Ipv4Packet::new_checked(eth.payload()).unwrap();
    assert_eq!(ip.src_addr(), Ipv4Address::new(192, 168, 1, 1));
    assert_eq!(ip.dst_addr(), Ipv4Address::from_bytes(&source.octets()));
    assert_eq!(ip.next_header(), IpProtocol::Icmp);
    assert_eq!(ip.hop_limit(), 64);
    assert_eq!(
        checksum(&error_frame[ETHERNET_HDR_SIZE..ETHERNET_HDR_SIZE + IP_HDR_SIZE]),
        0
    );

    let icmp = Icmpv4Packet::new_unchecked(&error_frame[ETHERNET_HDR_SIZE + IP_HDR_SIZE..]);
    assert_eq!(icmp.msg_type(), Icmpv4Message::TimeExceeded);
    assert_eq!(icmp.msg_code(), 0);
    // The error checksum covers the header plus the quoted bytes.
    assert_eq!(checksum(&error_frame[ETHERNET_HDR_SIZE + IP_HDR_SIZE..]), 0);

    // The quoted region is the offending packet's IP header (TTL intact,
    // since expiry is detected before the rewrite).
    let quoted = &error_frame[ETHERNET_HDR_SIZE + 2 * IP_HDR_SIZE + 8..];
    assert_eq!(quoted[..IP_HDR_SIZE], original_header[..]);
}

#[test]
fn test_no_route_generates_destination_unreachable() {
    let mut router = test_router();
    let source = Ipv4Addr::new(192, 168, 1, 2);
    router.add_arp_entry(source, HOST_MAC);

    let mut frame = ipv4_frame(
        HOST_MAC,
        source,
        Ipv4Addr::new(8, 8, 8, 8),
        64,
        IpProtocol::Udp,
        &[0u8; 32],
    );
    router.handle_frame(&mut frame, 0);

    let sent = router.links_mut().take_sent();
    assert_eq!(sent.len(), 1);
    let (iface, error_frame) = &sent[0];
    assert_eq!(*iface, 0);

    let eth = EthernetFrame::new_checked(&error_frame[..]).unwrap();
    let ip = Ipv4Packet::new_checked(eth.payload()).unwrap();
    assert_eq!(ip.dst_addr(), Ipv4Address::from_bytes(&source.octets()));

    let icmp = Icmpv4Packet::new_unchecked(&error_frame[ETHERNET_HDR_SIZE + IP_HDR_SIZE..]);
    assert_eq!(icmp.msg_type(), Icmpv4Message::DstUnreachable);
    assert_eq!(icmp.msg_code(), 0);
}

#[test]
fn test_echo_request_answered() {
    let mut router = test_router();
    let source = Ipv4Addr::new(192, 168, 1, 2);
    router.add_arp_entry(source, HOST_MAC);

    let data = [0x55u8; 24];
    let mut frame = echo_request_frame(source, Ipv4Addr::new(192, 168, 1, 1), 13, 0x1234, &data);
    router.handle_frame(&mut frame, 0);

    let sent = router.links_mut().take_sent();
    assert_eq!(sent.len(), 1);
    let (iface, reply) = &sent[0];
    assert_eq!(*iface, 0);

    let eth = EthernetFrame::new_checked(&reply[..]).unwrap();
    assert_eq!(eth.dst_addr(), EthernetAddress::from_bytes(&HOST_MAC));

    let ip = Ipv4Packet::new_checked(eth.payload()).unwrap();
    assert_eq!(ip.src_addr(), Ipv4Address::new(192, 168, 1, 1));
    assert_eq!(ip.dst_addr(), Ipv4Address::from_bytes(&source.octets()));
    assert_eq!(ip.hop_limit(), 64);

    let icmp = Icmpv4Packet::new_checked(ip.payload()).unwrap();
    assert_eq!(icmp.msg_type(), Icmpv4Message::EchoReply);
    assert_eq!(icmp.msg_code(), 0);
    assert_eq!(icmp.echo_ident(), 0x1234);
    // Echoed payload is preserved and the checksum re-covers it.
    assert_eq!(checksum(&reply[ETHERNET_HDR_SIZE + IP_HDR_SIZE..]), 0);
    assert_eq!(&icmp.data()[..data.len()], &data[..]);
}

#[test]
fn test_arp_request_for_router_is_answered() {
    let mut router = test_router();

    let mut frame = arp_frame(
        ArpOperation::Request,
        HOST_MAC,
        Ipv4Addr::new(192, 168, 1, 2),
        [0; 6],
        Ipv4Addr::new(192, 168, 1, 1),
    );
    router.handle_frame(&mut frame, 0);

    let sent = router.links_mut().take_sent();
    assert_eq!(sent.len(), 1);
    let (iface, reply) = &sent[0];
    assert_eq!(*iface, 0);

    let eth = EthernetFrame::new_checked(&reply[..]).unwrap();
    assert_eq!(eth.dst_addr(), EthernetAddress::from_bytes(&HOST_MAC));
    match parse_arp(reply) {
        ArpRepr::EthernetIpv4 {
            operation,
            source_hardware_addr,
            source_protocol_addr,
            target_protocol_addr,
            ..
        } => {
            assert_eq!(operation, ArpOperation::Reply);
            assert_eq!(source_hardware_addr, EthernetAddress::from_bytes(&ROUTER_MAC_0));
            assert_eq!(source_protocol_addr, Ipv4Address::new(192, 168, 1, 1));
            assert_eq!(target_protocol_addr, Ipv4Address::new(192, 168, 1, 2));
        }
        other => panic!("unexpected ARP representation: {other:?}"),
    }
}

#[test]
fn test_arp_request_for_other_host_is_ignored() {
    let mut router = test_router();

    let mut frame = arp_frame(
        ArpOperation::Request,
        HOST_MAC,
        Ipv4Addr::new(192, 168, 1, 2),
        [0; 6],
        Ipv4Addr::new(192, 168, 1, 50),
    );
    router.handle_frame(&mut frame, 0);

    assert!(router.links_mut().take_sent().is_empty());
}

#[test]
fn test_corrupted_checksum_is_dropped() {
    let mut router = test_router();

    let mut frame = ipv4_frame(
        HOST_MAC,
        Ipv4Addr::new(192, 168, 1, 2),
        Ipv4Addr::new(10, 0, 0, 42),
        64,
        IpProtocol::Udp,
        &[0u8; 32],
    );
    frame[ETHERNET_HDR_SIZE + 10] ^= 0xff;
    router.handle_frame(&mut frame, 0);

    assert!(router.links_mut().take_sent().is_empty());
}

#[test]
fn test_runt_and_foreign_frames_are_dropped() {
    let mut router = test_router();

    let mut runt = vec![0u8; 8];
    router.handle_frame(&mut runt, 0);

    // IPv6 ethertype.
    let mut foreign = vec![0u8; 60];
    foreign[12] = 0x86;
    foreign[13] = 0xdd;
    router.handle_frame(&mut foreign, 0);

    assert!(router.links_mut().take_sent().is_empty());
}

#[test]
fn test_local_non_icmp_is_dropped() {
    let mut router = test_router();

    let mut frame = ipv4_frame(
        HOST_MAC,
        Ipv4Addr::new(192, 168, 1, 2),
        Ipv4Addr::new(192, 168, 1, 1),
        64,
        IpProtocol::Udp,
        &[0u8; 16],
    );
    router.handle_frame(&mut frame, 0);

    assert!(router.links_mut().take_sent().is_empty());
}
