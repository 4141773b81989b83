//! Raw ethernet link access.
//!
//! `LinkSet` is the seam between the forwarding engine and the NICs; the
//! production implementation opens one `AF_PACKET` socket per interface.

use std::io;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

use nix::libc;
use thiserror::Error;
use tracing::debug;

/// Addresses of one attached interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkInfo {
    pub ip: Ipv4Addr,
    pub mac: [u8; 6],
}

/// Frame transmission and address lookup over a set of interfaces indexed
/// from zero.
pub trait LinkSet {
    /// Transmit one frame on an interface.
    fn send(&mut self, iface: u32, frame: &[u8]) -> io::Result<()>;

    /// IP and hardware address of an interface.
    fn addr(&mut self, iface: u32) -> io::Result<LinkInfo>;
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to open link {name}: {source}")]
    Open { name: String, source: io::Error },

    #[error(transparent)]
    Io(#[from] io::Error),
}

const ETH_P_ALL_BE: u16 = (libc::ETH_P_ALL as u16).to_be();

#[repr(C)]
struct IfReqIndex {
    name: [libc::c_char; libc::IFNAMSIZ],
    index: libc::c_int,
    _pad: [u8; 20],
}

#[repr(C)]
struct IfReqSockaddr {
    name: [libc::c_char; libc::IFNAMSIZ],
    addr: libc::sockaddr,
    _pad: [u8; 8],
}

fn ifname(name: &str) -> [libc::c_char; libc::IFNAMSIZ] {
    let mut out = [0 as libc::c_char; libc::IFNAMSIZ];
    for (slot, byte) in out.iter_mut().zip(name.bytes()).take(libc::IFNAMSIZ - 1) {
        *slot = byte as libc::c_char;
    }
    out
}

/// One bound `AF_PACKET` socket.
pub struct RawLink {
    name: String,
    fd: OwnedFd,
}

impl RawLink {
    /// Open a raw socket bound to the named interface.
    pub fn open(name: &str) -> Result<Self, LinkError> {
        let open_err = |source| LinkError::Open {
            name: name.to_string(),
            source,
        };

        let raw = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW,
                libc::c_int::from(ETH_P_ALL_BE),
            )
        };
        if raw < 0 {
            return Err(open_err(io::Error::last_os_error()));
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut req = IfReqIndex {
            name: ifname(name),
            index: 0,
            _pad: [0; 20],
        };
        let res = unsafe { libc::ioctl(fd.as_raw_fd(), libc::SIOCGIFINDEX, &mut req) };
        if res < 0 {
            return Err(open_err(io::Error::last_os_error()));
        }

        let sockaddr = libc::sockaddr_ll {
            sll_family: libc::AF_PACKET as u16,
            sll_protocol: ETH_P_ALL_BE,
            sll_ifindex: req.index,
            sll_hatype: 1,
            sll_pkttype: 0,
            sll_halen: 6,
            sll_addr: [0; 8],
        };
        let res = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &sockaddr as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if res < 0 {
            return Err(open_err(io::Error::last_os_error()));
        }

        debug!(name, if_index = req.index, "raw link opened");

        Ok(RawLink {
            name: name.to_string(),
            fd,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fd(&self) -> BorrowedFd<'_> {
        use std::os::fd::AsFd;
        self.fd.as_fd()
    }

    /// Receive one frame. Blocks until a frame is available.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let n = unsafe {
            libc::recv(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                0,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    fn send(&self, frame: &[u8]) -> io::Result<()> {
        let n = unsafe {
            libc::send(
                self.fd.as_raw_fd(),
                frame.as_ptr().cast(),
                frame.len(),
                0,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn hardware_addr(&self) -> io::Result<[u8; 6]> {
        let mut req = IfReqSockaddr {
            name: ifname(&self.name),
            addr: unsafe { std::mem::zeroed() },
            _pad: [0; 8],
        };
        let res = unsafe { libc::ioctl(self.fd.as_raw_fd(), libc::SIOCGIFHWADDR, &mut req) };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut mac = [0u8; 6];
        for (out, byte) in mac.iter_mut().zip(req.addr.sa_data.iter()) {
            *out = *byte as u8;
        }
        Ok(mac)
    }

    fn ipv4_addr(&self) -> io::Result<Ipv4Addr> {
        let mut req = IfReqSockaddr {
            name: ifname(&self.name),
            addr: unsafe { std::mem::zeroed() },
            _pad: [0; 8],
        };
        let res = unsafe { libc::ioctl(self.fd.as_raw_fd(), libc::SIOCGIFADDR, &mut req) };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }

        let sin = unsafe { &*(&req.addr as *const libc::sockaddr as *const libc::sockaddr_in) };
        Ok(Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes()))
    }
}

/// All attached interfaces, indexed by position on the command line.
pub struct RawLinkSet {
    links: Vec<RawLink>,
}

impl RawLinkSet {
    pub fn open(names: &[String]) -> Result<Self, LinkError> {
        let links = names
            .iter()
            .map(|name| RawLink::open(name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RawLinkSet { links })
    }

    pub fn links(&self) -> &[RawLink] {
        &self.links
    }

    pub fn recv(&self, iface: u32, buf: &mut [u8]) -> io::Result<usize> {
        self.link(iface)?.recv(buf)
    }

    fn link(&self, iface: u32) -> io::Result<&RawLink> {
        self.links.get(iface as usize).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no link with index {iface}"),
            )
        })
    }
}

impl LinkSet for RawLinkSet {
    fn send(&mut self, iface: u32, frame: &[u8]) -> io::Result<()> {
        self.link(iface)?.send(frame)
    }

    fn addr(&mut self, iface: u32) -> io::Result<LinkInfo> {
        let link = self.link(iface)?;
        Ok(LinkInfo {
            ip: link.ipv4_addr()?,
            mac: link.hardware_addr()?,
        })
    }
}
