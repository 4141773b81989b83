//! The forwarding data path: wire helpers, ARP state, routing table,
//! link I/O and the per-frame forwarding engine.

pub mod arp;
pub mod link;
pub mod packet;
pub mod reactor;
pub mod route;
pub mod router;

pub use link::{LinkError, LinkInfo, LinkSet, RawLinkSet};
pub use reactor::Reactor;
pub use router::Router;
