//! Receive loop over the attached links.

use std::io;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, error, info};

use super::link::{LinkError, RawLinkSet};
use super::packet::MAX_FRAME_LEN;
use super::router::Router;

/// Drives the forwarding engine from link readiness events.
pub struct Reactor {
    router: Router<RawLinkSet>,
}

impl Reactor {
    pub fn new(router: Router<RawLinkSet>) -> Self {
        Reactor { router }
    }

    /// Run the receive loop. Only a poll failure other than `EINTR` makes
    /// this return.
    pub fn run(&mut self) -> Result<(), LinkError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        info!(
            links = self.router.links().links().len(),
            "dataplane started"
        );

        loop {
            for iface in self.wait_ready()? {
                let len = match self.router.links().recv(iface, &mut buf) {
                    Ok(len) => len,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        error!(iface, error = %e, "link receive failed");
                        continue;
                    }
                };
                debug!(iface, len, "received frame");
                self.router.handle_frame(&mut buf[..len], iface);
            }
        }
    }

    /// Block until at least one link is readable; returns the ready
    /// interface indices.
    fn wait_ready(&self) -> Result<Vec<u32>, LinkError> {
        loop {
            let mut fds: Vec<PollFd> = self
                .router
                .links()
                .links()
                .iter()
                .map(|link| PollFd::new(link.fd(), PollFlags::POLLIN))
                .collect();

            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {
                    return Ok(fds
                        .iter()
                        .enumerate()
                        .filter(|(_, fd)| {
                            fd.revents()
                                .is_some_and(|revents| revents.contains(PollFlags::POLLIN))
                        })
                        .map(|(index, _)| index as u32)
                        .collect());
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(LinkError::Io(io::Error::from(e))),
            }
        }
    }
}
