//! Broker event loop.
//!
//! One poll set covers the TCP listener, the UDP ingest socket, stdin and
//! every subscriber connection. Each published datagram is converted into
//! a response frame and best-effort fanned out to matching subscribers.

use std::io::{self, BufRead};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::ops::ControlFlow;
use std::os::fd::{AsFd, AsRawFd};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::net::{self, FrameError};
use crate::pattern::TokenPattern;
use crate::proto::tcp::{encode_response_frame, FrameType, Request, Response};
use crate::proto::udp::{self, DATAGRAM_MAX_LEN};
use crate::registry::{RegistryError, SubscribersRegistry};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind port {port}: {source}")]
    Bind { port: u16, source: io::Error },

    #[error("poll failed: {0}")]
    Poll(io::Error),
}

/// Marker for "drop this subscriber connection".
struct Disconnect;

#[derive(Clone, Copy, Default)]
struct ClientEvent {
    readable: bool,
    hangup: bool,
}

pub struct Server {
    listener: TcpListener,
    udp: UdpSocket,
    clients: Vec<TcpStream>,
    registry: SubscribersRegistry,
    udp_buf: Box<[u8]>,
    frame_buf: Vec<u8>,
    console: bool,
}

impl Server {
    /// Bind the TCP listener and the UDP socket to the same port on all
    /// interfaces. With port 0 the UDP socket follows the port the
    /// listener was assigned.
    pub fn bind(port: u16) -> Result<Self, ServerError> {
        let bind_err = |source| ServerError::Bind { port, source };

        let listener =
            TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).map_err(bind_err)?;
        let bound_port = listener.local_addr().map_err(bind_err)?.port();
        let udp = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, bound_port)).map_err(bind_err)?;

        Ok(Server {
            listener,
            udp,
            clients: Vec::new(),
            registry: SubscribersRegistry::new(),
            udp_buf: vec![0u8; DATAGRAM_MAX_LEN].into_boxed_slice(),
            frame_buf: Vec::new(),
            console: false,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run until the `exit` console command (or stdin EOF).
    pub fn run(&mut self) -> Result<(), ServerError> {
        self.console = true;
        if let Ok(addr) = self.local_addr() {
            info!(%addr, "broker started");
        }
        while self.step(PollTimeout::NONE)?.is_continue() {}
        info!("broker stopped");
        Ok(())
    }

    /// One poll round. `Break` means the exit command was received.
    ///
    /// Exposed so tests can drive the loop with a finite timeout.
    pub fn step(&mut self, timeout: PollTimeout) -> Result<ControlFlow<()>, ServerError> {
        let stdin = io::stdin();

        let mut fds: Vec<PollFd> = Vec::with_capacity(3 + self.clients.len());
        fds.push(PollFd::new(self.listener.as_fd(), PollFlags::POLLIN));
        fds.push(PollFd::new(self.udp.as_fd(), PollFlags::POLLIN));
        if self.console {
            fds.push(PollFd::new(stdin.as_fd(), PollFlags::POLLIN));
        }
        for stream in &self.clients {
            fds.push(PollFd::new(stream.as_fd(), PollFlags::POLLIN));
        }

        match poll(&mut fds, timeout) {
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok(ControlFlow::Continue(())),
            Err(e) => return Err(ServerError::Poll(e.into())),
        }

        let readable = |fd: &PollFd| {
            fd.revents()
                .is_some_and(|revents| revents.contains(PollFlags::POLLIN))
        };
        let base = if self.console { 3 } else { 2 };
        let listener_ready = readable(&fds[0]);
        let udp_ready = readable(&fds[1]);
        let console_ready = self.console && readable(&fds[2]);
        let mut events: Vec<ClientEvent> = fds[base..]
            .iter()
            .map(|fd| ClientEvent {
                readable: readable(fd),
                hangup: fd.revents().is_some_and(|revents| {
                    revents.intersects(PollFlags::POLLERR | PollFlags::POLLHUP)
                }),
            })
            .collect();
        drop(fds);

        if console_ready && self.handle_console().is_break() {
            return Ok(ControlFlow::Break(()));
        }

        if udp_ready {
            self.handle_udp();
        }

        if listener_ready {
            self.handle_accept();
            // New connections get a no-event slot so the lists stay
            // aligned; they are polled from the next round on.
            events.resize(self.clients.len(), ClientEvent::default());
        }

        // Swap-remove keeps the scan index valid: the slot is refilled by
        // the last entry, so the index is only advanced on survivors.
        let mut index = 0;
        while index < events.len() {
            let event = events[index];
            if event.readable {
                match self.handle_client(index) {
                    Ok(()) => index += 1,
                    Err(Disconnect) => {
                        self.drop_client(index);
                        events.swap_remove(index);
                    }
                }
            } else if event.hangup {
                if let Some(id) = self.registry.id_for(self.clients[index].as_raw_fd()) {
                    println!("Client {id} disconnected.");
                }
                self.drop_client(index);
                events.swap_remove(index);
            } else {
                index += 1;
            }
        }

        Ok(ControlFlow::Continue(()))
    }

    fn handle_console(&mut self) -> ControlFlow<()> {
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) => {
                info!("stdin closed, shutting down");
                ControlFlow::Break(())
            }
            Ok(_) if line.trim() == "exit" => ControlFlow::Break(()),
            Ok(_) => ControlFlow::Continue(()),
            Err(e) => {
                error!(error = %e, "failed to read console command");
                ControlFlow::Continue(())
            }
        }
    }

    fn handle_accept(&mut self) {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    error!(error = %e, "failed to disable Nagle on accepted socket");
                    return;
                }
                debug!(%peer, "subscriber connection accepted");
                self.clients.push(stream);
            }
            Err(e) => error!(error = %e, "accept failed"),
        }
    }

    fn handle_udp(&mut self) {
        let (len, from) = match self.udp.recv_from(&mut self.udp_buf) {
            Ok(received) => received,
            Err(e) => {
                error!(error = %e, "udp receive failed");
                return;
            }
        };

        let message = match udp::parse_datagram(&self.udp_buf[..len]) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, len, "dropping malformed datagram");
                return;
            }
        };

        let topic = match message.topic.parse::<TokenPattern>() {
            Ok(topic) if topic.is_concrete() => topic,
            Ok(_) => {
                warn!(topic = %message.topic, "dropping datagram with wildcard topic");
                return;
            }
            Err(e) => {
                warn!(topic = %message.topic, error = %e, "dropping datagram with invalid topic");
                return;
            }
        };

        let sockets = self.registry.matching_sockets(&topic);
        if sockets.is_empty() {
            return;
        }

        let SocketAddr::V4(from) = from else {
            return;
        };
        let response = Response {
            source_ip: *from.ip(),
            source_port: from.port(),
            topic: message.topic,
            payload: message.payload,
        };
        let frame = match encode_response_frame(&response) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "failed to encode response");
                return;
            }
        };

        debug!(topic = %response.topic, subscribers = sockets.len(), "fanning out");
        for socket in sockets {
            let Some(stream) = self
                .clients
                .iter_mut()
                .find(|stream| stream.as_raw_fd() == socket)
            else {
                continue;
            };
            // Best effort: a failing subscriber is cleaned up when its own
            // socket reports the failure.
            if let Err(e) = net::write_frame(stream, &frame) {
                warn!(socket, error = %e, "failed to deliver response");
            }
        }
    }

    fn handle_client(&mut self, index: usize) -> Result<(), Disconnect> {
        let socket = self.clients[index].as_raw_fd();

        let kind = match net::read_frame(&mut self.clients[index], &mut self.frame_buf) {
            Ok(kind) => kind,
            Err(FrameError::PeerClosed) => {
                if let Some(id) = self.registry.id_for(socket) {
                    println!("Client {id} disconnected.");
                }
                return Err(Disconnect);
            }
            Err(e) => {
                error!(socket, error = %e, "failed to read request frame");
                return Err(Disconnect);
            }
        };

        if kind != FrameType::Request {
            warn!(socket, "unexpected frame type from subscriber");
            return Err(Disconnect);
        }

        let request = match Request::deserialize(&self.frame_buf) {
            Ok(request) => request,
            Err(e) => {
                warn!(socket, error = %e, "malformed request");
                return Err(Disconnect);
            }
        };

        self.apply_request(index, request)
    }

    fn apply_request(&mut self, index: usize, request: Request) -> Result<(), Disconnect> {
        let socket = self.clients[index].as_raw_fd();

        match request {
            Request::Connect { id } => {
                if self.registry.is_connected(socket) {
                    warn!(socket, "CONNECT on an already registered socket");
                    return Err(Disconnect);
                }
                match self.registry.connect(socket, &id) {
                    Ok(()) => {
                        if let Ok(peer) = self.clients[index].peer_addr() {
                            println!(
                                "New client {id} connected from {}:{}.",
                                peer.ip(),
                                peer.port()
                            );
                        }
                        Ok(())
                    }
                    Err(RegistryError::AlreadyConnected(_)) => {
                        println!("Client {id} already connected.");
                        Err(Disconnect)
                    }
                    Err(e) => {
                        error!(socket, error = %e, "connect rejected");
                        Err(Disconnect)
                    }
                }
            }
            Request::Subscribe { topic } => self.apply_topic_request(socket, &topic, true),
            Request::Unsubscribe { topic } => self.apply_topic_request(socket, &topic, false),
        }
    }

    fn apply_topic_request(
        &mut self,
        socket: i32,
        topic: &str,
        subscribe: bool,
    ) -> Result<(), Disconnect> {
        if !self.registry.is_connected(socket) {
            warn!(socket, topic = %topic, "request before CONNECT");
            return Err(Disconnect);
        }

        let pattern: TokenPattern = match topic.parse() {
            Ok(pattern) => pattern,
            Err(e) => {
                warn!(socket, topic = %topic, error = %e, "invalid topic pattern");
                return Err(Disconnect);
            }
        };

        debug!(socket, topic = %topic, subscribe, "topic request");
        let result = if subscribe {
            self.registry.subscribe(socket, pattern)
        } else {
            self.registry.unsubscribe(socket, &pattern)
        };
        result.map_err(|_| Disconnect)
    }

    fn drop_client(&mut self, index: usize) {
        let socket = self.clients[index].as_raw_fd();
        self.registry.disconnect(socket);
        // Dropping the stream closes the descriptor.
        self.clients.swap_remove(index);
    }
}
