//! Timed socket setup.
//!
//! The connect runs non-blocking under a `poll` deadline; once
//! established the socket goes back to blocking mode with kernel
//! read/write timeouts, so the client's request path stays plain
//! blocking I/O.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::os::fd::AsFd;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use socket2::{Domain, Protocol, Socket, Type};

use crate::error::HttpError;

pub fn connect(
    host: &str,
    port: u16,
    connect_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
) -> Result<TcpStream, HttpError> {
    // First resolved address wins, IPv4 or IPv6.
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|_| HttpError::HostNotFound(host.to_string()))?
        .next()
        .ok_or_else(|| HttpError::HostNotFound(host.to_string()))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(HttpError::Connect)?;
    socket.set_nonblocking(true).map_err(HttpError::Connect)?;

    match socket.connect(&addr.into()) {
        Ok(()) => {}
        Err(e) if e.raw_os_error() == Some(nix::libc::EINPROGRESS) => {}
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
        Err(e) => return Err(HttpError::Connect(e)),
    }

    wait_writable(&socket, connect_timeout)?;
    // Writability alone does not mean success; the verdict is SO_ERROR.
    if let Some(err) = socket.take_error().map_err(HttpError::Connect)? {
        return Err(HttpError::Connect(err));
    }

    socket.set_nonblocking(false).map_err(HttpError::Connect)?;
    socket
        .set_read_timeout(Some(read_timeout))
        .map_err(HttpError::Connect)?;
    socket
        .set_write_timeout(Some(write_timeout))
        .map_err(HttpError::Connect)?;

    Ok(socket.into())
}

fn wait_writable(socket: &Socket, timeout: Duration) -> Result<(), HttpError> {
    let millis = timeout.as_millis().min(u128::from(u16::MAX)) as u16;

    loop {
        let mut fds = [PollFd::new(socket.as_fd(), PollFlags::POLLOUT)];
        match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(0) => return Err(HttpError::ConnectTimeout),
            Ok(_) => {
                if fds[0]
                    .revents()
                    .is_some_and(|revents| revents.contains(PollFlags::POLLOUT))
                {
                    return Ok(());
                }
                return Err(HttpError::Connect(io::Error::other("socket not writable")));
            }
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(HttpError::Connect(e.into())),
        }
    }
}
