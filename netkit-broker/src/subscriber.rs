//! Subscriber client: console commands in, published values out.

use std::io::{self, BufRead};
use std::net::{SocketAddr, TcpStream};
use std::ops::ControlFlow;
use std::os::fd::AsFd;
use std::str::FromStr;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::net::{self, FrameError};
use crate::pattern::{PatternError, TokenPattern};
use crate::proto::tcp::{encode_request_frame, FrameType, Request, Response};
use crate::proto::TOPIC_MAX_LEN;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: SocketAddr, source: io::Error },

    #[error("poll failed: {0}")]
    Poll(io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// A parsed console command.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Subscribe(String),
    Unsubscribe(String),
    Exit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("expected `subscribe <topic>`, `unsubscribe <topic>` or `exit`")]
    Unknown,

    #[error("topic exceeds {TOPIC_MAX_LEN} bytes")]
    TopicTooLong,

    #[error("invalid topic: {0}")]
    Topic(#[from] PatternError),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = words.next().ok_or(CommandError::Unknown)?;

        if command == "exit" {
            return Ok(Command::Exit);
        }

        let topic = words.next().ok_or(CommandError::Unknown)?;
        if words.next().is_some() {
            return Err(CommandError::Unknown);
        }
        if topic.len() > TOPIC_MAX_LEN {
            return Err(CommandError::TopicTooLong);
        }
        // Validate locally so invalid patterns never reach the broker.
        topic.parse::<TokenPattern>()?;

        match command {
            "subscribe" => Ok(Command::Subscribe(topic.to_string())),
            "unsubscribe" => Ok(Command::Unsubscribe(topic.to_string())),
            _ => Err(CommandError::Unknown),
        }
    }
}

pub struct Subscriber {
    stream: TcpStream,
    frame_buf: Vec<u8>,
}

impl Subscriber {
    /// Connect, disable Nagle and announce the id.
    pub fn connect(id: &str, addr: SocketAddr) -> Result<Self, ClientError> {
        let connect_err = |source| ClientError::Connect { addr, source };

        let stream = TcpStream::connect(addr).map_err(connect_err)?;
        stream.set_nodelay(true).map_err(connect_err)?;

        let mut subscriber = Subscriber {
            stream,
            frame_buf: Vec::new(),
        };
        let frame = encode_request_frame(&Request::Connect { id: id.to_string() })
            .map_err(FrameError::from)?;
        net::write_frame(&mut subscriber.stream, &frame)?;

        info!(id, %addr, "connected");
        Ok(subscriber)
    }

    /// Poll stdin and the broker socket until `exit` or server close.
    pub fn run(&mut self) -> Result<(), ClientError> {
        loop {
            let stdin = io::stdin();
            let mut fds = [
                PollFd::new(stdin.as_fd(), PollFlags::POLLIN),
                PollFd::new(self.stream.as_fd(), PollFlags::POLLIN),
            ];

            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(ClientError::Poll(e.into())),
            }

            let readable = |fd: &PollFd| {
                fd.revents()
                    .is_some_and(|revents| revents.contains(PollFlags::POLLIN))
            };
            let hangup = fds[1].revents().is_some_and(|revents| {
                revents.intersects(PollFlags::POLLERR | PollFlags::POLLHUP)
            });
            let console_ready = readable(&fds[0]);
            let server_ready = readable(&fds[1]);
            drop(fds);

            if console_ready {
                if self.handle_console().is_break() {
                    return Ok(());
                }
            } else if server_ready {
                match self.handle_server_frame() {
                    Ok(()) => {}
                    Err(FrameError::PeerClosed) => {
                        info!("server closed the connection");
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                }
            } else if hangup {
                info!("server closed the connection");
                return Ok(());
            }
        }
    }

    fn handle_console(&mut self) -> ControlFlow<()> {
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) => return ControlFlow::Break(()),
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "failed to read command");
                return ControlFlow::Continue(());
            }
        }

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                eprintln!("{e}");
                return ControlFlow::Continue(());
            }
        };

        match command {
            Command::Exit => ControlFlow::Break(()),
            Command::Subscribe(topic) => {
                if self.send_request(&Request::Subscribe {
                    topic: topic.clone(),
                }) {
                    println!("Subscribed to topic: {topic}");
                }
                ControlFlow::Continue(())
            }
            Command::Unsubscribe(topic) => {
                if self.send_request(&Request::Unsubscribe {
                    topic: topic.clone(),
                }) {
                    println!("Unsubscribed from topic: {topic}");
                }
                ControlFlow::Continue(())
            }
        }
    }

    fn send_request(&mut self, request: &Request) -> bool {
        let frame = match encode_request_frame(request) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "failed to encode request");
                return false;
            }
        };
        match net::write_frame(&mut self.stream, &frame) {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "failed to send request");
                false
            }
        }
    }

    fn handle_server_frame(&mut self) -> Result<(), FrameError> {
        let kind = net::read_frame(&mut self.stream, &mut self.frame_buf)?;
        if kind != FrameType::Response {
            warn!("unexpected frame type from server");
            return Ok(());
        }

        match Response::deserialize(&self.frame_buf) {
            Ok(response) => {
                println!(
                    "{}:{} - {} - {} - {}",
                    response.source_ip,
                    response.source_port,
                    response.topic,
                    response.payload.type_name(),
                    response.payload
                );
            }
            Err(e) => warn!(error = %e, "malformed response"),
        }
        Ok(())
    }
}
