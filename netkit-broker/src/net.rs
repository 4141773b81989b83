//! Exact-length frame I/O over TCP streams.
//!
//! `read_exact`/`write_all` already restart on `EINTR`; what this module
//! adds is the framing and a dedicated peer-closed error so callers can
//! tell an orderly disconnect from a transport failure.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use thiserror::Error;

use crate::proto::tcp::{FrameType, FRAME_HEADER_LEN, MAX_PAYLOAD_LEN};
use crate::proto::ProtoError;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("peer closed the connection")]
    PeerClosed,

    #[error(transparent)]
    Io(io::Error),

    #[error(transparent)]
    Proto(#[from] ProtoError),
}

impl From<io::Error> for FrameError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => FrameError::PeerClosed,
            _ => FrameError::Io(e),
        }
    }
}

/// Read one frame: header first, then exactly the declared payload into
/// `buf` (reused across calls). Returns the frame type.
pub fn read_frame(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Result<FrameType, FrameError> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    stream.read_exact(&mut header)?;

    let kind = FrameType::from_tag(header[0])?;
    let len = usize::from(u16::from_be_bytes([header[1], header[2]]));
    if len > MAX_PAYLOAD_LEN {
        return Err(ProtoError::Oversize {
            what: "frame payload",
            len,
            max: MAX_PAYLOAD_LEN,
        }
        .into());
    }

    buf.resize(len, 0);
    stream.read_exact(buf)?;
    Ok(kind)
}

/// Write a complete frame.
pub fn write_frame(stream: &mut TcpStream, frame: &[u8]) -> Result<(), FrameError> {
    stream.write_all(frame)?;
    Ok(())
}
