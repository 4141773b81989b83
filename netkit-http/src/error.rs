use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("host not found: {0}")]
    HostNotFound(String),

    #[error("could not establish connection: {0}")]
    Connect(#[source] io::Error),

    #[error("connection timed out")]
    ConnectTimeout,

    #[error("failed to read from socket: {0}")]
    Read(#[source] io::Error),

    #[error("socket read timed out")]
    ReadTimeout,

    #[error("failed to write to socket: {0}")]
    Write(#[source] io::Error),

    #[error("socket write timed out")]
    WriteTimeout,

    #[error("malformed response")]
    MalformedResponse,
}
