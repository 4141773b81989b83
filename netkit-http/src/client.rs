//! HTTP/1.1 client with one cached keep-alive connection.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::error::HttpError;
use crate::message::{Headers, Method, Request, Response};
use crate::sock;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

const READ_BUFFER_SIZE: usize = 2048;
const RETRY_ATTEMPTS: usize = 3;
const RETRY_PAUSE: Duration = Duration::from_millis(100);

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

pub struct Client {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
    connect_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl Client {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Client {
            host: host.into(),
            port,
            stream: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    pub fn set_write_timeout(&mut self, timeout: Duration) {
        self.write_timeout = timeout;
    }

    pub fn get(&mut self, path: &str) -> Result<Response, HttpError> {
        self.execute(Request::new(Method::Get, path))
    }

    pub fn head(&mut self, path: &str) -> Result<Response, HttpError> {
        self.execute(Request::new(Method::Head, path))
    }

    pub fn post(&mut self, path: &str, body: &str) -> Result<Response, HttpError> {
        self.execute(Request::with_body(Method::Post, path, body))
    }

    pub fn put(&mut self, path: &str, body: &str) -> Result<Response, HttpError> {
        self.execute(Request::with_body(Method::Put, path, body))
    }

    pub fn delete(&mut self, path: &str) -> Result<Response, HttpError> {
        self.execute(Request::new(Method::Delete, path))
    }

    pub fn get_with_headers(&mut self, path: &str, headers: Headers) -> Result<Response, HttpError> {
        let mut request = Request::new(Method::Get, path);
        request.headers = headers;
        self.execute(request)
    }

    /// Perform one request over the cached connection, opening it first
    /// when needed.
    ///
    /// A response without `Content-Length` is returned with whatever body
    /// bytes were already buffered past the header terminator, usually
    /// none. `Connection: close` drops the cached socket after the
    /// response is returned.
    pub fn execute(&mut self, mut request: Request) -> Result<Response, HttpError> {
        // Take the socket out: every error path below drops (closes) it,
        // and only a keep-alive success puts it back.
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => sock::connect(
                &self.host,
                self.port,
                self.connect_timeout,
                self.read_timeout,
                self.write_timeout,
            )?,
        };

        let response = Self::process(&mut stream, &self.host, &mut request)?;

        let close = response
            .headers
            .get("Connection")
            .is_some_and(|value| value.eq_ignore_ascii_case("close"));
        if !close {
            self.stream = Some(stream);
        }
        Ok(response)
    }

    /// `execute`, retried up to three times with a short pause.
    pub fn execute_with_retry(&mut self, request: &Request) -> Result<Response, HttpError> {
        let mut result = self.execute(request.clone());
        for attempt in 1..RETRY_ATTEMPTS {
            match &result {
                Ok(_) => break,
                Err(e) => {
                    debug!(attempt, error = %e, "request failed, retrying");
                    thread::sleep(RETRY_PAUSE);
                    result = self.execute(request.clone());
                }
            }
        }
        result
    }

    fn process(
        stream: &mut TcpStream,
        host: &str,
        request: &mut Request,
    ) -> Result<Response, HttpError> {
        if !request.body.is_empty() {
            request
                .headers
                .set("Content-Length", request.body.len().to_string());
        }
        request.headers.set("Host", host);

        stream
            .write_all(request.to_wire().as_bytes())
            .map_err(map_write_err)?;

        let text = read_response_text(stream)?;
        Response::parse(&text).ok_or(HttpError::MalformedResponse)
    }
}

/// Accumulate until the header terminator, then until `Content-Length`
/// more bytes (when given) are in.
fn read_response_text(stream: &mut TcpStream) -> Result<String, HttpError> {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let mut data: Vec<u8> = Vec::new();

    let header_len = loop {
        let n = read_retrying(stream, &mut buf)?;
        if n == 0 {
            return Err(HttpError::Read(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before the header terminator",
            )));
        }
        data.extend_from_slice(&buf[..n]);

        // The terminator can only appear near the freshly appended bytes.
        let start = data.len().saturating_sub(n + HEADER_TERMINATOR.len() - 1);
        if let Some(pos) = find(&data[start..], HEADER_TERMINATOR) {
            break start + pos + HEADER_TERMINATOR.len();
        }
    };

    let content_length = {
        let header_text = String::from_utf8_lossy(&data[..header_len]);
        content_length_of(&header_text)
    };

    if let Some(content_length) = content_length {
        let total = header_len + content_length;
        while data.len() < total {
            let n = read_retrying(stream, &mut buf)?;
            if n == 0 {
                return Err(HttpError::Read(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed inside the body",
                )));
            }
            data.extend_from_slice(&buf[..n]);
        }
        data.truncate(total);
    }

    Ok(String::from_utf8_lossy(&data).into_owned())
}

fn content_length_of(header_text: &str) -> Option<usize> {
    use regex::Regex;
    use std::sync::LazyLock;

    static CONTENT_LENGTH: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)content-length:\s*(\d+)").expect("content-length regex")
    });
    CONTENT_LENGTH
        .captures(header_text)
        .and_then(|captures| captures[1].parse().ok())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn read_retrying(stream: &mut TcpStream, buf: &mut [u8]) -> Result<usize, HttpError> {
    loop {
        match stream.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_timeout(&e) => return Err(HttpError::ReadTimeout),
            Err(e) => return Err(HttpError::Read(e)),
        }
    }
}

fn map_write_err(e: io::Error) -> HttpError {
    if is_timeout(&e) {
        HttpError::WriteTimeout
    } else {
        HttpError::Write(e)
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_length_is_case_insensitive() {
        assert_eq!(
            content_length_of("HTTP/1.1 200 OK\r\ncOnTeNt-LeNgTh: 42\r\n"),
            Some(42)
        );
        assert_eq!(content_length_of("HTTP/1.1 200 OK\r\n"), None);
    }

    #[test]
    fn test_find_terminator() {
        assert_eq!(find(b"ab\r\n\r\ncd", b"\r\n\r\n"), Some(2));
        assert_eq!(find(b"ab\r\ncd", b"\r\n\r\n"), None);
    }
}
