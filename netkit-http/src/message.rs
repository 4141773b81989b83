//! Request serialization and response parsing.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Protocol written on every request line.
pub const PROTOCOL: &str = "HTTP/1.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Insertion-ordered header map. Lookup is case-insensitive, writing keeps
/// the first spelling of a name and replaces its value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub headers: Headers,
    pub body: String,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Request {
            method,
            path: path.into(),
            headers: Headers::new(),
            body: String::new(),
        }
    }

    pub fn with_body(method: Method, path: impl Into<String>, body: impl Into<String>) -> Self {
        Request {
            method,
            path: path.into(),
            headers: Headers::new(),
            body: body.into(),
        }
    }

    /// Serialize as `METHOD SP path SP HTTP/1.1 CRLF`, header lines, a
    /// blank line, then the body.
    pub fn to_wire(&self) -> String {
        let mut out = format!("{} {} {}\r\n", self.method, self.path, PROTOCOL);
        for (name, value) in self.headers.iter() {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out.push_str(&self.body);
        out
    }
}

static STATUS_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(HTTP/1\.[01]) (\d{3})(?: (.*))?$").expect("status line regex"));
static HEADER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9-]+):\s*(.+)$").expect("header line regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub version: String,
    pub status_code: u16,
    pub status_message: String,
    pub headers: Headers,
    pub body: String,
}

impl Response {
    /// Parse a full response. `text` must contain the header terminator;
    /// everything after it becomes the body verbatim. Any malformed
    /// status or header line fails the parse.
    pub fn parse(text: &str) -> Option<Response> {
        let header_end = text.find("\r\n\r\n")?;
        let header_text = &text[..header_end];
        let body = &text[header_end + 4..];

        let mut lines = header_text.split("\r\n");
        let status_line = lines.next()?;
        let captures = STATUS_LINE.captures(status_line)?;
        let version = captures[1].to_string();
        let status_code: u16 = captures[2].parse().ok()?;
        let status_message = captures
            .get(3)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        let mut headers = Headers::new();
        for line in lines {
            let captures = HEADER_LINE.captures(line)?;
            headers.set(&captures[1], &captures[2]);
        }

        Some(Response {
            version,
            status_code,
            status_message,
            headers,
            body: body.to_string(),
        })
    }

    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("Content-Length")?.trim().parse().ok()
    }
}
