//! HTTP/1.0 parsing and serialization directly over the transport buffer.
//! Requests carry multi-valued, lowercased header names; responses carry
//! single-valued headers in insertion order so serialization is stable.

use crate::net::buffer::ByteBuffer;
use hashbrown::HashMap;
use indexmap::IndexMap;
use lazy_static::lazy_static;
use std::fmt;
use std::time::SystemTime;

#[derive(Debug, Eq, PartialEq)]
pub enum HttpError {
    MalformedRequestLine,
    MalformedStatusLine,
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HttpError::MalformedRequestLine => write!(f, "malformed request line"),
            HttpError::MalformedStatusLine => write!(f, "malformed status line"),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Patch,
    Trace,
    Connect,
    Unknown(String),
}

impl Method {
    pub fn parse(token: &str) -> Method {
        match token {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "OPTIONS" => Method::Options,
            "PATCH" => Method::Patch,
            "TRACE" => Method::Trace,
            "CONNECT" => Method::Connect,
            other => Method::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
            Method::Unknown(other) => other,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

lazy_static! {
    static ref REASONS: HashMap<u16, &'static str> = {
        let mut map = HashMap::new();
        map.insert(200, "OK");
        map.insert(201, "Created");
        map.insert(204, "No Content");
        map.insert(301, "Moved Permanently");
        map.insert(302, "Found");
        map.insert(400, "Bad Request");
        map.insert(401, "Unauthorized");
        map.insert(403, "Forbidden");
        map.insert(404, "Not Found");
        map.insert(405, "Method Not Allowed");
        map.insert(500, "Internal Server Error");
        map.insert(501, "Not Implemented");
        map.insert(503, "Service Unavailable");
        map
    };
}

#[inline]
pub fn reason(status: u16) -> &'static str {
    REASONS.get(&status).copied().unwrap_or("Unknown")
}

/// A parsed request. Header names are lowercased; comma-separated values
/// are split and duplicate names accumulate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub version: String,
    pub headers: IndexMap<String, Vec<String>>,
    pub body: String,
    pub(crate) routed: bool,
}

impl Request {
    pub fn new(method: Method, url: &str) -> Request {
        Request {
            method,
            url: url.to_string(),
            version: "HTTP/1.0".to_string(),
            headers: IndexMap::new(),
            body: String::new(),
            routed: false,
        }
    }

    #[inline]
    pub fn header(&self, name: &str) -> Option<&Vec<String>> {
        self.headers.get(&name.to_ascii_lowercase())
    }

    /// Parses a request out of the buffer. The first empty line ends the
    /// header block; everything after it is the body (bounded by
    /// `content-length` when present).
    pub fn parse(buffer: &ByteBuffer) -> Result<Request, HttpError> {
        let mut lines = buffer.lines(0);

        let (_, first) = lines.next().ok_or(HttpError::MalformedRequestLine)?;
        let first = String::from_utf8_lossy(first);
        let mut tokens = first.split_whitespace();

        let method = Method::parse(tokens.next().ok_or(HttpError::MalformedRequestLine)?);
        let url = tokens
            .next()
            .ok_or(HttpError::MalformedRequestLine)?
            .to_string();
        let version = tokens
            .next()
            .map(str::to_string)
            .unwrap_or_else(|| "HTTP/1.0".to_string());

        let mut headers: IndexMap<String, Vec<String>> = IndexMap::new();
        let mut body_start = buffer.len();

        for (next, line) in lines {
            if line.is_empty() {
                body_start = next;
                break;
            }

            let line = String::from_utf8_lossy(line);
            if let Some(colon) = line.find(':') {
                let name = line[..colon].trim().to_ascii_lowercase();
                let values = line[colon + 1..].split(',').map(|v| v.trim().to_string());
                headers.entry(name).or_default().extend(values);
            }
        }

        let body = bounded_body(&buffer.as_slice()[body_start..], |name| {
            headers.get(name).and_then(|v| v.first().cloned())
        });

        Ok(Request {
            method,
            url,
            version,
            headers,
            body,
            routed: false,
        })
    }

    /// Serializes the request: request line, comma-joined headers, blank
    /// line, body. Sized in one pass, written with `overwrite`.
    pub fn serialize(&self) -> ByteBuffer {
        let mut head = String::new();
        head.push_str(self.method.as_str());
        head.push(' ');
        head.push_str(&self.url);
        head.push(' ');
        head.push_str(&self.version);
        head.push_str("\r\n");

        for (name, values) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(&values.join(", "));
            head.push_str("\r\n");
        }

        head.push_str("\r\n");

        let mut buffer = ByteBuffer::new();
        buffer.set_length(head.len() + self.body.len());

        let offset = buffer.overwrite(0, head.as_bytes());
        buffer.overwrite(offset, self.body.as_bytes());

        buffer
    }
}

/// An outgoing (or, on client entities, parsed inbound) response.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Response {
    pub version: String,
    pub status: u16,
    pub headers: IndexMap<String, String>,
    pub body: String,
    pub(crate) inbound: bool,
    pub(crate) dispatched: bool,
}

impl Response {
    pub fn new(status: u16) -> Response {
        Response {
            version: "HTTP/1.0".to_string(),
            status,
            headers: IndexMap::new(),
            body: String::new(),
            inbound: false,
            dispatched: false,
        }
    }

    pub fn with_body(status: u16, body: &str) -> Response {
        let mut response = Response::new(status);
        response.body = body.to_string();
        response
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name.to_string(), value.to_string());
    }

    /// Sets the header unless a case-insensitive match already exists.
    pub fn set_header_if_absent(&mut self, name: &str, value: &str) {
        if self.header(name).is_none() {
            self.set_header(name, value);
        }
    }

    /// Parses a response out of the buffer. Header names keep their case;
    /// lookups are case-insensitive. The body is bounded by
    /// `Content-Length` when present.
    pub fn parse(buffer: &ByteBuffer) -> Result<Response, HttpError> {
        let mut lines = buffer.lines(0);

        let (_, first) = lines.next().ok_or(HttpError::MalformedStatusLine)?;
        let first = String::from_utf8_lossy(first);
        let mut tokens = first.split_whitespace();

        let version = tokens
            .next()
            .ok_or(HttpError::MalformedStatusLine)?
            .to_string();
        let status = tokens
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or(HttpError::MalformedStatusLine)?;

        let mut headers = IndexMap::new();
        let mut body_start = buffer.len();

        for (next, line) in lines {
            if line.is_empty() {
                body_start = next;
                break;
            }

            let line = String::from_utf8_lossy(line);
            if let Some(colon) = line.find(':') {
                let name = line[..colon].trim().to_string();
                let value = line[colon + 1..].trim().to_string();
                headers.insert(name, value);
            }
        }

        let body = bounded_body(&buffer.as_slice()[body_start..], |name| {
            headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.clone())
        });

        Ok(Response {
            version,
            status,
            headers,
            body,
            inbound: false,
            dispatched: false,
        })
    }

    /// Serializes the response: status line, headers, defaulted minimum
    /// headers, blank line, body, trailing CR-LF. Sized in one pass,
    /// written with `overwrite`.
    pub fn serialize(&self) -> ByteBuffer {
        let version = match self.version.is_empty() {
            true => "HTTP/1.0",
            _ => &self.version,
        };

        let mut head = String::new();
        head.push_str(version);
        head.push(' ');
        head.push_str(&self.status.to_string());
        head.push(' ');
        head.push_str(reason(self.status));
        head.push_str("\r\n");

        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }

        if self.header("date").is_none() {
            head.push_str("Date: ");
            head.push_str(&httpdate::fmt_http_date(SystemTime::now()));
            head.push_str("\r\n");
        }
        if self.header("content-length").is_none() {
            head.push_str("Content-Length: ");
            head.push_str(&self.body.len().to_string());
            head.push_str("\r\n");
        }
        if self.header("connection").is_none() {
            head.push_str("Connection: keep-alive\r\n");
        }

        head.push_str("\r\n");

        let mut buffer = ByteBuffer::new();
        buffer.set_length(head.len() + self.body.len() + 2);

        let mut offset = buffer.overwrite(0, head.as_bytes());
        offset = buffer.overwrite(offset, self.body.as_bytes());
        buffer.overwrite(offset, b"\r\n");

        buffer
    }
}

/// Extracts the body from the bytes following the header block, bounded
/// by the content-length header when one is present and parses.
fn bounded_body<F>(remainder: &[u8], content_length: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let bytes = match content_length("content-length").and_then(|v| v.parse::<usize>().ok()) {
        Some(length) if length <= remainder.len() => &remainder[..length],
        _ => remainder,
    };

    String::from_utf8_lossy(bytes).into_owned()
}
