//! Incremental HTTP/1.1 request parsing.
//!
//! Bytes are fed as they arrive (already decrypted when the session is
//! encrypted). Complete requests are taken off the front of the buffer; a
//! partial request stays buffered until more data arrives or the buffer
//! exceeds the configured limit.

use hap_core::error::{HttpError, Result};
use std::fmt;
use std::io::Write;

/// HTTP method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
    Other(String),
}

impl Method {
    pub fn parse(s: &str) -> Self {
        match s {
            "GET" => Self::Get,
            "PUT" => Self::Put,
            "POST" => Self::Post,
            "DELETE" => Self::Delete,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Delete => "DELETE",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    /// Request target as sent, query string included.
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Path without the query string.
    pub fn path(&self) -> &str {
        self.uri.split('?').next().unwrap_or(&self.uri)
    }

    /// Query string, if any.
    pub fn query(&self) -> Option<&str> {
        self.uri.split_once('?').map(|(_, query)| query)
    }

    /// Get header value (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get_header("Content-Type")
    }

    /// Serialize to wire format, adding `Content-Length` when there is a body.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.body.len());
        let _ = write!(&mut out, "{} {} HTTP/1.1\r\n", self.method, self.uri);
        for (key, value) in &self.headers {
            let _ = write!(&mut out, "{}: {}\r\n", key, value);
        }
        if !self.body.is_empty() && self.get_header("Content-Length").is_none() {
            let _ = write!(&mut out, "Content-Length: {}\r\n", self.body.len());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

/// Accumulates bytes and yields complete requests.
pub struct RequestParser {
    buf: Vec<u8>,
    max_message_size: usize,
}

impl RequestParser {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_message_size,
        }
    }

    /// Bytes buffered but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Remove and return every buffered byte.
    pub fn take_buffered(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    /// Append received bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Take the next complete request off the buffer.
    ///
    /// Returns `Ok(None)` while the request is incomplete. Errors are fatal
    /// to the connection.
    pub fn next_request(&mut self) -> Result<Option<HttpRequest>> {
        let limit = self.max_message_size;
        let Some(header_end) = find_header_end(&self.buf) else {
            if self.buf.len() > limit {
                return Err(HttpError::MessageTooLarge { limit }.into());
            }
            return Ok(None);
        };

        let head = std::str::from_utf8(&self.buf[..header_end])
            .map_err(|_| HttpError::Malformed("header is not UTF-8".to_string()))?;
        let (method, uri, headers) = parse_head(head)?;

        let content_length = match headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
        {
            Some((_, value)) => value
                .parse::<usize>()
                .map_err(|_| HttpError::InvalidContentLength(value.clone()))?,
            None => 0,
        };
        if headers.iter().any(|(k, v)| {
            k.eq_ignore_ascii_case("Transfer-Encoding") && !v.eq_ignore_ascii_case("identity")
        }) {
            return Err(HttpError::Malformed("transfer encodings are not supported".to_string()).into());
        }

        let body_start = header_end + 4;
        let total = body_start
            .checked_add(content_length)
            .filter(|&total| total <= limit)
            .ok_or(HttpError::MessageTooLarge { limit })?;
        if self.buf.len() < total {
            return Ok(None);
        }

        let body = self.buf[body_start..total].to_vec();
        self.buf.drain(..total);
        Ok(Some(HttpRequest {
            method,
            uri,
            headers,
            body,
        }))
    }
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

type Head = (Method, String, Vec<(String, String)>);

/// Parse request line and headers.
fn parse_head(head: &str) -> Result<Head> {
    let mut lines = head.split("\r\n");
    let request_line = lines
        .next()
        .filter(|line| !line.is_empty())
        .ok_or_else(|| HttpError::Malformed("missing request line".to_string()))?;

    let mut parts = request_line.split(' ');
    let (method, uri, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(uri), Some(version), None) if !method.is_empty() && !uri.is_empty() => {
            (method, uri, version)
        }
        _ => {
            return Err(HttpError::Malformed(format!("bad request line: {}", request_line)).into())
        }
    };
    if !version.starts_with("HTTP/1.") {
        return Err(HttpError::Malformed(format!("unsupported version: {}", version)).into());
    }

    let mut headers = Vec::new();
    for line in lines {
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| HttpError::Malformed(format!("bad header line: {}", line)))?;
        headers.push((key.trim().to_string(), value.trim().to_string()));
    }

    Ok((Method::parse(method), uri.to_string(), headers))
}
