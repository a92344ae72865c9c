//! HTTP response and event message formatting.

use hap_core::error::{HttpError, Result};
use std::io::Write;

/// Content type of pairing bodies.
pub const CONTENT_TYPE_TLV8: &str = "application/pairing+tlv8";

/// Content type of accessory data bodies.
pub const CONTENT_TYPE_JSON: &str = "application/hap+json";

/// HAP status for a request that needs a verified session.
pub const STATUS_INSUFFICIENT_PRIVILEGES: i32 = -70401;

/// HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const OK: Self = Self(200);
    pub const NO_CONTENT: Self = Self(204);
    pub const MULTI_STATUS: Self = Self(207);
    pub const BAD_REQUEST: Self = Self(400);
    pub const NOT_FOUND: Self = Self(404);
    pub const METHOD_NOT_ALLOWED: Self = Self(405);
    pub const UNPROCESSABLE_ENTITY: Self = Self(422);
    pub const CONNECTION_AUTHORIZATION_REQUIRED: Self = Self(470);
    pub const INTERNAL_SERVER_ERROR: Self = Self(500);
    pub const SERVICE_UNAVAILABLE: Self = Self(503);

    /// Reason phrase for the status line.
    pub fn reason(&self) -> &'static str {
        match self.0 {
            200 => "OK",
            204 => "No Content",
            207 => "Multi-Status",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            422 => "Unprocessable Entity",
            470 => "Connection Authorization Required",
            500 => "Internal Server Error",
            503 => "Service Unavailable",
            _ => "Unknown",
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }
}

/// Protocol token of the status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// `HTTP/1.1`: a reply to a request.
    Http,
    /// `EVENT/1.0`: an unsolicited notification.
    Event,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "HTTP/1.1",
            Self::Event => "EVENT/1.0",
        }
    }
}

/// An outgoing response or event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub protocol: Protocol,
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            protocol: Protocol::Http,
            status,
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

    /// 200 with a TLV8 body.
    pub fn tlv(body: Vec<u8>) -> Self {
        Self::new(StatusCode::OK)
            .header("Content-Type", CONTENT_TYPE_TLV8)
            .body(body)
    }

    /// JSON body with the given status.
    pub fn json(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self::new(status)
            .header("Content-Type", CONTENT_TYPE_JSON)
            .body(body)
    }

    /// 470 with the HAP insufficient-privileges status.
    pub fn authorization_required() -> Self {
        let body = serde_json::json!({ "status": STATUS_INSUFFICIENT_PRIVILEGES }).to_string();
        Self::json(StatusCode::CONNECTION_AUTHORIZATION_REQUIRED, body)
    }

    /// `EVENT/1.0 200 OK` notification carrying a JSON body.
    pub fn event(body: impl Into<Vec<u8>>) -> Self {
        Self {
            protocol: Protocol::Event,
            ..Self::json(StatusCode::OK, body)
        }
    }

    /// Get header value (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Serialize to wire format.
    ///
    /// ```text
    /// HTTP/1.1 200 OK\r\n
    /// Content-Type: application/pairing+tlv8\r\n
    /// Content-Length: N\r\n
    /// \r\n
    /// [body]
    /// ```
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.body.len());
        let _ = write!(
            &mut out,
            "{} {} {}\r\n",
            self.protocol.as_str(),
            self.status.0,
            self.status.reason()
        );
        for (key, value) in &self.headers {
            let _ = write!(&mut out, "{}: {}\r\n", key, value);
        }
        let _ = write!(&mut out, "Content-Length: {}\r\n\r\n", self.body.len());
        out.extend_from_slice(&self.body);
        out
    }

    /// Parse one message from the front of `data`.
    ///
    /// Returns the message and the bytes it used, or `None` if `data` does
    /// not yet hold a complete message.
    pub fn parse(data: &[u8]) -> Result<Option<(Self, usize)>> {
        let Some(header_end) = data.windows(4).position(|w| w == b"\r\n\r\n") else {
            return Ok(None);
        };
        let head = std::str::from_utf8(&data[..header_end])
            .map_err(|_| HttpError::Malformed("header is not UTF-8".to_string()))?;
        let mut lines = head.split("\r\n");

        let status_line = lines.next().unwrap_or_default();
        let mut parts = status_line.splitn(3, ' ');
        let protocol = match parts.next() {
            Some("HTTP/1.1") | Some("HTTP/1.0") => Protocol::Http,
            Some("EVENT/1.0") => Protocol::Event,
            _ => {
                return Err(HttpError::Malformed(format!("bad status line: {}", status_line)).into())
            }
        };
        let status = parts
            .next()
            .and_then(|code| code.parse().ok())
            .map(StatusCode)
            .ok_or_else(|| HttpError::Malformed(format!("bad status line: {}", status_line)))?;

        let mut headers = Vec::new();
        for line in lines {
            if let Some((key, value)) = line.split_once(':') {
                headers.push((key.trim().to_string(), value.trim().to_string()));
            }
        }

        let content_length = match headers
            .iter()
            .find(|(k, _): &&(String, String)| k.eq_ignore_ascii_case("Content-Length"))
        {
            Some((_, value)) => value
                .parse::<usize>()
                .map_err(|_| HttpError::InvalidContentLength(value.clone()))?,
            None => 0,
        };

        let body_start = header_end + 4;
        let total = body_start + content_length;
        if data.len() < total {
            return Ok(None);
        }

        // Content-Length is regenerated on serialize.
        headers.retain(|(k, _)| !k.eq_ignore_ascii_case("Content-Length"));
        Ok(Some((
            Self {
                protocol,
                status,
                headers,
                body: data[body_start..total].to_vec(),
            },
            total,
        )))
    }
}
