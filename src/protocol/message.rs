//! RTSP request and response messages
//!
//! ```text
//! METHOD uri RTSP/1.0\r\n          RTSP/1.0 code reason\r\n
//! Header: value\r\n                Header: value\r\n
//! \r\n                             \r\n
//! [body]                           [body]
//! ```
//! Header names match case-insensitively. `Content-Length` is added on
//! encode whenever a body is present.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

pub const RTSP_VERSION: &str = "RTSP/1.0";

/// Methods served to viewers, in `Public` header order
pub const PUBLIC_METHODS: &str = "OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN";

/// Request method
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Options,
    Describe,
    Setup,
    Play,
    Teardown,
    GetParameter,
    Other(String),
}

impl Method {
    pub fn parse(s: &str) -> Self {
        match s {
            "OPTIONS" => Method::Options,
            "DESCRIBE" => Method::Describe,
            "SETUP" => Method::Setup,
            "PLAY" => Method::Play,
            "TEARDOWN" => Method::Teardown,
            "GET_PARAMETER" => Method::GetParameter,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Options => "OPTIONS",
            Method::Describe => "DESCRIBE",
            Method::Setup => "SETUP",
            Method::Play => "PLAY",
            Method::Teardown => "TEARDOWN",
            Method::GetParameter => "GET_PARAMETER",
            Method::Other(s) => s,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered header list with case-insensitive lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn content_length(&self) -> usize {
        self.get("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Lines without a colon are skipped
    fn parse_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Self {
        let mut headers = Headers::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            match line.split_once(':') {
                Some((name, value)) => headers.insert(name.trim(), value.trim()),
                None => tracing::trace!(line = %line, "Skipping malformed header"),
            }
        }
        headers
    }
}

/// Inbound RTSP request
#[derive(Debug, Clone)]
pub struct RtspRequest {
    pub method: Method,
    pub uri: String,
    pub version: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl RtspRequest {
    /// Parse a request head (everything before the blank line)
    ///
    /// A request line with fewer than three fields is rejected.
    pub fn parse(head: &str, body: Bytes) -> Result<Self, ProtocolError> {
        let mut lines = head.lines().map(|l| l.trim_end_matches('\r'));
        let start = lines.next().unwrap_or_default();

        let fields: Vec<&str> = start.split_whitespace().collect();
        if fields.len() < 3 {
            return Err(ProtocolError::MalformedStartLine(start.to_string()));
        }

        Ok(Self {
            method: Method::parse(fields[0]),
            uri: fields[1].to_string(),
            version: fields[2].to_string(),
            headers: Headers::parse_lines(lines),
            body,
        })
    }

    /// `CSeq`, defaulting to "1"
    pub fn cseq(&self) -> &str {
        self.headers.get("CSeq").unwrap_or("1")
    }

    pub fn transport(&self) -> Option<&str> {
        self.headers.get("Transport")
    }

    /// Session id without any `;timeout=` suffix
    pub fn session(&self) -> Option<&str> {
        self.headers
            .get("Session")
            .map(|s| s.split(';').next().unwrap_or(s).trim())
    }
}

/// Build an outbound request (used towards upstream cameras)
pub fn encode_request(method: &Method, uri: &str, cseq: u32, headers: &Headers) -> Bytes {
    let mut out = BytesMut::with_capacity(256);
    out.put_slice(format!("{} {} {}\r\n", method, uri, RTSP_VERSION).as_bytes());
    out.put_slice(format!("CSeq: {}\r\n", cseq).as_bytes());
    for (name, value) in headers.iter() {
        out.put_slice(format!("{}: {}\r\n", name, value).as_bytes());
    }
    out.put_slice(b"\r\n");
    out.freeze()
}

/// RTSP response
#[derive(Debug, Clone)]
pub struct RtspResponse {
    pub code: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl RtspResponse {
    pub fn new(code: u16) -> Self {
        Self {
            code,
            reason: reason_phrase(code).to_string(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Response echoing the request's CSeq
    pub fn reply(code: u16, cseq: &str) -> Self {
        Self::new(code).header("CSeq", cseq)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, content_type: &str, body: impl Into<Bytes>) -> Self {
        self.headers.insert("Content-Type", content_type);
        self.body = body.into();
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Serialize, adding `Content-Length` for non-empty bodies
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(128 + self.body.len());
        out.put_slice(format!("{} {} {}\r\n", RTSP_VERSION, self.code, self.reason).as_bytes());
        for (name, value) in self.headers.iter() {
            out.put_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        if !self.body.is_empty() {
            out.put_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }
        out.put_slice(b"\r\n");
        out.put_slice(&self.body);
        out.freeze()
    }

    /// Parse a response head (used on upstream replies)
    pub fn parse(head: &str, body: Bytes) -> Result<Self, ProtocolError> {
        let mut lines = head.lines().map(|l| l.trim_end_matches('\r'));
        let start = lines.next().unwrap_or_default();

        let mut fields = start.splitn(3, ' ');
        let version = fields.next().unwrap_or_default();
        let code = fields.next().and_then(|c| c.parse::<u16>().ok());
        let (true, Some(code)) = (version.starts_with("RTSP/"), code) else {
            return Err(ProtocolError::MalformedStartLine(start.to_string()));
        };

        Ok(Self {
            code,
            reason: fields.next().unwrap_or_default().to_string(),
            headers: Headers::parse_lines(lines),
            body,
        })
    }
}

pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        454 => "Session Not Found",
        455 => "Method Not Valid in This State",
        461 => "Unsupported Transport",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
