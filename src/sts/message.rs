//! Text messages of the legacy bootstrap channel.
//!
//! ```text
//! POST /Auth/LoginStart STS/1.0\r\n
//! l:52\r\n
//! s:1\r\n
//! \r\n
//! <Request><LoginName>player@example.com</LoginName></Request>
//! ```
//!
//! Responses use the same layout with a status line (`STS/1.0 200 OK`). The
//! `l` header always carries the body length in bytes; `s` is the request
//! sequence, echoed back with an `R` suffix.

use std::fmt::Write as _;

use crate::error::{constants, ProtocolError, Result};

pub const PROTOCOL: &str = "STS/1.0";
pub const HEADER_END: &[u8] = b"\r\n\r\n";
pub const LENGTH_HEADER: &str = "l";
pub const SEQUENCE_HEADER: &str = "s";

/// One request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StsMessage {
    pub start_line: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// Escape text for an element body.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            c => out.push(c),
        }
    }
    out
}

impl StsMessage {
    pub fn request(method: &str, path: &str, sequence: Option<u32>, body: impl Into<String>) -> Self {
        let mut headers = Vec::new();
        if let Some(seq) = sequence {
            headers.push((SEQUENCE_HEADER.to_string(), seq.to_string()));
        }
        Self {
            start_line: format!("{method} {path} {PROTOCOL}"),
            headers,
            body: body.into(),
        }
    }

    /// Response to `request`, echoing its sequence with an `R` suffix.
    pub fn reply_to(request: &StsMessage, status: u16, reason: &str, body: impl Into<String>) -> Self {
        let mut headers = Vec::new();
        if let Some(seq) = request.header(SEQUENCE_HEADER) {
            headers.push((SEQUENCE_HEADER.to_string(), format!("{seq}R")));
        }
        Self {
            start_line: format!("{PROTOCOL} {status} {reason}"),
            headers,
            body: body.into(),
        }
    }

    pub fn ok(request: &StsMessage, body: impl Into<String>) -> Self {
        Self::reply_to(request, 200, "OK", body)
    }

    /// Error reply carrying the numeric code in `<Error code="N"/>`.
    pub fn error(request: &StsMessage, code: u32) -> Self {
        Self::reply_to(request, 400, "Bad Request", format!("<Error code=\"{code}\"/>\n"))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// `(method, path)` of a request line.
    pub fn method_and_path(&self) -> Result<(&str, &str)> {
        let mut parts = self.start_line.split(' ');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(path), Some(proto)) if proto == PROTOCOL => Ok((method, path)),
            _ => Err(ProtocolError::Sts(format!(
                "bad request line '{}'",
                self.start_line
            ))),
        }
    }

    /// Status code of a response line.
    pub fn status(&self) -> Result<u16> {
        let mut parts = self.start_line.splitn(3, ' ');
        match (parts.next(), parts.next()) {
            (Some(PROTOCOL), Some(code)) => code
                .parse()
                .map_err(|_| ProtocolError::Sts(format!("bad status '{code}'"))),
            _ => Err(ProtocolError::Sts(format!(
                "bad status line '{}'",
                self.start_line
            ))),
        }
    }

    /// Text of the first `<name>…</name>` element in the body.
    pub fn element(&self, name: &str) -> Result<&str> {
        element(&self.body, name)
            .ok_or_else(|| ProtocolError::Sts(format!("{}: {name}", constants::ERR_STS_ELEMENT)))
    }

    /// `code` attribute of an `<Error/>` body.
    pub fn error_code(&self) -> Option<u32> {
        let start = self.body.find("<Error code=\"")? + "<Error code=\"".len();
        let end = self.body[start..].find('"')? + start;
        self.body[start..end].parse().ok()
    }

    /// Wire bytes, with `l` computed from the body.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = String::with_capacity(self.start_line.len() + self.body.len() + 32);
        out.push_str(&self.start_line);
        out.push_str("\r\n");
        let _ = write!(out, "{LENGTH_HEADER}:{}\r\n", self.body.len());
        for (key, value) in &self.headers {
            if key.eq_ignore_ascii_case(LENGTH_HEADER) {
                continue;
            }
            let _ = write!(out, "{key}:{value}\r\n");
        }
        out.push_str("\r\n");
        out.push_str(&self.body);
        out.into_bytes()
    }

    /// Parse the head (everything before the blank line) and attach `body`.
    pub fn parse(head: &str, body: String) -> Result<Self> {
        let mut lines = head.split("\r\n");
        let start_line = lines
            .next()
            .filter(|line| !line.is_empty())
            .ok_or_else(|| ProtocolError::Sts(constants::ERR_STS_HEADER.into()))?
            .to_string();

        let mut headers = Vec::new();
        for line in lines.filter(|line| !line.is_empty()) {
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| ProtocolError::Sts(constants::ERR_STS_HEADER.into()))?;
            if key.eq_ignore_ascii_case(LENGTH_HEADER) {
                continue;
            }
            headers.push((key.trim().to_string(), value.trim().to_string()));
        }

        Ok(Self {
            start_line,
            headers,
            body,
        })
    }
}

/// Body length declared by a raw head.
pub fn declared_length(head: &str) -> Result<usize> {
    head.split("\r\n")
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case(LENGTH_HEADER))
        .and_then(|(_, value)| value.trim().parse().ok())
        .ok_or_else(|| ProtocolError::Sts(constants::ERR_STS_LENGTH.into()))
}

fn element<'a>(body: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(&body[start..end])
}
