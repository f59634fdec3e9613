//! MIME-style message carried inside `MSG`, `UUM` and `UBM` commands
//!
//! Layout: `Name: value` header lines terminated by CRLF, an empty line, then
//! the body bytes. Header lookups are case-insensitive and header order is
//! preserved on encode.

use crate::envelope::Envelope;
use crate::errors::WireError;
use crate::Result;

// ----------------------------------------------------------------------------
// Header Names
// ----------------------------------------------------------------------------

pub const HEADER_MIME_VERSION: &str = "MIME-Version";
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_MESSAGE_ID: &str = "Message-ID";
pub const HEADER_CHUNKS: &str = "Chunks";
pub const HEADER_CHUNK: &str = "Chunk";
pub const HEADER_TYPING_USER: &str = "TypingUser";
pub const HEADER_IM_FORMAT: &str = "X-MMS-IM-Format";
pub const HEADER_P2P_DEST: &str = "P2P-Dest";

pub const MIME_VERSION: &str = "1.0";

// ----------------------------------------------------------------------------
// Headers
// ----------------------------------------------------------------------------

/// Ordered header collection with case-insensitive lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MimeHeaders {
    entries: Vec<(String, String)>,
}

impl MimeHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replace the first header with this name, or append a new one
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self
            .entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))?;
        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ----------------------------------------------------------------------------
// MIME Message
// ----------------------------------------------------------------------------

/// Header block plus body, optionally owning the typed envelope the body came from
#[derive(Debug, Default)]
pub struct MimeMessage {
    headers: MimeHeaders,
    body: Vec<u8>,
    inner: Option<Box<dyn Envelope>>,
}

impl MimeMessage {
    /// Create a message with `MIME-Version` and the given content type
    pub fn new(content_type: &str) -> Self {
        let mut headers = MimeHeaders::new();
        headers.set(HEADER_MIME_VERSION, MIME_VERSION);
        headers.set(HEADER_CONTENT_TYPE, content_type);
        Self {
            headers,
            body: Vec::new(),
            inner: None,
        }
    }

    /// Create a message from parts without adding any header
    pub fn from_parts(headers: MimeHeaders, body: Vec<u8>) -> Self {
        Self {
            headers,
            body,
            inner: None,
        }
    }

    /// Parse a complete MIME message
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut message = Self::default();
        message.decode(bytes)?;
        Ok(message)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self.inner = None;
        self
    }

    /// Attach a typed payload; its encoding becomes the body
    pub fn with_inner(mut self, inner: Box<dyn Envelope>) -> Result<Self> {
        self.body = inner.encode()?;
        self.inner = Some(inner);
        Ok(self)
    }

    pub fn headers(&self) -> &MimeHeaders {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut MimeHeaders {
        &mut self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_parts(self) -> (MimeHeaders, Vec<u8>) {
        (self.headers, self.body)
    }

    /// Media type without parameters, lower-cased (`text/plain`)
    pub fn content_type(&self) -> Option<String> {
        self.headers.get(HEADER_CONTENT_TYPE).map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }

    /// Body interpreted as UTF-8, replacing invalid sequences
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl Envelope for MimeMessage {
    fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.body.len() + 64 * self.headers.len());
        for (name, value) in self.headers.iter() {
            bytes.extend_from_slice(name.as_bytes());
            bytes.extend_from_slice(b": ");
            bytes.extend_from_slice(value.as_bytes());
            bytes.extend_from_slice(b"\r\n");
        }
        bytes.extend_from_slice(b"\r\n");
        bytes.extend_from_slice(&self.body);
        Ok(bytes)
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<()> {
        let (header_block, body) = split_header_block(bytes);
        let header_text =
            core::str::from_utf8(header_block).map_err(|_| WireError::InvalidUtf8)?;

        let mut headers = MimeHeaders::new();
        for line in header_text.split('\n') {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| WireError::MalformedHeader {
                    line: line.to_string(),
                })?;
            headers.set(name.trim(), value.trim());
        }

        self.headers = headers;
        self.body = body.to_vec();
        if let Some(inner) = self.inner.as_mut() {
            inner.decode(body)?;
        }
        Ok(())
    }

    fn inner(&self) -> Option<&dyn Envelope> {
        self.inner.as_deref()
    }

    fn describe(&self) -> String {
        let mut rendered = String::new();
        for (name, value) in self.headers.iter() {
            rendered.push_str(&format!("{}: {}\r\n", name, value));
        }
        rendered.push_str("\r\n");
        if self.inner.is_none() {
            rendered.push_str(&self.body_text());
        }
        rendered
    }
}

/// Split at the first empty line; a message without one is all headers
fn split_header_block(bytes: &[u8]) -> (&[u8], &[u8]) {
    if let Some(pos) = find(bytes, b"\r\n\r\n") {
        return (&bytes[..pos], &bytes[pos + 4..]);
    }
    if let Some(pos) = find(bytes, b"\n\n") {
        return (&bytes[..pos], &bytes[pos + 2..]);
    }
    (bytes, &[])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
