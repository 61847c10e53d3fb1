//! Packet record model
//!
//! Represents a single captured HTTP request/response pair held by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned packet identifier
pub type PacketId = u64;

/// HTTP methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    Connect,
    Trace,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Connect => "CONNECT",
            HttpMethod::Trace => "TRACE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            "CONNECT" => Ok(HttpMethod::Connect),
            "TRACE" => Ok(HttpMethod::Trace),
            other => Err(format!("unsupported HTTP method: {other}")),
        }
    }
}

/// One header line. Names keep the casing they were captured with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Ordered header list; names may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderList(Vec<Header>);

impl HeaderList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }

    /// Append a header without looking at existing entries.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push(Header {
            name: name.into(),
            value: value.into(),
        });
    }

    /// First value for `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Every value for `name` in order (case-insensitive).
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|h| h.name.eq_ignore_ascii_case(name))
    }

    /// Overwrite the first entry named `name` in place. Returns false when absent.
    pub fn replace_first(&mut self, name: &str, value: &str) -> bool {
        match self.0.iter_mut().find(|h| h.name.eq_ignore_ascii_case(name)) {
            Some(header) => {
                header.name = name.to_string();
                header.value = value.to_string();
                true
            }
            None => false,
        }
    }

    /// Drop every entry named `name` except the first one.
    pub fn dedup_name(&mut self, name: &str) {
        let mut seen = false;
        self.0.retain(|h| {
            if !h.name.eq_ignore_ascii_case(name) {
                return true;
            }
            let keep = !seen;
            seen = true;
            keep
        });
    }

    /// Drop every entry named `name`. Returns the number removed.
    pub fn remove_all(&mut self, name: &str) -> usize {
        let before = self.0.len();
        self.0.retain(|h| !h.name.eq_ignore_ascii_case(name));
        before - self.0.len()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderList {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| Header {
                    name: name.into(),
                    value: value.into(),
                })
                .collect(),
        )
    }
}

/// Where a stored packet came from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PacketOrigin {
    /// Delivered by the capture pipeline
    #[default]
    Captured,
    /// Produced by one attempt of a resend job
    Resend {
        source_packet_id: PacketId,
        job_id: String,
        attempt: u32,
    },
}

impl PacketOrigin {
    pub fn is_resend(&self) -> bool {
        matches!(self, PacketOrigin::Resend { .. })
    }
}

/// Bodies go over the wire as UTF-8 text when possible, base64 otherwise.
pub(crate) mod body_encoding {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(tag = "encoding", content = "data", rename_all = "lowercase")]
    enum EncodedBody {
        Utf8(String),
        Base64(String),
    }

    pub fn serialize<S: Serializer>(body: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match body {
            None => s.serialize_none(),
            Some(bytes) => {
                let encoded = match std::str::from_utf8(bytes) {
                    Ok(text) => EncodedBody::Utf8(text.to_string()),
                    Err(_) => EncodedBody::Base64(STANDARD.encode(bytes)),
                };
                s.serialize_some(&encoded)
            }
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<EncodedBody>::deserialize(d)? {
            None => Ok(None),
            Some(EncodedBody::Utf8(text)) => Ok(Some(text.into_bytes())),
            Some(EncodedBody::Base64(data)) => STANDARD
                .decode(data)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// A stored packet. Never mutated once the store has assigned its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketRecord {
    pub id: PacketId,
    pub method: HttpMethod,
    /// Absolute URL, or a path resolved against the `Host` header at send time
    pub url: String,
    /// Response status; `None` until a response arrives
    pub status: Option<u16>,
    pub headers: HeaderList,
    #[serde(
        default,
        with = "body_encoding",
        skip_serializing_if = "Option::is_none"
    )]
    pub body: Option<Vec<u8>>,
    #[serde(default)]
    pub response_headers: HeaderList,
    #[serde(
        default,
        with = "body_encoding",
        skip_serializing_if = "Option::is_none"
    )]
    pub response_body: Option<Vec<u8>>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub origin: PacketOrigin,
}

impl PacketRecord {
    /// Listing view without bodies
    pub fn summary(&self) -> PacketSummary {
        PacketSummary {
            id: self.id,
            method: self.method,
            url: self.url.clone(),
            status: self.status,
            body_length: self.body.as_ref().map_or(0, |b| b.len() as u64),
            timestamp: self.timestamp,
            origin: self.origin.clone(),
        }
    }

    /// Drop both bodies, keeping everything else.
    pub fn without_bodies(mut self) -> Self {
        self.body = None;
        self.response_body = None;
        self
    }
}

/// A packet that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketDraft {
    pub method: HttpMethod,
    pub url: String,
    pub status: Option<u16>,
    pub headers: HeaderList,
    pub body: Option<Vec<u8>>,
    pub response_headers: HeaderList,
    pub response_body: Option<Vec<u8>>,
    pub timestamp: DateTime<Utc>,
    pub origin: PacketOrigin,
}

impl PacketDraft {
    /// Start a captured request draft timestamped now
    pub fn request(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            status: None,
            headers: HeaderList::new(),
            body: None,
            response_headers: HeaderList::new(),
            response_body: None,
            timestamp: Utc::now(),
            origin: PacketOrigin::Captured,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_response(
        mut self,
        status: u16,
        headers: HeaderList,
        body: Option<Vec<u8>>,
    ) -> Self {
        self.status = Some(status);
        self.response_headers = headers;
        self.response_body = body;
        self
    }

    pub fn with_origin(mut self, origin: PacketOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub(crate) fn into_record(self, id: PacketId) -> PacketRecord {
        PacketRecord {
            id,
            method: self.method,
            url: self.url,
            status: self.status,
            headers: self.headers,
            body: self.body,
            response_headers: self.response_headers,
            response_body: self.response_body,
            timestamp: self.timestamp,
            origin: self.origin,
        }
    }
}

/// Body-less row returned by history listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketSummary {
    pub id: PacketId,
    pub method: HttpMethod,
    pub url: String,
    pub status: Option<u16>,
    /// Request body length in bytes
    pub body_length: u64,
    pub timestamp: DateTime<Utc>,
    pub origin: PacketOrigin,
}
