//! Caller-facing parameter types for the four packet operations.
//!
//! Numeric inputs are signed so out-of-range values reach validation and
//! come back as `InvalidArgument` instead of a decode error.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{PacketError, PacketResult};
use crate::models::{
    HistoryFilter, HttpMethod, ModificationRule, OriginKind, PageRequest, SortOrder,
    DEFAULT_PAGE_LIMIT,
};

/// Parameters for `get_history`
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct HistoryParams {
    /// Maximum number of packets to return (default: 100, max: 1000)
    #[serde(default)]
    pub limit: Option<i64>,
    /// Number of packets to skip (default: 0)
    #[serde(default)]
    pub offset: Option<i64>,
    /// Only packets with this HTTP method
    #[serde(default)]
    pub method: Option<String>,
    /// Only packets whose URL contains this text (case-insensitive)
    #[serde(default)]
    pub url_contains: Option<String>,
    /// Minimum response status (inclusive)
    #[serde(default)]
    pub status_min: Option<i64>,
    /// Maximum response status (inclusive)
    #[serde(default)]
    pub status_max: Option<i64>,
    /// "captured" or "resend"
    #[serde(default)]
    pub origin: Option<String>,
    /// "id asc" (default) or "id desc"
    #[serde(default)]
    pub order: Option<String>,
}

impl HistoryParams {
    pub fn page(&self) -> PacketResult<PageRequest> {
        PageRequest::new(
            self.limit.unwrap_or(DEFAULT_PAGE_LIMIT as i64),
            self.offset.unwrap_or(0),
        )
    }

    pub fn filter(&self) -> PacketResult<HistoryFilter> {
        let method = self
            .method
            .as_deref()
            .map(str::parse::<HttpMethod>)
            .transpose()
            .map_err(PacketError::InvalidArgument)?;

        let origin = match self.origin.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(o) if o.eq_ignore_ascii_case("captured") => Some(OriginKind::Captured),
            Some(o) if o.eq_ignore_ascii_case("resend") => Some(OriginKind::Resend),
            Some(other) => {
                return Err(PacketError::invalid_argument(format!(
                    "invalid origin '{other}', expected 'captured' or 'resend'"
                )))
            }
        };

        let status_min = self.status_min.map(|s| status_bound("status_min", s)).transpose()?;
        let status_max = self.status_max.map(|s| status_bound("status_max", s)).transpose()?;
        if let (Some(min), Some(max)) = (status_min, status_max) {
            if min > max {
                return Err(PacketError::invalid_argument(format!(
                    "status_min ({min}) is greater than status_max ({max})"
                )));
            }
        }

        Ok(HistoryFilter {
            method,
            url_contains: self.url_contains.clone().filter(|u| !u.is_empty()),
            status_min,
            status_max,
            origin,
        })
    }

    pub fn order(&self) -> PacketResult<SortOrder> {
        match self.order.as_deref() {
            None => Ok(SortOrder::default()),
            Some(raw) => raw.parse(),
        }
    }
}

fn status_bound(name: &str, value: i64) -> PacketResult<u16> {
    match u16::try_from(value) {
        Ok(status) if status <= 999 => Ok(status),
        _ => Err(PacketError::invalid_argument(format!(
            "{name} must be between 0 and 999, got {value}"
        ))),
    }
}

/// Parameters for `get_configs`
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ConfigParams {
    /// Categories to return, e.g. "listenPorts", "servers"; empty or "all" for everything
    #[serde(default)]
    pub categories: Option<Vec<String>>,
}

/// Parameters for `get_packet_detail`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PacketDetailParams {
    /// Packet id as returned by get_history
    pub packet_id: i64,
    /// Include request and response bodies (default: false)
    #[serde(default)]
    pub include_body: bool,
}

/// Parameters for `resend_packet`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResendParams {
    /// Packet to resend
    pub packet_id: i64,
    /// Access token authorizing the resend
    #[serde(default)]
    pub access_token: Option<String>,
    /// Number of times to send (default: 1)
    #[serde(default)]
    pub count: Option<i64>,
    /// Milliseconds to wait between sends (default: 0)
    #[serde(default)]
    pub interval_ms: Option<i64>,
    /// Edits applied, in order, before sending
    #[serde(default)]
    pub modifications: Vec<ModificationRule>,
    /// Return immediately with a job id instead of waiting (default: false)
    #[serde(default)]
    pub async_mode: bool,
    /// Let "add" append a header that already exists (default: false)
    #[serde(default)]
    pub allow_duplicate_headers: bool,
}

impl ResendParams {
    pub fn new(packet_id: i64, access_token: impl Into<String>) -> Self {
        Self {
            packet_id,
            access_token: Some(access_token.into()),
            count: None,
            interval_ms: None,
            modifications: Vec::new(),
            async_mode: false,
            allow_duplicate_headers: false,
        }
    }
}
