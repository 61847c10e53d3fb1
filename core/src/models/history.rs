//! Paging and filtering for history listings

use crate::error::{PacketError, PacketResult};
use crate::models::{HttpMethod, PacketSummary};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_LIMIT: usize = 100;
pub const MAX_PAGE_LIMIT: usize = 1000;

/// Validated `limit`/`offset` pair. A limit of zero yields an empty page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    limit: usize,
    offset: usize,
}

impl PageRequest {
    pub fn new(limit: i64, offset: i64) -> PacketResult<Self> {
        if limit < 0 {
            return Err(PacketError::invalid_argument(format!(
                "limit must be non-negative, got {limit}"
            )));
        }
        if limit as u64 > MAX_PAGE_LIMIT as u64 {
            return Err(PacketError::invalid_argument(format!(
                "limit must not exceed {MAX_PAGE_LIMIT}, got {limit}"
            )));
        }
        if offset < 0 {
            return Err(PacketError::invalid_argument(format!(
                "offset must be non-negative, got {offset}"
            )));
        }
        Ok(Self {
            limit: limit as usize,
            offset: offset as usize,
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

/// Restrict listings to captured or resend-generated packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginKind {
    Captured,
    Resend,
}

/// Optional filters for history listings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFilter {
    pub method: Option<HttpMethod>,
    /// Case-insensitive URL substring
    pub url_contains: Option<String>,
    /// Minimum status (inclusive)
    pub status_min: Option<u16>,
    /// Maximum status (inclusive)
    pub status_max: Option<u16>,
    pub origin: Option<OriginKind>,
}

impl HistoryFilter {
    pub fn is_empty(&self) -> bool {
        self == &HistoryFilter::default()
    }
}

/// Id ordering for history listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    IdAsc,
    IdDesc,
}

impl std::str::FromStr for SortOrder {
    type Err = PacketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<String> = s
            .split_whitespace()
            .map(|p| p.to_ascii_lowercase())
            .collect();
        match parts.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
            ["id"] | ["id", "asc"] => Ok(SortOrder::IdAsc),
            ["id", "desc"] => Ok(SortOrder::IdDesc),
            _ => Err(PacketError::invalid_argument(format!(
                "invalid order '{s}', expected 'id asc' or 'id desc'"
            ))),
        }
    }
}

/// One page of packet summaries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub packets: Vec<PacketSummary>,
    /// Number of packets matching the filter, ignoring paging
    pub total_count: u64,
    pub has_more: bool,
    pub limit: usize,
    pub offset: usize,
}
