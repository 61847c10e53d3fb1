//! Outbound network transport used by the resend engine

mod reqwest_transport;

pub use reqwest_transport::ReqwestTransport;

use crate::models::{HeaderList, HttpMethod, PacketRecord};
use async_trait::async_trait;
use std::time::Duration;

/// The request actually put on the wire for one attempt
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HeaderList,
    pub body: Option<Vec<u8>>,
}

impl OutboundRequest {
    pub fn from_record(record: &PacketRecord) -> Self {
        Self {
            method: record.method,
            url: record.url.clone(),
            headers: record.headers.clone(),
            body: record.body.clone(),
        }
    }
}

/// Response observed for a delivered request
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedResponse {
    pub status: u16,
    pub headers: HeaderList,
    pub body: Vec<u8>,
    pub elapsed: Duration,
}

/// Result of a single dispatch
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Delivered(CapturedResponse),
    /// Connection, TLS, timeout or URL failure
    Failed(String),
}

/// Sends one request and reports what happened.
///
/// Implementations never panic on network errors; every problem is reported
/// as [`DispatchOutcome::Failed`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &OutboundRequest) -> DispatchOutcome;
}
