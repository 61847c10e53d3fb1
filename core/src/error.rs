//! Error types for packet store, modification and resend operations

use crate::models::PacketId;
use thiserror::Error;

/// Errors surfaced by the four packet operations.
///
/// Per-attempt dispatch failures are not represented here; they are
/// aggregated into [`crate::models::ResendResult`] instead.
#[derive(Debug, Error)]
pub enum PacketError {
    /// No packet with the given id exists in the store
    #[error("packet {0} not found")]
    NotFound(PacketId),

    /// A caller-supplied argument is out of range
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A modification rule could not be compiled
    #[error("invalid modification rule at index {index}: {reason}")]
    InvalidRule { index: usize, reason: String },

    /// Missing or rejected access token
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The job runner stopped before producing a result
    #[error("resend job {0} aborted before completion")]
    JobAborted(String),

    /// Underlying storage failure
    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl PacketError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        PacketError::InvalidArgument(msg.into())
    }

    pub fn invalid_rule(index: usize, reason: impl Into<String>) -> Self {
        PacketError::InvalidRule {
            index,
            reason: reason.into(),
        }
    }

    /// Stable machine-readable name used in structured tool errors.
    pub fn kind(&self) -> &'static str {
        match self {
            PacketError::NotFound(_) => "not_found",
            PacketError::InvalidArgument(_) => "invalid_argument",
            PacketError::InvalidRule { .. } => "invalid_rule",
            PacketError::Unauthorized(_) => "unauthorized",
            PacketError::JobAborted(_) => "job_aborted",
            PacketError::Storage(_) => "storage",
        }
    }
}

/// Result type for packet operations
pub type PacketResult<T> = Result<T, PacketError>;
