//! Resend job, progress and result models

use crate::models::{HeaderPolicy, ModificationRule, PacketId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Whether the caller waits for every attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResendMode {
    /// Block until the final attempt has been recorded
    #[default]
    Sync,
    /// Hand back a job handle right away and keep sending in the background
    Async,
}

impl From<bool> for ResendMode {
    fn from(async_mode: bool) -> Self {
        if async_mode {
            ResendMode::Async
        } else {
            ResendMode::Sync
        }
    }
}

/// One resend request
#[derive(Debug, Clone)]
pub struct ResendJob {
    pub source_packet_id: PacketId,
    pub count: u32,
    /// Pause between consecutive dispatches; none after the last one
    pub interval: Duration,
    pub modifications: Vec<ModificationRule>,
    pub header_policy: HeaderPolicy,
    pub mode: ResendMode,
}

impl ResendJob {
    pub fn new(source_packet_id: PacketId) -> Self {
        Self {
            source_packet_id,
            count: 1,
            interval: Duration::ZERO,
            modifications: Vec::new(),
            header_policy: HeaderPolicy::default(),
            mode: ResendMode::default(),
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval = Duration::from_millis(interval_ms);
        self
    }

    pub fn with_modifications(mut self, modifications: Vec<ModificationRule>) -> Self {
        self.modifications = modifications;
        self
    }

    pub fn with_header_policy(mut self, policy: HeaderPolicy) -> Self {
        self.header_policy = policy;
        self
    }

    pub fn with_mode(mut self, mode: ResendMode) -> Self {
        self.mode = mode;
        self
    }
}

/// A single attempt the transport reported as failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchFailure {
    /// 1-based attempt number
    pub attempt: u32,
    pub message: String,
}

/// Final accounting of a resend job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResendResult {
    pub job_id: String,
    pub source_packet_id: PacketId,
    /// True when no attempt failed
    pub success: bool,
    pub sent_count: u32,
    pub failed_count: u32,
    /// Ids of the packets recorded for successful attempts, in send order
    pub packet_ids: Vec<PacketId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<DispatchFailure>,
    pub execution_time_ms: u64,
}

/// Lifecycle of a resend job.
///
/// Sync jobs go `Pending -> Running -> Completed`; async jobs go
/// `Pending -> Running -> Detached -> Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Detached,
    Completed,
}

/// Point-in-time view of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: String,
    pub source_packet_id: PacketId,
    pub state: JobState,
    pub count: u32,
    pub sent_count: u32,
    pub failed_count: u32,
    pub packet_ids: Vec<PacketId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResendResult>,
}

impl JobProgress {
    pub(crate) fn pending(job_id: String, source_packet_id: PacketId, count: u32) -> Self {
        Self {
            job_id,
            source_packet_id,
            state: JobState::Pending,
            count,
            sent_count: 0,
            failed_count: 0,
            packet_ids: Vec::new(),
            result: None,
        }
    }
}

/// What a resend call hands back: the final tally for sync jobs, a progress
/// snapshot for detached ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResendOutcome {
    Completed(ResendResult),
    Submitted(JobProgress),
}

impl ResendOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            ResendOutcome::Completed(result) => &result.job_id,
            ResendOutcome::Submitted(progress) => &progress.job_id,
        }
    }
}
