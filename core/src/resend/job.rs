//! Job handle and background runner

use crate::error::{PacketError, PacketResult};
use crate::models::{
    DispatchFailure, JobProgress, JobState, PacketDraft, PacketId, PacketOrigin, ResendResult,
};
use crate::storage::PacketStore;
use crate::transport::{DispatchOutcome, OutboundRequest, Transport};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Observer side of a launched job. Cloning is cheap; every clone sees the
/// same progress.
#[derive(Debug, Clone)]
pub struct JobHandle {
    job_id: String,
    progress: watch::Receiver<JobProgress>,
}

impl JobHandle {
    pub(crate) fn new(job_id: String, progress: watch::Receiver<JobProgress>) -> Self {
        Self { job_id, progress }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Current progress snapshot
    pub fn status(&self) -> JobProgress {
        self.progress.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.progress.borrow().state == JobState::Completed
    }

    /// Wait for the final result.
    ///
    /// Fails with [`PacketError::JobAborted`] if the runner went away without
    /// publishing one.
    pub async fn wait(&self) -> PacketResult<ResendResult> {
        let mut rx = self.progress.clone();
        let result = match rx.wait_for(|p| p.result.is_some()).await {
            Ok(progress) => progress.result.clone(),
            Err(_) => None,
        };
        result.ok_or_else(|| PacketError::JobAborted(self.job_id.clone()))
    }
}

/// Owns the only sender for a job's progress; dropping it without a result
/// marks the job aborted for every waiter.
pub(crate) struct JobRunner {
    pub(crate) job_id: String,
    pub(crate) source_packet_id: PacketId,
    pub(crate) count: u32,
    pub(crate) interval: Duration,
    pub(crate) request: OutboundRequest,
    pub(crate) store: Arc<PacketStore>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) progress: watch::Sender<JobProgress>,
}

impl JobRunner {
    pub(crate) async fn run(self) {
        let started = Instant::now();
        let mut packet_ids: Vec<PacketId> = Vec::with_capacity(self.count as usize);
        let mut failures: Vec<DispatchFailure> = Vec::new();

        for attempt in 1..=self.count {
            match self.transport.send(&self.request).await {
                DispatchOutcome::Delivered(response) => {
                    let draft = PacketDraft {
                        method: self.request.method,
                        url: self.request.url.clone(),
                        status: Some(response.status),
                        headers: self.request.headers.clone(),
                        body: self.request.body.clone(),
                        response_headers: response.headers,
                        response_body: Some(response.body),
                        timestamp: Utc::now(),
                        origin: PacketOrigin::Resend {
                            source_packet_id: self.source_packet_id,
                            job_id: self.job_id.clone(),
                            attempt,
                        },
                    };
                    match self.store.append(draft).await {
                        Ok(id) => packet_ids.push(id),
                        Err(e) => {
                            tracing::warn!(job_id = %self.job_id, attempt, "Failed to store resent packet: {e}");
                            failures.push(DispatchFailure {
                                attempt,
                                message: format!("response not stored: {}", e),
                            });
                        }
                    }
                }
                DispatchOutcome::Failed(message) => {
                    tracing::debug!(job_id = %self.job_id, attempt, %message, "Resend attempt failed");
                    failures.push(DispatchFailure { attempt, message });
                }
            }

            self.progress.send_modify(|p| {
                p.sent_count = packet_ids.len() as u32;
                p.failed_count = failures.len() as u32;
                p.packet_ids = packet_ids.clone();
            });

            if attempt < self.count && !self.interval.is_zero() {
                tokio::time::sleep(self.interval).await;
            }
        }

        let result = ResendResult {
            job_id: self.job_id.clone(),
            source_packet_id: self.source_packet_id,
            success: failures.is_empty(),
            sent_count: packet_ids.len() as u32,
            failed_count: failures.len() as u32,
            packet_ids,
            failures,
            execution_time_ms: started.elapsed().as_millis() as u64,
        };

        tracing::info!(
            job_id = %self.job_id,
            source = self.source_packet_id,
            sent = result.sent_count,
            failed = result.failed_count,
            elapsed_ms = result.execution_time_ms,
            "Resend job finished"
        );

        self.progress.send_modify(|p| {
            p.state = JobState::Completed;
            p.result = Some(result);
        });
    }
}
