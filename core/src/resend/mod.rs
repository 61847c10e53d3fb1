//! Resend coordinator
//!
//! Replays a stored packet `count` times, optionally modified, and records
//! every delivered response as a new packet.

mod job;

pub use job::JobHandle;

use crate::error::{PacketError, PacketResult};
use crate::models::{JobProgress, JobState, ResendJob, ResendMode, ResendOutcome, ResendResult};
use crate::modify;
use crate::storage::PacketStore;
use crate::transport::{OutboundRequest, Transport};
use dashmap::DashMap;
use job::JobRunner;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use uuid::Uuid;

/// Upper bound on job handles kept for lookup
const MAX_TRACKED_JOBS: usize = 1024;

pub struct ResendCoordinator {
    store: Arc<PacketStore>,
    transport: Arc<dyn Transport>,
    jobs: DashMap<String, JobHandle>,
    /// Job ids in launch order, oldest first
    launch_order: Mutex<VecDeque<String>>,
}

impl ResendCoordinator {
    pub fn new(store: Arc<PacketStore>, transport: Arc<dyn Transport>) -> Self {
        Self {
            store,
            transport,
            jobs: DashMap::new(),
            launch_order: Mutex::new(VecDeque::new()),
        }
    }

    /// Run `job` to completion and return the tally.
    pub async fn resend(&self, job: ResendJob) -> PacketResult<ResendResult> {
        let handle = self.launch(job.with_mode(ResendMode::Sync)).await?;
        handle.wait().await
    }

    /// Start `job` in the background. Pre-flight errors (unknown packet,
    /// bad rule) are still reported here, before anything is sent.
    pub async fn resend_async(&self, job: ResendJob) -> PacketResult<JobHandle> {
        self.launch(job.with_mode(ResendMode::Async)).await
    }

    /// Run `job` according to its own [`ResendMode`].
    pub async fn execute(&self, job: ResendJob) -> PacketResult<ResendOutcome> {
        match job.mode {
            ResendMode::Sync => self.resend(job).await.map(ResendOutcome::Completed),
            ResendMode::Async => {
                let handle = self.resend_async(job).await?;
                Ok(ResendOutcome::Submitted(handle.status()))
            }
        }
    }

    /// Handle for a recently launched job
    pub fn job(&self, job_id: &str) -> Option<JobHandle> {
        self.jobs.get(job_id).map(|entry| entry.value().clone())
    }

    async fn launch(&self, job: ResendJob) -> PacketResult<JobHandle> {
        if job.count == 0 {
            return Err(PacketError::invalid_argument("count must be at least 1"));
        }

        let source = self.store.get(job.source_packet_id, true).await?;
        let template = modify::apply(&source, &job.modifications, job.header_policy)?;

        let job_id = Uuid::new_v4().to_string();
        let (tx, rx) = watch::channel(JobProgress::pending(
            job_id.clone(),
            source.id,
            job.count,
        ));
        let handle = JobHandle::new(job_id.clone(), rx);

        tx.send_modify(|p| p.state = JobState::Running);
        if job.mode == ResendMode::Async {
            tx.send_modify(|p| p.state = JobState::Detached);
        }

        tracing::info!(
            job_id = %job_id,
            source = source.id,
            count = job.count,
            interval_ms = job.interval.as_millis() as u64,
            rules = job.modifications.len(),
            mode = ?job.mode,
            "Starting resend job"
        );

        let runner = JobRunner {
            job_id: job_id.clone(),
            source_packet_id: source.id,
            count: job.count,
            interval: job.interval,
            request: OutboundRequest::from_record(&template),
            store: Arc::clone(&self.store),
            transport: Arc::clone(&self.transport),
            progress: tx,
        };
        tokio::spawn(runner.run());

        self.track(handle.clone());
        Ok(handle)
    }

    /// Register `handle`. Over the cap, finished jobs go first, then the
    /// oldest running ones; the job just launched is never evicted.
    fn track(&self, handle: JobHandle) {
        let mut order = self
            .launch_order
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let job_id = handle.job_id().to_string();
        self.jobs.insert(job_id.clone(), handle);
        order.push_back(job_id.clone());
        if order.len() <= MAX_TRACKED_JOBS {
            return;
        }

        order.retain(|id| {
            let finished = id != &job_id
                && self
                    .jobs
                    .get(id)
                    .map_or(true, |entry| entry.value().is_finished());
            if finished {
                self.jobs.remove(id);
            }
            !finished
        });
        // The new id sits at the back, so draining from the front keeps it.
        while order.len() > MAX_TRACKED_JOBS {
            let Some(oldest) = order.pop_front() else { break };
            tracing::debug!(job_id = %oldest, "Evicting running job from registry");
            self.jobs.remove(&oldest);
        }
    }
}
