//! The packet service: the four caller-facing operations.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use super::params::{ConfigParams, HistoryParams, PacketDetailParams, ResendParams};
use crate::auth::{AccessGate, TrustStore};
use crate::config::{ConfigRegistry, ServiceConfig};
use crate::error::{PacketError, PacketResult};
use crate::models::{
    HeaderPolicy, HistoryPage, PacketId, PacketRecord, ResendJob, ResendMode, ResendOutcome,
};
use crate::resend::ResendCoordinator;
use crate::storage::PacketStore;
use crate::transport::Transport;

/// Bounds applied to `resend_packet` arguments
#[derive(Debug, Clone, Copy)]
struct ResendLimits {
    max_count: u32,
    max_interval_ms: u64,
}

/// Explicitly constructed service behind the tool surface.
pub struct PacketService {
    store: Arc<PacketStore>,
    coordinator: ResendCoordinator,
    gate: AccessGate,
    configs: ConfigRegistry,
    limits: ResendLimits,
}

impl PacketService {
    pub fn new(
        store: Arc<PacketStore>,
        transport: Arc<dyn Transport>,
        trust: Arc<dyn TrustStore>,
        configs: ConfigRegistry,
        config: &ServiceConfig,
    ) -> Self {
        Self {
            coordinator: ResendCoordinator::new(Arc::clone(&store), transport),
            store,
            gate: AccessGate::new(trust),
            configs,
            limits: ResendLimits {
                max_count: config.max_resend_count,
                max_interval_ms: config.max_interval_ms,
            },
        }
    }

    pub fn store(&self) -> &Arc<PacketStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &ResendCoordinator {
        &self.coordinator
    }

    /// One page of stored packets, without bodies.
    pub async fn get_history(&self, params: HistoryParams) -> PacketResult<HistoryPage> {
        let page = params.page()?;
        let filter = params.filter()?;
        let order = params.order()?;
        self.store.list(page, &filter, order).await
    }

    /// Configuration entries for the requested categories.
    pub fn get_configs(&self, params: ConfigParams) -> BTreeMap<String, Value> {
        self.configs.get(params.categories.as_deref())
    }

    pub async fn get_packet_detail(
        &self,
        params: PacketDetailParams,
    ) -> PacketResult<PacketRecord> {
        let id = packet_id(params.packet_id)?;
        self.store.get(id, params.include_body).await
    }

    /// Resend a stored packet.
    ///
    /// The access token is checked before anything else; a rejected call
    /// reads and writes nothing.
    pub async fn resend_packet(&self, params: ResendParams) -> PacketResult<ResendOutcome> {
        self.gate.authorize(params.access_token.as_deref())?;

        let id = packet_id(params.packet_id)?;
        let count = params.count.unwrap_or(1);
        if count < 1 || count > self.limits.max_count as i64 {
            return Err(PacketError::invalid_argument(format!(
                "count must be between 1 and {}, got {}",
                self.limits.max_count, count
            )));
        }
        let interval_ms = params.interval_ms.unwrap_or(0);
        if interval_ms < 0 || interval_ms as u64 > self.limits.max_interval_ms {
            return Err(PacketError::invalid_argument(format!(
                "interval_ms must be between 0 and {}, got {}",
                self.limits.max_interval_ms, interval_ms
            )));
        }

        tracing::info!(
            packet_id = id,
            count,
            interval_ms,
            async_mode = params.async_mode,
            "resend_packet"
        );

        let job = ResendJob::new(id)
            .with_count(count as u32)
            .with_interval_ms(interval_ms as u64)
            .with_modifications(params.modifications)
            .with_header_policy(HeaderPolicy::from(params.allow_duplicate_headers))
            .with_mode(ResendMode::from(params.async_mode));
        self.coordinator.execute(job).await
    }
}

fn packet_id(raw: i64) -> PacketResult<PacketId> {
    if raw < 0 {
        return Err(PacketError::invalid_argument(format!(
            "packet_id must be non-negative, got {raw}"
        )));
    }
    Ok(raw as PacketId)
}
