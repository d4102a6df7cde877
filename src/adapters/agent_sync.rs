//! Agent record synchronizer
//!
//! The local store is authoritative for agent metadata. Updates merge a
//! partial patch into the stored record, persist locally, and then mirror
//! the patch to the gateway on a background task. A gateway mirror failure
//! is logged and never fails the local update, and the gateway never
//! overwrites local state.

use crate::adapters::broadcast::Broadcaster;
use crate::adapters::gateway_client::GatewayClient;
use crate::adapters::keyed_lock::KeyedLocks;
use crate::domain::{AgentPatch, AgentRecord, ChangeNotification, CoreError};
use crate::persistence::AgentStore;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct AgentSynchronizer {
    store: Arc<dyn AgentStore>,
    gateway: Arc<GatewayClient>,
    broadcaster: Arc<Broadcaster>,
    updates: KeyedLocks,
}

impl AgentSynchronizer {
    pub fn new(
        store: Arc<dyn AgentStore>,
        gateway: Arc<GatewayClient>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            store,
            gateway,
            broadcaster,
            updates: KeyedLocks::new(),
        }
    }

    /// List all agents from the local store, most recently updated first.
    pub async fn list_agents(&self) -> Result<Vec<AgentRecord>, CoreError> {
        Ok(self.store.list_agents().await?)
    }

    /// Get a single agent from the local store.
    pub async fn get_agent(&self, id: &str) -> Result<AgentRecord, CoreError> {
        self.store
            .get_agent(id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                entity: "agent",
                identifier: id.to_string(),
            })
    }

    /// Merge a patch into a stored agent record.
    ///
    /// The merge and local persist complete before this returns; the
    /// gateway mirror runs on a spawned task and its outcome does not
    /// affect the result. Concurrent updates to the same agent are
    /// serialized so no patch is lost.
    pub async fn update_agent(
        &self,
        id: &str,
        patch: AgentPatch,
    ) -> Result<AgentRecord, CoreError> {
        // A patch with no fields changes nothing; skip the persist, mirror
        // and broadcast and return the stored record as-is.
        if patch.is_empty() {
            return self.get_agent(id).await;
        }

        let _guard = self.updates.acquire(id).await;

        let mut record = self
            .store
            .get_agent(id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                entity: "agent",
                identifier: id.to_string(),
            })?;

        record.apply(&patch, Utc::now());
        self.store.upsert_agent(&record).await?;
        debug!(agent_id = %id, "Agent record updated locally");

        self.mirror_to_gateway(id.to_string(), patch);

        self.broadcaster
            .broadcast(ChangeNotification::AgentUpdated(record.clone()))
            .await;

        Ok(record)
    }

    /// Best-effort mirror of the patch to the gateway. Failures are logged
    /// at warn level and otherwise dropped.
    fn mirror_to_gateway(&self, id: String, patch: AgentPatch) {
        let gateway = self.gateway.clone();
        tokio::spawn(async move {
            let result = gateway.update_agent(&id, &patch).await;
            if result.ok {
                debug!(agent_id = %id, "Agent update mirrored to gateway");
            } else {
                warn!(
                    agent_id = %id,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "Failed to mirror agent update to gateway"
                );
            }
        });
    }
}
