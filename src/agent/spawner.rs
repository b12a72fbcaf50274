//! Agent Spawner Module
//!
//! Starts one task per roster entry, each with its own bus endpoint and a
//! child cancellation token, and tears them down at mission end.

use super::probe::TargetProbe;
use super::runner::AgentWorker;
use super::AgentSpec;
use crate::bus::{MessageBus, Payload, BusEndpoint};
use crate::config::AgentConfig;
use crate::types::Priority;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handle to a spawned agent task
pub struct AgentHandle {
    pub id: String,
    join: JoinHandle<()>,
}

/// Owns the agent tasks of one mission run
pub struct AgentSpawner {
    bus: Arc<MessageBus>,
    probe: Arc<dyn TargetProbe>,
    config: AgentConfig,
    mission_targets: Vec<String>,
    cancel: CancellationToken,
    handles: Vec<AgentHandle>,
}

impl Drop for AgentSpawner {
    fn drop(&mut self) {
        // Abort anything still running if the mission is torn down early
        for handle in self.handles.drain(..) {
            handle.join.abort();
        }
    }
}

impl AgentSpawner {
    pub fn new(
        bus: Arc<MessageBus>,
        probe: Arc<dyn TargetProbe>,
        config: AgentConfig,
        mission_targets: Vec<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            bus,
            probe,
            config,
            mission_targets,
            cancel,
            handles: Vec::new(),
        }
    }

    /// Register the agent on the bus and start its task
    pub async fn spawn(&mut self, spec: AgentSpec) -> String {
        let endpoint = self.bus.endpoint(&spec.id).await;
        let id = spec.id.clone();
        let worker = AgentWorker::new(spec, Arc::clone(&self.probe), self.config.clone(), &self.mission_targets);
        let token = self.cancel.child_token();

        let join = tokio::spawn(worker.run(endpoint, token));
        debug!(agent_id = %id, "Agent spawned");
        self.handles.push(AgentHandle { id: id.clone(), join });
        id
    }

    pub async fn spawn_batch(&mut self, specs: Vec<AgentSpec>) -> Vec<String> {
        let mut ids = Vec::with_capacity(specs.len());
        for spec in specs {
            ids.push(self.spawn(spec).await);
        }
        ids
    }

    pub fn agent_ids(&self) -> Vec<String> {
        self.handles.iter().map(|h| h.id.clone()).collect()
    }

    pub fn running(&self) -> usize {
        self.handles.iter().filter(|h| !h.join.is_finished()).count()
    }

    /// Broadcast shutdown from `commander`, give agents `grace` to exit,
    /// then abort whatever is left and retire every endpoint.
    pub async fn shutdown_all(&mut self, commander: &BusEndpoint, grace: Duration) {
        info!("Shutting down {} agents", self.handles.len());
        match commander.broadcast(Priority::Flash, Payload::Shutdown).await {
            Ok(receipt) if !receipt.saturated.is_empty() => {
                warn!(saturated = ?receipt.saturated, "Shutdown not delivered to every agent");
            }
            Ok(_) => {}
            Err(e) => warn!("Shutdown broadcast failed: {}", e),
        }

        let deadline = tokio::time::Instant::now() + grace;
        for handle in self.handles.drain(..) {
            let mut join = handle.join;
            if tokio::time::timeout_at(deadline, &mut join).await.is_err() {
                warn!(agent_id = %handle.id, "Agent did not exit within grace period, aborting");
                join.abort();
            }
            self.bus.retire(&handle.id).await;
        }
    }
}
