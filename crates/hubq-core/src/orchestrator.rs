//! Wires store, broadcaster, scheduler and gateway into one running service.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::auth::Authorizer;
use crate::broadcast::ProgressBroadcaster;
use crate::config::HubqConfig;
use crate::error::HubqError;
use crate::gateway::ControlGateway;
use crate::scheduler::{self, SchedulerConfig};
use crate::store::JobStore;
use crate::transfer::RemoteFetcher;

/// A running orchestrator. Drop without [`Orchestrator::shutdown`] leaves the
/// scheduler task running until the runtime stops.
pub struct Orchestrator {
    gateway: Arc<ControlGateway>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl Orchestrator {
    /// Recover jobs interrupted by a previous process, then start scheduling.
    pub async fn start(
        cfg: &HubqConfig,
        store: Arc<dyn JobStore>,
        fetcher: Arc<dyn RemoteFetcher>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Result<Self, HubqError> {
        let recovered = store.recover_interrupted().await?;
        if recovered > 0 {
            tracing::info!(recovered, "recovered interrupted jobs");
        }

        let broadcaster = Arc::new(ProgressBroadcaster::new(
            Arc::clone(&store),
            cfg.subscriber_buffer,
        ));
        let shutdown = CancellationToken::new();
        let (scheduler, task) = scheduler::spawn(
            SchedulerConfig::from(cfg),
            Arc::clone(&store),
            Arc::clone(&broadcaster),
            fetcher,
            shutdown.clone(),
        );
        let gateway = Arc::new(ControlGateway::new(
            store,
            scheduler.clone(),
            broadcaster,
            authorizer,
            cfg.models_dir.clone(),
        ));
        scheduler.kick();

        Ok(Self {
            gateway,
            shutdown,
            task,
        })
    }

    pub fn gateway(&self) -> Arc<ControlGateway> {
        Arc::clone(&self.gateway)
    }

    /// Stop all executors and wait for the scheduler to exit. Jobs that were
    /// downloading go back to `queued`.
    pub async fn shutdown(self) -> Result<(), HubqError> {
        self.shutdown.cancel();
        self.task
            .await
            .map_err(|e| HubqError::Internal(format!("scheduler task: {e}")))
    }
}
