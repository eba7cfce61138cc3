#![allow(dead_code)]

pub mod fake_hub;

use std::sync::Arc;
use std::time::Duration;

use hubq_core::auth::JwtAuthorizer;
use hubq_core::config::{HubqConfig, RetryConfig};
use hubq_core::gateway::ControlGateway;
use hubq_core::job::{DownloadJob, JobId};
use hubq_core::store::{JobStore, SqliteJobStore};
use hubq_core::Orchestrator;

use fake_hub::FakeHub;

pub const SECRET: &str = "integration-secret";

pub fn config(max_concurrent: usize) -> HubqConfig {
    HubqConfig {
        max_concurrent_downloads: max_concurrent,
        models_dir: std::env::temp_dir().join("hubq-tests"),
        cancel_grace_secs: 1,
        retry: RetryConfig {
            max_attempts: 3,
            base_delay_secs: 0.01,
            max_delay_secs: 1,
            ..RetryConfig::default()
        },
        ..HubqConfig::default()
    }
}

pub struct Service {
    pub orchestrator: Orchestrator,
    pub gateway: Arc<ControlGateway>,
    pub store: Arc<dyn JobStore>,
    pub hub: Arc<FakeHub>,
    pub token: String,
}

impl Service {
    pub fn cred(&self) -> Option<&str> {
        Some(self.token.as_str())
    }

    pub async fn job(&self, id: JobId) -> DownloadJob {
        self.store.get(id).await.unwrap()
    }

    /// Poll the store until `pred` holds for job `id` (5 s limit).
    pub async fn wait_until<F>(&self, id: JobId, what: &str, pred: F) -> DownloadJob
    where
        F: Fn(&DownloadJob) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let job = self.job(id).await;
            if pred(&job) {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {id}: timed out waiting for {what}; last state {:?} ({:?}, {} bytes)",
                job.status,
                job.stop_request,
                job.progress.bytes_downloaded
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub async fn shutdown(self) {
        self.orchestrator.shutdown().await.unwrap();
    }
}

pub async fn start(cfg: HubqConfig, hub: Arc<FakeHub>) -> Service {
    let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::open_memory().await.unwrap());
    start_with_store(cfg, hub, store).await
}

pub async fn start_with_store(
    cfg: HubqConfig,
    hub: Arc<FakeHub>,
    store: Arc<dyn JobStore>,
) -> Service {
    let auth = JwtAuthorizer::new(SECRET);
    let token = auth.issue("integration", None).unwrap();
    let orchestrator = Orchestrator::start(
        &cfg,
        Arc::clone(&store),
        hub.clone(),
        Arc::new(auth),
    )
    .await
    .unwrap();
    Service {
        gateway: orchestrator.gateway(),
        orchestrator,
        store,
        hub,
        token,
    }
}
