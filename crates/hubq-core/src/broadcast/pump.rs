use tokio::sync::mpsc;

use super::ProgressBroadcaster;
use crate::job::{DownloadJob, JobId};
use crate::transfer::{ProgressEvent, ToolOutput};

impl ProgressBroadcaster {
    /// Drain one executor run's progress channel into the store.
    ///
    /// Bursts already queued are folded into a single write; tool output in
    /// the burst is relayed afterwards, in order. Returns once every sender is
    /// dropped, after the final count has been persisted.
    pub async fn pump(&self, job_id: JobId, attempt: u32, mut rx: mpsc::Receiver<ProgressEvent>) {
        let mut last: Option<DownloadJob> = None;
        while let Some(first) = rx.recv().await {
            let mut bytes = None;
            let mut total = None;
            let mut output = Vec::new();
            let mut fold = |ev: ProgressEvent| match ev {
                ProgressEvent::Bytes { downloaded } => {
                    bytes = Some(bytes.map_or(downloaded, |b: u64| b.max(downloaded)));
                }
                ProgressEvent::Total { total: t } => total = Some(t),
                ProgressEvent::Output(o) => output.push(o),
            };
            fold(first);
            while let Ok(ev) = rx.try_recv() {
                fold(ev);
            }
            if bytes.is_some() || total.is_some() {
                match self.apply_progress(job_id, attempt, bytes, total).await {
                    Ok(job) => last = Some(job),
                    Err(e) => tracing::warn!(job_id, error = %e, "failed to persist progress"),
                }
            }
            if !output.is_empty() {
                self.relay_output(job_id, &mut last, output).await;
            }
        }
    }

    async fn relay_output(
        &self,
        job_id: JobId,
        last: &mut Option<DownloadJob>,
        output: Vec<ToolOutput>,
    ) {
        if !self.has_watchers(job_id) {
            return;
        }
        let job = match last.take() {
            Some(job) => job,
            None => match self.store().get(job_id).await {
                Ok(job) => job,
                Err(e) => {
                    tracing::debug!(job_id, error = %e, "dropping tool output");
                    return;
                }
            },
        };
        for o in output {
            self.publish_output(job.clone(), o);
        }
        *last = Some(job);
    }
}
