use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{JobEventKind, ProgressBroadcaster};
use crate::job::{
    fingerprint, DownloadJob, JobSpec, JobStatus, RepoKind, SelectionMode, StopRequest,
};
use crate::state::{self, Action};
use crate::store::{mutate, JobStore, SqliteJobStore};
use crate::transfer::{ProgressEvent, ToolOutput};

fn spec(repo: &str) -> JobSpec {
    JobSpec {
        repository_id: repo.into(),
        repository_kind: RepoKind::Model,
        revision: None,
        selection: SelectionMode::Full,
        files: Vec::new(),
        destination: PathBuf::from("/models/x"),
        transfer_acceleration: false,
    }
}

async fn setup(buffer: usize) -> (Arc<ProgressBroadcaster>, Arc<dyn JobStore>) {
    let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::open_memory().await.unwrap());
    (Arc::new(ProgressBroadcaster::new(Arc::clone(&store), buffer)), store)
}

async fn downloading(store: &Arc<dyn JobStore>, repo: &str) -> DownloadJob {
    let s = spec(repo);
    let fp = fingerprint(&s);
    store.submit(s, fp).await.unwrap();
    store.claim_next_queued(&[]).await.unwrap().unwrap()
}

async fn next(watch: &mut super::JobWatch) -> super::JobEvent {
    tokio::time::timeout(Duration::from_secs(2), watch.next())
        .await
        .expect("event within timeout")
        .expect("stream open")
}

#[tokio::test]
async fn snapshot_comes_first_then_progress() {
    let (bus, store) = setup(16).await;
    let job = downloading(&store, "a/b").await;

    let mut watch = bus.subscribe(job.id).await.unwrap();
    bus.apply_progress(job.id, 1, Some(500), Some(1000)).await.unwrap();

    let first = next(&mut watch).await;
    assert_eq!(first.kind, JobEventKind::Snapshot);
    assert_eq!(first.job.job.progress.bytes_downloaded, 0);

    let second = next(&mut watch).await;
    assert_eq!(second.kind, JobEventKind::Progress);
    assert_eq!(second.job.job.progress.bytes_downloaded, 500);
    assert_eq!(second.job.job.progress.total_bytes, Some(1000));
    assert_eq!(store.get(job.id).await.unwrap().progress.bytes_downloaded, 500);
}

#[tokio::test]
async fn late_subscriber_sees_current_state_in_snapshot() {
    let (bus, store) = setup(16).await;
    let job = downloading(&store, "a/b").await;
    bus.apply_progress(job.id, 1, Some(700), None).await.unwrap();

    let mut watch = bus.subscribe(job.id).await.unwrap();
    let first = next(&mut watch).await;
    assert_eq!(first.kind, JobEventKind::Snapshot);
    assert_eq!(first.job.job.progress.bytes_downloaded, 700);
}

#[tokio::test]
async fn stale_attempt_progress_is_not_persisted() {
    let (bus, store) = setup(16).await;
    let job = downloading(&store, "a/b").await;
    bus.apply_progress(job.id, 2, Some(900), None).await.unwrap();
    assert_eq!(store.get(job.id).await.unwrap().progress.bytes_downloaded, 0);
}

#[tokio::test]
async fn subscribe_unknown_job_is_not_found() {
    let (bus, _store) = setup(16).await;
    let err = bus.subscribe(404).await.err().unwrap();
    assert_eq!(err.kind(), "NotFoundError");
    assert_eq!(bus.watched_jobs(), 0);
}

#[tokio::test]
async fn lagging_watcher_resyncs_from_store() {
    let (bus, store) = setup(2).await;
    let job = downloading(&store, "a/b").await;
    let mut watch = bus.subscribe(job.id).await.unwrap();
    assert_eq!(next(&mut watch).await.kind, JobEventKind::Snapshot);

    for n in 1..=20u64 {
        bus.apply_progress(job.id, 1, Some(n * 10), None).await.unwrap();
    }
    let resync = next(&mut watch).await;
    assert_eq!(resync.kind, JobEventKind::Snapshot);
    assert_eq!(resync.job.job.progress.bytes_downloaded, 200);
}

#[tokio::test]
async fn removed_event_ends_the_stream_and_drops_the_channel() {
    let (bus, store) = setup(16).await;
    let job = downloading(&store, "a/b").await;
    let mut watch = bus.subscribe(job.id).await.unwrap();
    assert_eq!(next(&mut watch).await.kind, JobEventKind::Snapshot);

    bus.publish(JobEventKind::Removed, job.clone());
    assert_eq!(next(&mut watch).await.kind, JobEventKind::Removed);
    assert!(watch.next().await.is_none());
    assert_eq!(bus.watched_jobs(), 0);
}

#[tokio::test]
async fn dropping_last_watcher_releases_channel() {
    let (bus, store) = setup(16).await;
    let job = downloading(&store, "a/b").await;
    let a = bus.subscribe(job.id).await.unwrap();
    let b = bus.subscribe(job.id).await.unwrap();
    assert_eq!(bus.watched_jobs(), 1);
    drop(a);
    assert_eq!(bus.watched_jobs(), 1);
    drop(b);
    assert_eq!(bus.watched_jobs(), 0);
}

#[tokio::test]
async fn fleet_watch_sees_every_job() {
    let (bus, store) = setup(16).await;
    let one = downloading(&store, "a/one").await;
    let two = downloading(&store, "a/two").await;

    let mut fleet = bus.subscribe_all().await.unwrap();
    let mut seen = Vec::new();
    for _ in 0..2 {
        let ev = fleet.next().await.unwrap();
        assert_eq!(ev.kind, JobEventKind::Snapshot);
        seen.push(ev.job_id());
    }
    assert_eq!(seen, vec![one.id, two.id]);

    let paused = store
        .update(two.id, mutate(|j, ctx| state::apply(j, Action::Pause, ctx)))
        .await
        .unwrap();
    bus.publish(JobEventKind::Status, paused.job);
    let ev = fleet.next().await.unwrap();
    assert_eq!(ev.kind, JobEventKind::Status);
    assert_eq!(ev.job_id(), two.id);
}

#[tokio::test]
async fn pump_coalesces_and_persists_final_count() {
    let (bus, store) = setup(16).await;
    let job = downloading(&store, "a/b").await;
    let (tx, rx) = mpsc::channel(32);
    for n in [100u64, 300, 200] {
        tx.send(ProgressEvent::Bytes { downloaded: n }).await.unwrap();
    }
    tx.send(ProgressEvent::Total { total: 1000 }).await.unwrap();
    drop(tx);

    bus.pump(job.id, 1, rx).await;
    let stored = store.get(job.id).await.unwrap();
    assert_eq!(stored.progress.bytes_downloaded, 300);
    assert_eq!(stored.progress.total_bytes, Some(1000));
    assert_eq!(stored.status, JobStatus::Downloading);
}

#[tokio::test]
async fn view_has_no_rate_outside_downloading() {
    let (bus, store) = setup(16).await;
    let job = downloading(&store, "a/b").await;
    bus.apply_progress(job.id, 1, Some(10), Some(100)).await.unwrap();
    let paused = store
        .update(job.id, mutate(|j, ctx| state::apply(j, Action::Pause, ctx)))
        .await
        .unwrap()
        .job;
    // Still downloading with a pending pause.
    assert_eq!(paused.status, JobStatus::Downloading);

    let mut other = paused.clone();
    other.status = JobStatus::Paused;
    let view = bus.view(other);
    assert_eq!(view.rate_bytes_per_sec, None);
    assert_eq!(view.eta_secs, None);
}

#[tokio::test]
async fn status_never_reports_fewer_bytes_than_already_seen() {
    let (bus, store) = setup(16).await;
    let job = downloading(&store, "a/b").await;
    let mut watch = bus.subscribe(job.id).await.unwrap();
    assert_eq!(next(&mut watch).await.kind, JobEventKind::Snapshot);

    let moved = bus.apply_progress(job.id, 1, Some(500), None).await.unwrap();
    assert_eq!(next(&mut watch).await.job.job.progress.bytes_downloaded, 500);

    // Committed before the progress write but published after it.
    let mut raced = moved.clone();
    raced.progress.bytes_downloaded = 0;
    raced.stop_request = Some(StopRequest::Pause);
    bus.publish(JobEventKind::Status, raced);
    let ev = next(&mut watch).await;
    assert_eq!(ev.kind, JobEventKind::Status);
    assert_eq!(ev.job.job.stop_request, Some(StopRequest::Pause));
    assert_eq!(ev.job.job.progress.bytes_downloaded, 500);

    let mut older = moved.clone();
    older.progress.bytes_downloaded = 100;
    bus.publish(JobEventKind::Progress, older);
    bus.publish(JobEventKind::Removed, moved);
    assert_eq!(next(&mut watch).await.kind, JobEventKind::Removed);
}

#[tokio::test]
async fn tool_output_reaches_job_watchers_only() {
    let (bus, store) = setup(16).await;
    let job = downloading(&store, "a/b").await;
    let mut watch = bus.subscribe(job.id).await.unwrap();
    let mut fleet = bus.subscribe_all().await.unwrap();
    assert_eq!(next(&mut watch).await.kind, JobEventKind::Snapshot);
    assert_eq!(fleet.next().await.unwrap().kind, JobEventKind::Snapshot);

    let (tx, rx) = mpsc::channel(8);
    let started = ToolOutput::Started {
        command: "huggingface-cli download a/b".into(),
    };
    let line = ToolOutput::Line {
        text: "Fetching 1 files".into(),
    };
    tx.send(ProgressEvent::Output(started.clone())).await.unwrap();
    tx.send(ProgressEvent::Bytes { downloaded: 40 }).await.unwrap();
    tx.send(ProgressEvent::Output(line.clone())).await.unwrap();
    drop(tx);
    bus.pump(job.id, 1, rx).await;

    assert_eq!(next(&mut watch).await.kind, JobEventKind::Progress);
    let first = next(&mut watch).await;
    assert_eq!(first.kind, JobEventKind::Output);
    assert_eq!(first.output, Some(started));
    let second = next(&mut watch).await;
    assert_eq!(second.output, Some(line));
    assert_eq!(second.job.job.progress.bytes_downloaded, 40);
    let json = serde_json::to_value(&second).unwrap();
    assert_eq!(json["kind"], "output");
    assert_eq!(json["output"]["stream"], "line");
    assert_eq!(json["output"]["text"], "Fetching 1 files");

    assert_eq!(fleet.next().await.unwrap().kind, JobEventKind::Progress);
    bus.publish(JobEventKind::Removed, second.job.job);
    assert_eq!(fleet.next().await.unwrap().kind, JobEventKind::Removed);
    assert_eq!(store.get(job.id).await.unwrap().progress.bytes_downloaded, 40);
}
