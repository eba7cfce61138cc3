//! Fetcher that drives the hub's download CLI as a child process.
//!
//! Progress is measured as bytes on disk under the destination directory, so
//! resumed downloads start from what is already there. A destination this
//! fetcher creates carries an owner marker; only an owned destination is
//! ever removed as a whole.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{FetchOutcome, FetchRequest, ProgressSink, RemoteFetcher, ToolOutput, TransferError};
use crate::config::HubqConfig;
use crate::job::{fingerprint, JobId, JobSpec, SelectionMode};
use crate::retry::{classify_io_error, classify_tool_failure};

const TAIL_LINES: usize = 40;
const TAIL_LINE_CHARS: usize = 512;

/// Written into a destination directory created by a job; holds its fingerprint.
const OWNER_MARKER: &str = ".hubq-owner";
/// Where the hub tool keeps in-flight downloads inside `--local-dir`.
const TOOL_DOWNLOAD_CACHE: &str = ".cache/huggingface/download";

/// Arguments for `<hub-cli> download ...` for one job.
pub fn build_args(spec: &JobSpec) -> Vec<String> {
    let mut args = vec![
        "download".to_string(),
        spec.repository_id.clone(),
        "--repo-type".to_string(),
        spec.repository_kind.as_str().to_string(),
        "--local-dir".to_string(),
        spec.destination.to_string_lossy().into_owned(),
    ];
    if let Some(rev) = &spec.revision {
        args.push("--revision".to_string());
        args.push(rev.clone());
    }
    if spec.selection == SelectionMode::Files {
        for f in &spec.files {
            args.push("--include".to_string());
            args.push(f.clone());
        }
    }
    args
}

/// Total size of regular files under `root`. Missing root counts as empty.
fn dir_size(root: &Path) -> u64 {
    let mut total = 0u64;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let Ok(ft) = entry.file_type() else { continue };
            if ft.is_dir() {
                stack.push(entry.path());
            } else if ft.is_file() && entry.file_name() != OWNER_MARKER {
                total += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
    }
    total
}

async fn measure(dest: &Path) -> u64 {
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || dir_size(&dest))
        .await
        .unwrap_or(0)
}

/// Last lines of tool output, kept for error classification.
#[derive(Default)]
struct OutputTail {
    lines: VecDeque<String>,
}

impl OutputTail {
    fn push(&mut self, line: &str) {
        // Progress bars redraw with '\r'; keep only the final frame.
        let line = line.rsplit('\r').next().unwrap_or(line).trim_end();
        if line.is_empty() {
            return;
        }
        let line: String = line.chars().take(TAIL_LINE_CHARS).collect();
        if self.lines.len() == TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    fn text(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

type SharedLog = Arc<tokio::sync::Mutex<tokio::fs::File>>;

/// Copy one output stream of the tool until EOF.
///
/// Bytes that are not UTF-8 are replaced rather than ending the read, so the
/// pipe stays open for the whole run.
async fn drain<R>(
    stream: R,
    tail: Arc<Mutex<OutputTail>>,
    log: Option<SharedLog>,
    progress: ProgressSink,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "tool output read failed");
                break;
            }
        }
        if let Some(log) = &log {
            let mut f = log.lock().await;
            let _ = f.write_all(&buf).await;
            if buf.last() != Some(&b'\n') {
                let _ = f.write_all(b"\n").await;
            }
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        if let Ok(mut t) = tail.lock() {
            t.push(line);
        }
        let frame = line.rsplit('\r').next().unwrap_or(line).trim_end();
        if !frame.is_empty() {
            progress.output(ToolOutput::Line {
                text: frame.chars().take(TAIL_LINE_CHARS).collect(),
            });
        }
    }
}

/// Create `dest` if needed and record whether this job owns it.
///
/// A directory created here is marked with the job's fingerprint. A directory
/// that already existed is never claimed, and a marker left by a different
/// job is removed since the directory is now shared.
async fn claim_destination(dest: &Path, owner: &str) -> io::Result<()> {
    let marker = dest.join(OWNER_MARKER);
    if !tokio::fs::try_exists(dest).await? {
        tokio::fs::create_dir_all(dest).await?;
        return tokio::fs::write(&marker, owner).await;
    }
    tokio::fs::create_dir_all(dest).await?;
    match tokio::fs::read_to_string(&marker).await {
        Ok(found) if found.trim() != owner => tokio::fs::remove_file(&marker).await,
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

async fn owns_destination(dest: &Path, owner: &str) -> bool {
    matches!(
        tokio::fs::read_to_string(dest.join(OWNER_MARKER)).await,
        Ok(found) if found.trim() == owner
    )
}

/// Incomplete downloads of `files` left by the tool inside `dest`.
fn incomplete_files(dest: &Path, files: &[String]) -> Vec<PathBuf> {
    let cache = dest.join(TOOL_DOWNLOAD_CACHE);
    let mut found = Vec::new();
    for file in files {
        let path = cache.join(file);
        let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
            continue;
        };
        let name = name.to_string_lossy();
        let Ok(entries) = std::fs::read_dir(dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let candidate = entry.file_name();
            let candidate = candidate.to_string_lossy();
            if candidate.starts_with(&format!("{name}.")) && candidate.ends_with(".incomplete") {
                found.push(entry.path());
            }
        }
    }
    found
}

async fn remove_path(path: &Path, dir: bool) -> Result<(), TransferError> {
    let removed = if dir {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match removed {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(classify_io_error(&e)),
    }
}

/// Runs `huggingface-cli download` (or a compatible tool) per job.
#[derive(Debug, Clone)]
pub struct HubCliFetcher {
    program: String,
    /// Arguments placed before `download` (e.g. `-m huggingface_hub.commands.huggingface_cli`).
    prefix_args: Vec<String>,
    poll_interval: Duration,
    log_dir: Option<PathBuf>,
}

impl HubCliFetcher {
    /// `command` is split on whitespace: the first word is the program.
    pub fn new(command: &str) -> Self {
        let mut words = command.split_whitespace().map(str::to_string);
        let program = words.next().unwrap_or_else(|| "huggingface-cli".to_string());
        Self::with_command(program, words.collect())
    }

    pub fn with_command(program: impl Into<String>, prefix_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            prefix_args,
            poll_interval: Duration::from_millis(500),
            log_dir: None,
        }
    }

    pub fn from_config(cfg: &HubqConfig) -> Self {
        Self::new(&cfg.hub_cli).with_poll_interval(Duration::from_millis(cfg.progress_poll_millis))
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(10));
        self
    }

    /// Write each job's tool output to `<dir>/job-<id>.log`.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    fn command_line(&self, args: &[String]) -> String {
        let mut words = vec![self.program.as_str()];
        words.extend(self.prefix_args.iter().map(String::as_str));
        words.extend(args.iter().map(String::as_str));
        words.join(" ")
    }

    async fn open_log(&self, job_id: JobId, command: &str) -> Option<SharedLog> {
        let dir = self.log_dir.as_ref()?;
        let path = dir.join(format!("job-{job_id}.log"));
        let opened = async {
            tokio::fs::create_dir_all(dir).await?;
            let mut f = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            f.write_all(format!("$ {command}\n").as_bytes()).await?;
            Ok::<_, io::Error>(f)
        }
        .await;
        match opened {
            Ok(f) => Some(Arc::new(tokio::sync::Mutex::new(f))),
            Err(e) => {
                tracing::warn!(job_id, path = %path.display(), error = %e, "cannot open job log");
                None
            }
        }
    }
}

#[async_trait]
impl RemoteFetcher for HubCliFetcher {
    async fn fetch(
        &self,
        request: FetchRequest,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<FetchOutcome, TransferError> {
        let spec = &request.spec;
        claim_destination(&spec.destination, &fingerprint(spec))
            .await
            .map_err(|e| classify_io_error(&e))?;

        let args = build_args(spec);
        let command = self.command_line(&args);
        let log = self.open_log(request.job_id, &command).await;

        let mut child = Command::new(&self.program)
            .args(&self.prefix_args)
            .args(&args)
            .env(
                "HF_HUB_ENABLE_HF_TRANSFER",
                if spec.transfer_acceleration { "1" } else { "0" },
            )
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| classify_io_error(&e))?;
        tracing::info!(
            job_id = request.job_id,
            repo = %spec.repository_id,
            pid = child.id().unwrap_or_default(),
            "hub tool started"
        );
        progress.output(ToolOutput::Started { command });

        let tail = Arc::new(Mutex::new(OutputTail::default()));
        let mut readers = Vec::new();
        if let Some(out) = child.stdout.take() {
            readers.push(tokio::spawn(drain(out, tail.clone(), log.clone(), progress.clone())));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(tokio::spawn(drain(err, tail.clone(), log.clone(), progress.clone())));
        }

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let status = loop {
            tokio::select! {
                status = child.wait() => break status.map_err(|e| classify_io_error(&e))?,
                _ = cancel.cancelled() => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    for r in readers {
                        r.abort();
                        let _ = r.await;
                    }
                    progress.output(ToolOutput::Exited { code: None });
                    progress.observe(measure(&spec.destination).await);
                    tracing::info!(job_id = request.job_id, "hub tool stopped");
                    return Ok(FetchOutcome::Interrupted);
                }
                _ = ticker.tick() => {
                    progress.observe(measure(&spec.destination).await);
                }
            }
        };

        for r in readers {
            let _ = r.await;
        }
        progress.output(ToolOutput::Exited {
            code: status.code(),
        });
        let on_disk = measure(&spec.destination).await;
        progress.observe(on_disk);

        if status.success() {
            progress.set_total(on_disk.max(progress.downloaded()));
            return Ok(FetchOutcome::Finished);
        }
        let output = tail.lock().map(|t| t.text()).unwrap_or_default();
        let err = classify_tool_failure(status.code(), &output);
        tracing::warn!(job_id = request.job_id, code = ?status.code(), error = %err, "hub tool failed");
        Err(err)
    }

    /// Remove what a cancelled job left behind, and nothing else.
    ///
    /// A destination the job created is removed whole. In a destination it
    /// shares, only the tool's incomplete downloads of the job's own files go.
    async fn discard_partial(&self, spec: &JobSpec) -> Result<(), TransferError> {
        let dest = &spec.destination;
        if owns_destination(dest, &fingerprint(spec)).await {
            tracing::info!(dest = %dest.display(), "removing destination of cancelled job");
            return remove_path(dest, true).await;
        }
        if spec.selection != SelectionMode::Files {
            tracing::info!(
                dest = %dest.display(),
                "destination not created by this job, leaving files in place"
            );
            return Ok(());
        }
        let dest_owned = dest.clone();
        let files = spec.files.clone();
        let partial = tokio::task::spawn_blocking(move || incomplete_files(&dest_owned, &files))
            .await
            .unwrap_or_default();
        for path in partial {
            remove_path(&path, false).await?;
        }
        Ok(())
    }
}
