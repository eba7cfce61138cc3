//! Control socket: server (during `hubq serve`) and client (every other command).
//! Protocol: newline-delimited JSON, see [`super::protocol`].

use anyhow::{bail, Context, Result};
use hubq_core::broadcast::{FleetWatch, JobEvent, JobWatch};
use hubq_core::gateway::ControlGateway;
use hubq_core::JobId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

use super::protocol::{Envelope, Reply, Request};

type LineReader = Lines<BufReader<OwnedReadHalf>>;

/// Binds `path` (replacing a stale socket) and spawns the accept loop.
/// Each connection is served on its own task.
pub fn spawn_control_listener(
    gateway: Arc<ControlGateway>,
    path: impl AsRef<Path>,
) -> Result<JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    if path.exists() {
        std::fs::remove_file(&path)
            .with_context(|| format!("removing stale socket {}", path.display()))?;
    }
    let listener = UnixListener::bind(&path)
        .with_context(|| format!("binding control socket {}", path.display()))?;
    tracing::info!(path = %path.display(), "control socket listening");

    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let gateway = Arc::clone(&gateway);
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(gateway, stream).await {
                            tracing::debug!("control connection: {e:#}");
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

async fn serve_connection(gateway: Arc<ControlGateway>, stream: UnixStream) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let envelope: Envelope = match serde_json::from_str(line) {
            Ok(env) => env,
            Err(e) => {
                send(&mut write, &Reply::malformed(format!("malformed request: {e}"))).await?;
                continue;
            }
        };
        let token = envelope.token;
        match envelope.request {
            // A watch owns the rest of the connection.
            Request::Watch { id } => {
                return stream_events(&gateway, id, token.as_deref(), lines, write).await;
            }
            request => {
                let reply = dispatch(&gateway, request, token.as_deref()).await;
                send(&mut write, &reply).await?;
            }
        }
    }
    Ok(())
}

async fn dispatch(gateway: &ControlGateway, request: Request, token: Option<&str>) -> Reply {
    match request {
        Request::Submit { request } => Reply::from_result(gateway.submit(request, token).await),
        Request::Get { id } => Reply::from_result(gateway.get(id, token).await),
        Request::List { query } => Reply::from_result(gateway.list(&query, token).await),
        Request::Pause { id } => Reply::from_result(gateway.pause(id, token).await),
        Request::Resume { id } => Reply::from_result(gateway.resume(id, token).await),
        Request::Cancel { id } => Reply::from_result(gateway.cancel(id, token).await),
        Request::Retry { id, resume: false } => Reply::from_result(gateway.retry(id, token).await),
        Request::Retry { id, resume: true } => {
            Reply::from_result(gateway.retry_resuming(id, token).await)
        }
        Request::Remove { id } => Reply::from_result(gateway.remove(id, token).await),
        Request::Watch { .. } => Reply::malformed("watch is handled by the connection loop"),
    }
}

enum Watcher {
    One(JobWatch),
    All(FleetWatch),
}

impl Watcher {
    async fn next(&mut self) -> Option<JobEvent> {
        match self {
            Watcher::One(w) => w.next().await,
            Watcher::All(w) => w.next().await,
        }
    }
}

async fn stream_events(
    gateway: &ControlGateway,
    id: Option<JobId>,
    token: Option<&str>,
    mut lines: LineReader,
    mut write: OwnedWriteHalf,
) -> Result<()> {
    let watcher = match id {
        Some(id) => gateway.watch(id, token).await.map(Watcher::One),
        None => gateway.watch_all(token).await.map(Watcher::All),
    };
    let mut watcher = match watcher {
        Ok(w) => w,
        Err(e) => {
            send(&mut write, &Reply::from_result::<()>(Err(e))).await?;
            return Ok(());
        }
    };

    // Input after a watch is ignored; EOF means the client went away.
    let mut hangup = tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });

    let result = loop {
        tokio::select! {
            event = watcher.next() => match event {
                Some(event) => {
                    if let Err(e) = send(&mut write, &Reply::from_result(Ok(event))).await {
                        break Err(e);
                    }
                }
                None => break Ok(()),
            },
            _ = &mut hangup => break Ok(()),
        }
    };
    hangup.abort();
    result
}

async fn send(write: &mut OwnedWriteHalf, reply: &Reply) -> Result<()> {
    let mut line = serde_json::to_vec(reply)?;
    line.push(b'\n');
    write.write_all(&line).await?;
    Ok(())
}

/// One connection to a running daemon.
pub struct ControlClient {
    lines: LineReader,
    write: OwnedWriteHalf,
}

impl ControlClient {
    pub async fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).await.with_context(|| {
            format!(
                "connecting to {} (is `hubq serve` running?)",
                path.display()
            )
        })?;
        let (read, write) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(read).lines(),
            write,
        })
    }

    pub async fn send(&mut self, token: Option<&str>, request: Request) -> Result<()> {
        let envelope = Envelope {
            token: token.map(str::to_string),
            request,
        };
        let mut line = serde_json::to_vec(&envelope)?;
        line.push(b'\n');
        self.write.write_all(&line).await?;
        Ok(())
    }

    /// Send one request and decode its reply.
    pub async fn call<T: DeserializeOwned>(
        &mut self,
        token: Option<&str>,
        request: Request,
    ) -> Result<T> {
        self.send(token, request).await?;
        match self.next_reply().await? {
            Some(reply) => decode(reply),
            None => bail!("daemon closed the connection without replying"),
        }
    }

    /// Next event of a watch stream; `None` once the daemon ends it.
    pub async fn next_event(&mut self) -> Result<Option<JobEvent>> {
        match self.next_reply().await? {
            Some(reply) => decode(reply).map(Some),
            None => Ok(None),
        }
    }

    async fn next_reply(&mut self) -> Result<Option<Reply>> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            let reply = serde_json::from_str(&line).context("decoding daemon reply")?;
            return Ok(Some(reply));
        }
    }
}

fn decode<T: DeserializeOwned>(reply: Reply) -> Result<T> {
    match reply {
        Reply::Ok(value) => Ok(serde_json::from_value(value)?),
        Reply::Error(e) => bail!("{}: {}", e.kind, e.message),
    }
}

/// Serialize for printing.
pub fn to_pretty<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
