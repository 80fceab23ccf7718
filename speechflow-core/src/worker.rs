//! Worker coordination protocol (spec.md §4.7): parent↔worker messages for
//! running heavy transformers (Whisper, GTCRN, RNNoise) in an auxiliary
//! process.
//!
//! Framing is newline-delimited JSON over the worker's stdin/stdout — the
//! simplest framing that satisfies the message shapes in spec.md §4.7
//! without inventing a second binary protocol alongside the one in §4.6.
//! The cancellation/restart shape (a `CancellationToken` raced against the
//! next inbound message in a `tokio::select!`) is grounded in
//! `pmoaudio/src/pipeline.rs`'s child-task coordination and the
//! `AudioListenerHandle` restart pattern from the pack's STT-worker
//! reference file.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::error::Error;

const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ParentMessage {
    Open { params: serde_json::Value },
    Process { id: u64, data: serde_json::Value },
    Close,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerMessage {
    Ready,
    Failed { message: String },
    ProcessDone { id: u64, data: serde_json::Value },
    Log { level: String, message: String },
}

/// A handle to a running worker subprocess, driving the coordination
/// protocol over its stdin/stdout.
pub struct Worker {
    child: Child,
    stdin: tokio::process::ChildStdin,
    next_id: AtomicU64,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>>,
    cancel: CancellationToken,
    reader_task: Option<tokio::task::JoinHandle<()>>,
}

impl Worker {
    /// Spawns `program` and completes the open handshake, waiting up to
    /// `init_timeout` (default 60s, spec.md §4.7) for a `ready` message.
    pub async fn spawn(
        program: &str,
        args: &[&str],
        open_params: serde_json::Value,
        init_timeout: Option<Duration>,
    ) -> Result<Self, Error> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Resource(format!("failed to spawn worker: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Resource("worker stdin not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Resource("worker stdout not piped".into()))?;

        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();

        let reader_task = spawn_reader_task(stdout, pending.clone(), cancel.clone(), ready_tx);

        let mut worker = Self {
            child,
            stdin,
            next_id: AtomicU64::new(0),
            pending,
            cancel,
            reader_task: Some(reader_task),
        };

        worker
            .send(&ParentMessage::Open {
                params: open_params,
            })
            .await?;

        match tokio::time::timeout(init_timeout.unwrap_or(DEFAULT_INIT_TIMEOUT), ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(worker),
            Ok(Ok(Err(message))) => {
                let _ = worker.kill().await;
                Err(Error::Resource(format!("worker init failed: {message}")))
            }
            Ok(Err(_)) => {
                let _ = worker.kill().await;
                Err(Error::Resource("worker closed before becoming ready".into()))
            }
            Err(_) => {
                let _ = worker.kill().await;
                Err(Error::Transient("worker init timed out".into()))
            }
        }
    }

    async fn send(&mut self, message: &ParentMessage) -> Result<(), Error> {
        let mut line = serde_json::to_vec(message).map_err(|e| Error::Stream(e.to_string()))?;
        line.push(b'\n');
        self.stdin
            .write_all(&line)
            .await
            .map_err(|e| Error::Stream(format!("worker stdin write failed: {e}")))
    }

    /// Submits a task, correlating the monotonically increasing `id` to the
    /// returned future's completion (spec.md §4.7 correlation map).
    pub async fn process(&mut self, data: serde_json::Value) -> Result<serde_json::Value, Error> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        self.send(&ParentMessage::Process { id, data }).await?;

        rx.await
            .map_err(|_| Error::Resource("worker exited before completing task".into()))
    }

    pub async fn close(mut self) -> Result<(), Error> {
        self.send(&ParentMessage::Close).await?;
        self.cancel.cancel();
        if let Some(task) = self.reader_task.take() {
            let _ = task.await;
        }
        match self.child.wait().await {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(Error::Stream(format!(
                "worker exited non-zero during shutdown: {status}"
            ))),
            Err(e) => Err(Error::Resource(format!("failed to wait on worker: {e}"))),
        }
    }

    async fn kill(&mut self) -> Result<(), Error> {
        self.cancel.cancel();
        self.child
            .kill()
            .await
            .map_err(|e| Error::Resource(format!("failed to kill worker: {e}")))
    }
}

fn spawn_reader_task(
    stdout: tokio::process::ChildStdout,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>>,
    cancel: CancellationToken,
    ready_tx: oneshot::Sender<Result<(), String>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        let mut ready_tx = Some(ready_tx);

        loop {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                line = lines.next_line() => line,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "worker stdout read failed");
                    break;
                }
            };

            let message: WorkerMessage = match serde_json::from_str(&line) {
                Ok(m) => m,
                Err(e) => {
                    warn!(error = %e, line, "unparseable worker message, ignoring");
                    continue;
                }
            };

            match message {
                WorkerMessage::Ready => {
                    if let Some(tx) = ready_tx.take() {
                        let _ = tx.send(Ok(()));
                    }
                }
                WorkerMessage::Failed { message } => {
                    if let Some(tx) = ready_tx.take() {
                        let _ = tx.send(Err(message));
                    } else {
                        error!(message, "worker reported failure after init");
                    }
                }
                WorkerMessage::ProcessDone { id, data } => {
                    let sender = pending.lock().await.remove(&id);
                    match sender {
                        Some(tx) => {
                            let _ = tx.send(data);
                        }
                        None => warn!(id, "process-done for unknown task id"),
                    }
                }
                WorkerMessage::Log { level, message } => match level.as_str() {
                    "error" => error!(worker = true, "{}", message),
                    "warn" => warn!(worker = true, "{}", message),
                    _ => tracing::info!(worker = true, "{}", message),
                },
            }
        }

        // The worker is gone (cancelled, stdout EOF, or a read error): reject
        // every task still waiting on a reply instead of leaving its
        // `process()` caller hanging on `rx.await` forever.
        if let Some(tx) = ready_tx.take() {
            let _ = tx.send(Err("worker exited before reporting ready".into()));
        }
        let mut waiting = pending.lock().await;
        for (id, tx) in waiting.drain() {
            tracing::debug!(id, "rejecting pending task: worker exited");
            drop(tx);
        }
    })
}
