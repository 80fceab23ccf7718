//! Async coordination primitives (spec.md §4.1).
//!
//! Grounded in the teacher's channel-based coordination idioms: unbounded
//! `mpsc` pairs for the FIFO buffering semantics this module requires
//! (`pipeline.rs`'s `Node<L>` wiring adapted from bounded to unbounded), a
//! `JoinSet` drain for the "await a set of tasks, swallow individual
//! failures" shape (`pipeline.rs` PHASE 2's child monitor), and
//! `tokio_util::sync::CancellationToken`-driven teardown.

use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::Error;

/// A one-slot FIFO handoff queue between a producer and a consumer, built on
/// an unbounded `mpsc` so `put` never blocks the producer (spec.md §4.1).
pub struct SingleQueue<T> {
    tx: mpsc::UnboundedSender<T>,
    rx: mpsc::UnboundedReceiver<T>,
    destroy: CancellationToken,
}

impl<T> SingleQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            destroy: CancellationToken::new(),
        }
    }

    /// Places `value`. Silently dropped once `destroy` has been called.
    pub async fn put(&self, value: T) -> Result<(), Error> {
        if self.destroy.is_cancelled() {
            return Ok(());
        }
        self.tx.send(value).map_err(|_| Error::Shutdown)
    }

    /// Waits for and removes the next value. A pending or future call
    /// rejects with [`Error::Stream`] as soon as `destroy` is called, even
    /// if it was already parked waiting for a value.
    pub async fn take(&mut self) -> Result<T, Error> {
        tokio::select! {
            biased;
            _ = self.destroy.cancelled() => Err(Error::Stream("queue destroyed".into())),
            value = self.rx.recv() => value.ok_or(Error::Shutdown),
        }
    }

    /// Rejects any pending or future `take()` with a destroyed failure and
    /// silently drops any further `put()`, distinct from the normal EOF this
    /// queue has no `close()` for (it has no in-band end-of-stream marker;
    /// [`AsyncQueue`] is the queue type that needs one).
    pub fn destroy(&self) {
        self.destroy.cancel();
    }

    /// A cloneable handle that can `destroy()` this queue from elsewhere,
    /// independent of whoever currently owns the queue for `take`/`put`.
    pub fn destroy_handle(&self) -> DestroyHandle {
        DestroyHandle {
            token: self.destroy.clone(),
        }
    }
}

impl<T> Default for SingleQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A multi-producer FIFO queue whose end-of-stream is signalled in-band by
/// a `None` sentinel rather than by closing the channel out from under a
/// reader mid-receive (spec.md §4.1 `AsyncQueue`).
pub struct AsyncQueue<T> {
    tx: mpsc::UnboundedSender<Option<T>>,
    rx: mpsc::UnboundedReceiver<Option<T>>,
    closed: bool,
    destroy: CancellationToken,
}

impl<T> AsyncQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            closed: false,
            destroy: CancellationToken::new(),
        }
    }

    pub fn sender(&self) -> AsyncQueueSender<T> {
        AsyncQueueSender {
            tx: self.tx.clone(),
            destroy: self.destroy.clone(),
        }
    }

    /// Pushes a value. Returns an error if the queue has already been
    /// closed via `close`; silently dropped once `destroy` has been called.
    pub fn push(&self, value: T) -> Result<(), Error> {
        if self.destroy.is_cancelled() {
            return Ok(());
        }
        if self.closed {
            return Err(Error::Stream("push after close".into()));
        }
        self.tx.send(Some(value)).map_err(|_| Error::Shutdown)
    }

    /// Marks end-of-stream: the next `next()` call (after draining anything
    /// already queued) returns `Ok(None)`.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.tx.send(None);
        }
    }

    /// Returns the next queued value, `Ok(None)` once `close` has been
    /// called and everything queued before it has been drained, or an
    /// `Err` as soon as `destroy` is called — even for a call already
    /// parked waiting for a value.
    pub async fn next(&mut self) -> Result<Option<T>, Error> {
        tokio::select! {
            biased;
            _ = self.destroy.cancelled() => Err(Error::Stream("queue destroyed".into())),
            value = self.rx.recv() => Ok(value.flatten()),
        }
    }

    /// Rejects any pending or future `next()` with a destroyed failure and
    /// silently drops any further `push()`, a distinct operation from the
    /// normal EOF `close()` signals (spec.md §4.1).
    pub fn destroy(&self) {
        self.destroy.cancel();
    }

    /// A cloneable handle that can `destroy()` this queue from elsewhere,
    /// independent of whoever currently owns the queue for `next`/`push`.
    pub fn destroy_handle(&self) -> DestroyHandle {
        DestroyHandle {
            token: self.destroy.clone(),
        }
    }
}

/// A cloneable handle to destroy a [`SingleQueue`]/[`AsyncQueue`] from a
/// task other than the one currently blocked in `take`/`next`.
#[derive(Clone)]
pub struct DestroyHandle {
    token: CancellationToken,
}

impl DestroyHandle {
    pub fn destroy(&self) {
        self.token.cancel();
    }
}

impl<T> Default for AsyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A cloneable handle for pushing into an [`AsyncQueue`] from multiple
/// producers.
#[derive(Clone)]
pub struct AsyncQueueSender<T> {
    tx: mpsc::UnboundedSender<Option<T>>,
    destroy: CancellationToken,
}

impl<T> AsyncQueueSender<T> {
    pub fn push(&self, value: T) -> Result<(), Error> {
        if self.destroy.is_cancelled() {
            return Ok(());
        }
        self.tx.send(Some(value)).map_err(|_| Error::Shutdown)
    }
}

/// Awaits a dynamically growing set of tasks, logging (not propagating)
/// individual join failures — the same "drain, don't fail the whole group
/// over one bad child" behavior as `pipeline.rs`'s child monitor.
pub struct PromiseSet<T> {
    set: JoinSet<T>,
}

impl<T: Send + 'static> PromiseSet<T> {
    pub fn new() -> Self {
        Self { set: JoinSet::new() }
    }

    pub fn add<F>(&mut self, future: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        self.set.spawn(future);
    }

    /// Awaits every task added so far, returning only the successful
    /// results; a panicking/cancelled task is logged and skipped.
    pub async fn await_all(mut self) -> Vec<T> {
        let mut results = Vec::new();
        while let Some(joined) = self.set.join_next().await {
            match joined {
                Ok(value) => results.push(value),
                Err(join_err) => warn!(error = %join_err, "task in promise set failed"),
            }
        }
        results
    }
}

impl<T: Send + 'static> Default for PromiseSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A drop guard that runs `f` exactly once, whether the scope exits
/// normally or via an early return/panic unwind — the `finally` half of
/// `run`/`runner` below.
pub struct Finally<F: FnMut()> {
    f: F,
}

impl<F: FnMut()> Finally<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F: FnMut()> Drop for Finally<F> {
    fn drop(&mut self) {
        (self.f)()
    }
}

/// Tags a failed `run`/`runner` outcome with the operation's description,
/// the way every caller-facing error from this module is expected to read
/// ("opening audio source: resource error: mic unavailable" rather than a
/// bare "resource error: mic unavailable").
fn tag_description(description: &str, err: Error) -> Error {
    match err {
        Error::Configuration(msg) => Error::Configuration(format!("{description}: {msg}")),
        Error::Resource(msg) => Error::Resource(format!("{description}: {msg}")),
        Error::Transient(msg) => Error::Transient(format!("{description}: {msg}")),
        Error::Stream(msg) => Error::Stream(format!("{description}: {msg}")),
        Error::Shutdown => Error::Shutdown,
        Error::Other(source) => {
            crate::error::ensure_error(Described {
                description: description.to_string(),
                source,
            })
        }
    }
}

#[derive(Debug)]
struct Described {
    description: String,
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl std::fmt::Display for Described {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.description, self.source)
    }
}

impl std::error::Error for Described {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Logs a failure (unless it's a shutdown), gives `recovery` a chance to
/// produce a fallback value, and otherwise tags the error with
/// `description` before returning it.
fn apply_recovery<T>(
    description: &str,
    err: Error,
    recovery: Option<&mut dyn FnMut(&Error) -> Option<T>>,
) -> Result<T, Error> {
    if !err.is_shutdown() {
        tracing::error!(description, error = %err, "run failed");
    }
    match recovery {
        Some(recover) => match recover(&err) {
            Some(value) => Ok(value),
            None => Err(tag_description(description, err)),
        },
        None => Err(tag_description(description, err)),
    }
}

/// Runs `body` once, attempting `recovery` on failure and always invoking
/// `finally` afterward regardless of outcome. A failure that isn't
/// recovered is returned tagged with `description` (spec.md §4.1 `run`).
pub async fn run<Fut, T>(
    description: &str,
    body: Fut,
    recovery: Option<&mut dyn FnMut(&Error) -> Option<T>>,
    mut finally: impl FnMut(),
) -> Result<T, Error>
where
    Fut: Future<Output = Result<T, Error>>,
{
    let outcome = match body.await {
        Ok(value) => Ok(value),
        Err(e) => apply_recovery(description, e, recovery),
    };
    finally();
    outcome
}

/// Like [`run`], but retries [`Error::Transient`] failures with the
/// [`crate::error::Backoff`] schedule before giving `recovery` a chance and
/// tagging the eventual failure with `description` (spec.md §4.1 `runner`).
pub async fn runner<F, Fut, T>(
    description: &str,
    mut body: F,
    recovery: Option<&mut dyn FnMut(&Error) -> Option<T>>,
    mut finally: impl FnMut(),
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut backoff = crate::error::Backoff::new();
    let outcome = loop {
        match body().await {
            Ok(value) => break Ok(value),
            Err(e) if e.is_transient() => match backoff.next_delay() {
                Some(delay) => {
                    warn!(description, error = %e, delay_ms = delay.as_millis() as u64, "retrying after transient error");
                    sleep(delay).await;
                }
                None => break apply_recovery(description, e, recovery),
            },
            Err(e) => break apply_recovery(description, e, recovery),
        }
    };
    finally();
    outcome
}

/// Cooperative sleep, re-exported so callers don't need a direct `tokio`
/// dependency for this one primitive.
pub async fn sleep(duration: std::time::Duration) {
    tokio::time::sleep(duration).await;
}

pub use crate::error::ensure_error;
