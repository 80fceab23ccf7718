//! Error taxonomy (spec.md §7).

use std::time::Duration;
use thiserror::Error;

/// The five error kinds spec.md §7 distinguishes, plus a catch-all for
/// foreign errors normalized by [`ensure_error`].
#[derive(Debug, Error)]
pub enum Error {
    /// Bad parameters, schema mismatch, or invalid graph wiring. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A required external resource (file, device, network peer) is
    /// unavailable. Never retried automatically.
    #[error("resource error: {0}")]
    Resource(String),

    /// A failure expected to be transient; callers may retry with backoff
    /// (base 1s, cap 5s, at most 10 attempts, per spec.md §7).
    #[error("transient error: {0}")]
    Transient(String),

    /// A stream-level protocol violation (backpressure violation, write
    /// after EOF, malformed frame).
    #[error("stream error: {0}")]
    Stream(String),

    /// Raised only during coordinated shutdown; never surfaced to callers
    /// above the node/graph boundary that triggered the shutdown.
    #[error("shutdown in progress")]
    Shutdown,

    /// Any other error, normalized via [`ensure_error`].
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Error::Shutdown)
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

/// Normalizes any error into an [`Error`], preserving it as the source chain
/// (spec.md §4.1 `ensureError`).
pub fn ensure_error<E>(err: E) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    Error::Other(Box::new(err))
}

/// An error plus a short human-readable description of what was being
/// attempted when it occurred, chained as the error's `source`.
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

/// Extension trait mirroring `anyhow::Context`: attaches a plain-text
/// description to any error convertible into [`Error`], so a failure deep in
/// a call chain surfaces with the context of what the caller was doing
/// (spec.md §4.1 `ensureError` made ergonomic on `Result`).
pub trait Context<T> {
    fn with_context(self, description: impl Into<String>) -> Result<T, Error>;
}

impl<T, E> Context<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn with_context(self, description: impl Into<String>) -> Result<T, Error> {
        self.map_err(|e| {
            Error::Other(Box::new(Described {
                description: description.into(),
                source: Box::new(e),
            }))
        })
    }
}

/// Exponential backoff schedule for [`Error::Transient`] retries:
/// base 1s, doubling, capped at 5s, at most 10 attempts.
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    pub const BASE: Duration = Duration::from_secs(1);
    pub const MAX: Duration = Duration::from_secs(5);
    pub const MAX_ATTEMPTS: u32 = 10;

    pub fn new() -> Self {
        Self { attempt: 0 }
    }

    /// Returns the delay before the next attempt, or `None` once
    /// `MAX_ATTEMPTS` has been exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= Self::MAX_ATTEMPTS {
            return None;
        }
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        let delay = Self::BASE.saturating_mul(factor).min(Self::MAX);
        self.attempt += 1;
        Some(delay)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
