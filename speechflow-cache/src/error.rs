use thiserror::Error;

/// Errors surfaced by the artifact cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error: {source}")]
    Io { source: std::io::Error },

    #[error("failed to fetch cache entry: {0}")]
    Fetch(#[source] Box<dyn std::error::Error + Send + Sync>),
}
