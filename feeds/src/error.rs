//! Feed layer error types.

use ratemesh_common::ExchangeName;
use thiserror::Error;

/// Errors surfaced by quote sources and caching providers.
///
/// These stop at the registry boundary, where they are converted into
/// `ExchangeError` diagnostics; the orchestrator never sees them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    /// The quote source failed and no usable snapshot exists.
    #[error("Quote source failed: {0}")]
    SourceFailed(String),

    /// The cached snapshot outlived the validity window and the
    /// refresh that should replace it failed too.
    #[error("Quotes for {exchange} exceeded the validity window: {message}")]
    StaleExceeded {
        exchange: ExchangeName,
        message: String,
    },
}

/// Result type for feed operations.
pub type FeedResult<T> = Result<T, FeedError>;
