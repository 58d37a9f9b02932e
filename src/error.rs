//! Error types for zcomp-zstd.

use std::fmt;
use thiserror::Error;

/// Which half of the codec reported a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecStage {
    /// Compressing one page into a caller buffer.
    Compress,
    /// Decompressing a stored frame back into one page.
    Decompress,
}

impl fmt::Display for CodecStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compress => write!(f, "compress"),
            Self::Decompress => write!(f, "decompress"),
        }
    }
}

/// Errors that can occur in the backend.
///
/// Codec failures from both directions are reported through the single
/// [`Error::Codec`] variant; callers match on [`CodecStage`] when the
/// distinction matters.
#[derive(Debug, Error)]
pub enum Error {
    /// Both allocator tiers were exhausted. Fatal to the creation call in
    /// progress (which rolls back everything it allocated), never to the
    /// process.
    #[error("allocation failed: {requested} bytes unavailable in either tier")]
    AllocFailed {
        /// Bytes requested from the allocator.
        requested: usize,
    },

    /// A workspace was allocated but the codec rejected it during engine
    /// construction. The workspace is released before this propagates.
    #[error("engine init failed: {0}")]
    EngineInit(String),

    /// The codec reported an error for a specific buffer. Not retried, not
    /// fatal; the caller decides fallback behavior.
    #[error("codec {stage} error: {detail}")]
    Codec {
        /// Failing operation.
        stage: CodecStage,
        /// Codec diagnostic text.
        detail: String,
    },

    /// Caller-supplied output buffer is below the contract capacity.
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes needed.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// Stored data did not decode back to exactly one page.
    #[error("corrupted data: {0}")]
    CorruptedData(String),

    /// Input data or configuration is invalid.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, Error>;
