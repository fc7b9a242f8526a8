//! Error types for the muxer

use thiserror::Error;

/// Failures surfaced by muxer setup and runtime.
///
/// Setup failures (`Init`, `Start`) are returned to the caller, which must
/// treat the muxer as unusable and drop it. Runtime failures stay inside
/// the worker and are exposed through `Muxer::error_occurred`.
#[derive(Error, Debug)]
pub enum MuxerError {
    #[error("Can't find output format '{0}'")]
    FormatNotFound(String),

    #[error("Can't open output file: {0}")]
    Open(String),

    #[error("Can't create new stream")]
    StreamCreate,

    #[error("Too many streams (limit is {0})")]
    TooManyStreams(usize),

    #[error("Can't write header")]
    HeaderWrite,

    #[error("Can't write packet to container: {0}")]
    PacketWrite(String),

    #[error("Can't write trailer")]
    TrailerWrite,
}

/// Result type alias using [`MuxerError`]
pub type MuxerResult<T> = std::result::Result<T, MuxerError>;
