//! Error types for glcast

use thiserror::Error;

/// Main error type for glcast channel and capture operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid environment variable {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("Shared memory error: {0}")]
    Shm(String),

    #[error("Shared segment has wrong size: expected {expected} bytes, got {actual}")]
    SegmentSize { expected: usize, actual: usize },

    #[error("Ring buffer size {0} is out of range (1-1000)")]
    RingSize(u32),

    #[error("Frame byte cap {0} is out of range (max 1 GiB)")]
    PayloadCap(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using glcast's Error
pub type Result<T> = std::result::Result<T, Error>;
