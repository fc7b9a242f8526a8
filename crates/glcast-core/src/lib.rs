//! GLCast Core - Shared types for the capture and muxing pipeline
//!
//! This crate provides the foundational types used across all glcast
//! components: the common error type, rational time bases and timestamp
//! rescaling, and the monotonic clock the capture side stamps frames with.

pub mod error;
pub mod time;

pub use error::{Error, Result};
pub use time::{monotonic_us, rescale, Rational, NO_TIMESTAMP};
