//! GLCast Inject - Producer side of the capture channel
//!
//! This crate is loaded into the captured process by the graphics-call
//! interceptor (which itself stays external). At every buffer swap the
//! interceptor looks up the grabber for the current drawable in the
//! process-wide [`registry`] and calls [`FrameGrabber::grab_frame`], which
//! reads back the rendered frame and publishes it into the shared-memory
//! ring created by the recorder.
//!
//! The graphics pipeline is reached through the [`GlCapture`] facade so the
//! grabber state machine stays independent of the concrete GL binding.

pub mod attach;
pub mod cursor;
pub mod gl;
pub mod grabber;
pub mod registry;

pub use attach::{fatal_exit, ProducerChannel, DEBUG_ENV, FATAL_EXIT_CODE, SHM_ENV};
pub use gl::{CursorImage, GlCapture, ReadBuffer, SavedPixelState};
pub use grabber::FrameGrabber;
