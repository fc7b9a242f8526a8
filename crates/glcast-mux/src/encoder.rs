//! Encoder seam
//!
//! Encoders run their own tasks and feed packets into the muxer through a
//! [`crate::PacketSink`]. The muxer owns them and only ever needs two
//! capabilities from the outside.

/// Capability set the muxer requires of an encoder.
pub trait Encoder: Send {
    /// Request cessation. Non-blocking; must be safe to call from the
    /// muxer's drop thread while the worker is still running.
    fn stop(&self);

    /// Begin draining and flushing. The encoder is expected to end its
    /// stream (via its sink) once the flush completes.
    fn finish(&self);
}
