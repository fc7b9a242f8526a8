//! Container library seam
//!
//! The muxer drives a concrete container-format library (an FFmpeg-style
//! binding in production) through these traits. Only the worker thread
//! and pre-start/post-join lifecycle code ever touch a [`Container`].

use crate::error::MuxerResult;
use crate::packet::Packet;
use glcast_core::Rational;
use std::path::Path;

/// Description of a resolved output format.
#[derive(Debug, Clone)]
pub struct FormatDesc {
    pub name: String,
    pub long_name: String,
    /// Streams must carry codec headers out-of-band (global headers).
    pub needs_global_header: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

/// Codec parameters a stream is created with. The muxer seeds
/// `global_header` from the format before handing this to the container.
#[derive(Debug, Clone)]
pub struct CodecDesc {
    pub name: String,
    pub kind: MediaKind,
    /// Time base the encoder stamps packets in.
    pub time_base: Rational,
    pub global_header: bool,
}

impl CodecDesc {
    pub fn new(name: impl Into<String>, kind: MediaKind, time_base: Rational) -> Self {
        Self {
            name: name.into(),
            kind,
            time_base,
            global_header: false,
        }
    }
}

/// Entry points of the container library.
pub trait ContainerLibrary {
    /// Resolve an output format by name.
    fn guess_format(&self, name: &str) -> Option<FormatDesc>;

    /// Allocate a writing context for a resolved format.
    fn alloc_context(&self, format: FormatDesc) -> Box<dyn Container>;
}

/// One container writing context.
///
/// Stream indices are assigned densely from 0 by `new_stream`. The
/// context owns per-stream descriptors with their own time bases, which
/// the library may adjust when the header is written.
pub trait Container: Send {
    /// Open the output file for writing.
    fn open(&mut self, path: &Path) -> MuxerResult<()>;

    /// Add a stream and return its index.
    fn new_stream(&mut self, codec: CodecDesc) -> MuxerResult<usize>;

    fn stream_count(&self) -> usize;

    /// Time base the stream's encoder stamps packets in.
    fn codec_time_base(&self, stream: usize) -> Rational;

    /// Time base the container stores the stream's timestamps in.
    fn stream_time_base(&self, stream: usize) -> Rational;

    /// Running pts of the stream after its most recent interleaved write,
    /// in stream time-base ticks; [`glcast_core::NO_TIMESTAMP`] before the
    /// first write.
    fn stream_pts(&self, stream: usize) -> i64;

    fn write_header(&mut self) -> MuxerResult<()>;

    /// Write one packet, reordering internally as the format demands.
    /// On success the implementation takes the payload out of `packet`
    /// (via [`Packet::take_payload`]); the bytes then belong to the
    /// container.
    fn write_interleaved(&mut self, packet: &mut Packet) -> MuxerResult<()>;

    fn write_trailer(&mut self) -> MuxerResult<()>;

    /// Current output file position, for throughput statistics.
    fn bytes_written(&self) -> u64;

    /// Close the output file. Called at most once, after any trailer.
    fn close(&mut self);
}
