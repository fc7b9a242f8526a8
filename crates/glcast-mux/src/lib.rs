//! GLCast Mux - Multi-stream container muxing
//!
//! The muxer consumes encoded packet streams from up to [`MAX_STREAMS`]
//! encoders, orders them by presentation time, and writes one container
//! file through the [`Container`] seam. A single worker thread does all
//! container writes; encoders only ever touch their own stream queue.

pub mod container;
pub mod encoder;
pub mod error;
pub mod muxer;
pub mod packet;

pub use container::{CodecDesc, Container, ContainerLibrary, FormatDesc, MediaKind};
pub use encoder::Encoder;
pub use error::{MuxerError, MuxerResult};
pub use muxer::{Muxer, PacketSink, MAX_STREAMS};
pub use packet::Packet;
