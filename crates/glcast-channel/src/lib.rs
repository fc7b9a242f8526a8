//! GLCast Channel - Shared-memory frame transport
//!
//! A single-producer/single-consumer interprocess ring: the recorder
//! creates one main SysV segment (header + frame descriptor table) and one
//! payload segment per ring slot; the injected producer attaches to all of
//! them and publishes frames by advancing `write_pos`.
//!
//! No kernel synchronization crosses the process boundary. Ordering is
//! enforced by acquire/release fences around every read group and write
//! group of header fields.

pub mod channel;
pub mod layout;
pub mod settings;
pub mod shm;

pub use channel::{CaptureChannel, FrameView, HotkeyInfo};
pub use layout::{
    grow_align16, ring_distance, ChannelHeader, FrameDescriptor, FLAG_CAPTURE_FRONT,
    FLAG_LIMIT_FPS, FLAG_RECORD_CURSOR, MAX_PAYLOAD_BYTES, MAX_RING_SIZE,
};
pub use settings::ChannelSettings;
pub use shm::ShmSegment;
