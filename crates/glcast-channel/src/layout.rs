//! Binary layout of the shared channel
//!
//! The main segment starts with a fixed [`ChannelHeader`] followed
//! immediately by `ring_buffer_size` copies of [`FrameDescriptor`]. All
//! multibyte fields use host byte order; the channel is not portable
//! across machines.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ ChannelHeader                         (64 B) │
//! ├──────────────────────────────────────────────┤
//! │ FrameDescriptor[0]                    (24 B) │
//! ├──────────────────────────────────────────────┤
//! │ ...                                          │
//! ├──────────────────────────────────────────────┤
//! │ FrameDescriptor[ring_buffer_size - 1]        │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Each descriptor names a separately mapped payload segment of exactly
//! `max_bytes`, holding a tightly packed 32-bit BGRA image with stride
//! `grow_align16(width * 4)`, rows bottom-to-top.

use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32};

/// Composite the hardware cursor into captured frames.
pub const FLAG_RECORD_CURSOR: u32 = 0x1;
/// Sleep to hold the producer at `target_fps` instead of dropping frames.
pub const FLAG_LIMIT_FPS: u32 = 0x2;
/// Read the front buffer instead of the back buffer.
pub const FLAG_CAPTURE_FRONT: u32 = 0x4;

/// Upper bound on the number of ring slots.
pub const MAX_RING_SIZE: u32 = 1000;
/// Upper bound on the per-slot payload size (1 GiB).
pub const MAX_PAYLOAD_BYTES: u32 = 1024 * 1024 * 1024;

/// Fixed-layout record at the start of the main shared segment.
///
/// Fits in one cache line so the header never false-shares with the
/// descriptor table. Field ownership is split between the two processes:
/// the recorder freezes the configuration block before handing out the
/// segment id and only ever writes `read_pos` and the hotkey configuration;
/// the producer only writes `write_pos`, the current geometry,
/// `frame_counter` and `hotkey_counter`.
#[repr(C)]
pub struct ChannelHeader {
    pub ring_buffer_size: AtomicU32,
    pub max_bytes: AtomicU32,
    pub target_fps: AtomicU32,
    pub flags: AtomicU32,
    pub read_pos: AtomicU32,
    pub write_pos: AtomicU32,
    pub current_width: AtomicU32,
    pub current_height: AtomicU32,
    pub frame_counter: AtomicU32,
    pub hotkey_enabled: AtomicU32,
    pub hotkey_keycode: AtomicU32,
    pub hotkey_modifiers: AtomicU32,
    pub hotkey_counter: AtomicU32,
    _pad: [u32; 3],
}

/// One ring slot: the id of its payload segment plus the geometry and
/// timestamp the producer fills in before publishing the slot.
#[repr(C)]
pub struct FrameDescriptor {
    pub shm_id: AtomicI32,
    _pad: u32,
    pub timestamp: AtomicI64,
    pub width: AtomicU32,
    pub height: AtomicU32,
}

/// Row stride for a BGRA image of the given width: `width * 4` grown to a
/// multiple of 16 bytes.
pub const fn grow_align16(bytes: u32) -> u32 {
    (bytes + 15) & !15
}

/// Number of unread frames given the two cursors. Cursors live in
/// `[0, 2 * ring_size)` so that a full ring (`distance == ring_size`) is
/// distinguishable from an empty one.
pub const fn ring_distance(write_pos: u32, read_pos: u32, ring_size: u32) -> u32 {
    (write_pos + 2 * ring_size - read_pos) % (2 * ring_size)
}

/// Byte size of a main segment holding `ring_size` slots.
pub fn main_segment_size(ring_size: u32) -> usize {
    std::mem::size_of::<ChannelHeader>()
        + std::mem::size_of::<FrameDescriptor>() * ring_size as usize
}
