//! Channel configuration

use crate::layout::{grow_align16, MAX_PAYLOAD_BYTES, MAX_RING_SIZE};
use glcast_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Configuration the recorder publishes into the channel header.
///
/// Frozen once the channel is created; the producer only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Number of frame slots in the ring (1-1000)
    pub ring_buffer_size: u32,
    /// Upper bound on payload bytes per slot
    pub max_bytes: u32,
    /// Target capture rate; 0 disables pacing
    pub target_fps: u32,
    /// Bitset of `FLAG_*` values
    pub flags: u32,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            ring_buffer_size: 30,
            // 1920x1080 BGRA with a 16-byte-aligned stride
            max_bytes: 1080 * grow_align16(1920 * 4),
            target_fps: 30,
            flags: 0,
        }
    }
}

impl ChannelSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern: set ring size
    pub fn with_ring_buffer_size(mut self, slots: u32) -> Self {
        self.ring_buffer_size = slots;
        self
    }

    /// Builder pattern: set per-slot byte cap
    pub fn with_max_bytes(mut self, bytes: u32) -> Self {
        self.max_bytes = bytes;
        self
    }

    /// Builder pattern: set target frame rate
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = fps;
        self
    }

    /// Builder pattern: set flag bits
    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.ring_buffer_size == 0 || self.ring_buffer_size > MAX_RING_SIZE {
            return Err(Error::RingSize(self.ring_buffer_size));
        }
        if self.max_bytes == 0 || self.max_bytes > MAX_PAYLOAD_BYTES {
            return Err(Error::PayloadCap(self.max_bytes));
        }
        Ok(())
    }
}
