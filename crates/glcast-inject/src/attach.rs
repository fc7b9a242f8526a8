//! Producer-side channel attach
//!
//! At startup the injected code reads the main segment id and the debug
//! flag from the environment, attaches to the main segment, validates its
//! size against the published configuration, and attaches every per-slot
//! payload segment. Any mismatch is fatal to the host process: the
//! recorder would otherwise read garbage frames.

use glcast_channel::layout::{
    main_segment_size, ChannelHeader, FrameDescriptor, MAX_PAYLOAD_BYTES, MAX_RING_SIZE,
};
use glcast_channel::ShmSegment;
use glcast_core::{Error, Result};
use std::sync::atomic::{fence, Ordering};
use tracing::info;

/// Environment variable carrying the decimal id of the main segment.
pub const SHM_ENV: &str = "SSR_GLINJECT_SHM";
/// Environment variable enabling per-call error probing when `> 0`.
pub const DEBUG_ENV: &str = "SSR_GLINJECT_DEBUG";

/// Exit status for fatal producer-side misconfiguration, distinctive
/// enough to be unmistakable in logs.
pub const FATAL_EXIT_CODE: i32 = -181818181;

/// The producer end of the capture channel: the main segment plus one
/// payload segment per ring slot, all attached read-write.
#[derive(Debug)]
pub struct ProducerChannel {
    main: ShmSegment,
    payloads: Vec<ShmSegment>,
    ring_size: u32,
    max_bytes: u32,
    target_fps: u32,
    flags: u32,
}

impl ProducerChannel {
    /// Attach using the segment id published in the environment.
    /// Returns the channel and whether debug mode is enabled.
    pub fn from_env() -> Result<(Self, bool)> {
        let id_str = std::env::var(SHM_ENV).map_err(|_| Error::MissingEnv(SHM_ENV))?;
        let main_id: i32 = id_str.trim().parse().map_err(|_| Error::InvalidEnv {
            name: SHM_ENV,
            value: id_str.clone(),
        })?;
        let debug = std::env::var(DEBUG_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<i32>().ok())
            .map(|v| v > 0)
            .unwrap_or(false);
        Ok((Self::attach(main_id)?, debug))
    }

    /// Attach to the main segment by id and to every payload segment it
    /// references, validating all sizes.
    pub fn attach(main_id: i32) -> Result<Self> {
        let main = ShmSegment::attach(main_id)?;
        if main.size() < std::mem::size_of::<ChannelHeader>() {
            return Err(Error::SegmentSize {
                expected: std::mem::size_of::<ChannelHeader>(),
                actual: main.size(),
            });
        }

        // The configuration block is frozen by the recorder before the id
        // is handed out; one acquire pairs with its publishing fence.
        let header = unsafe { &*(main.as_ptr() as *const ChannelHeader) };
        fence(Ordering::Acquire);
        let ring_size = header.ring_buffer_size.load(Ordering::Relaxed);
        let max_bytes = header.max_bytes.load(Ordering::Relaxed);
        let target_fps = header.target_fps.load(Ordering::Relaxed);
        let flags = header.flags.load(Ordering::Relaxed);
        fence(Ordering::Release);

        if ring_size == 0 || ring_size > MAX_RING_SIZE {
            return Err(Error::RingSize(ring_size));
        }
        if max_bytes > MAX_PAYLOAD_BYTES {
            return Err(Error::PayloadCap(max_bytes));
        }
        if main.size() != main_segment_size(ring_size) {
            return Err(Error::SegmentSize {
                expected: main_segment_size(ring_size),
                actual: main.size(),
            });
        }

        let mut channel = Self {
            main,
            payloads: Vec::with_capacity(ring_size as usize),
            ring_size,
            max_bytes,
            target_fps,
            flags,
        };

        for slot in 0..ring_size {
            let shm_id = channel.descriptor(slot).shm_id.load(Ordering::Relaxed);
            let payload = ShmSegment::attach(shm_id)?;
            if payload.size() != max_bytes as usize {
                return Err(Error::SegmentSize {
                    expected: max_bytes as usize,
                    actual: payload.size(),
                });
            }
            channel.payloads.push(payload);
        }

        info!(
            "Attached to capture channel {}: {} slots x {} bytes",
            main_id, ring_size, max_bytes
        );

        Ok(channel)
    }

    pub fn ring_size(&self) -> u32 {
        self.ring_size
    }

    pub fn max_bytes(&self) -> u32 {
        self.max_bytes
    }

    pub fn target_fps(&self) -> u32 {
        self.target_fps
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub(crate) fn header(&self) -> &ChannelHeader {
        unsafe { &*(self.main.as_ptr() as *const ChannelHeader) }
    }

    pub(crate) fn descriptor(&self, slot: u32) -> &FrameDescriptor {
        debug_assert!(slot < self.ring_size);
        unsafe {
            let base = self
                .main
                .as_ptr()
                .add(std::mem::size_of::<ChannelHeader>())
                as *const FrameDescriptor;
            &*base.add(slot as usize)
        }
    }

    pub(crate) fn payload_ptr(&self, slot: u32) -> *mut u8 {
        self.payloads[slot as usize].as_ptr()
    }
}

impl Drop for ProducerChannel {
    fn drop(&mut self) {
        // Detach in reverse order of attachment, payload segments first.
        while self.payloads.pop().is_some() {}
    }
}

/// Report a fatal producer-side error and terminate the host process with
/// the sentinel status. The injected code cannot assume a tracing
/// subscriber exists in the host, so this goes to standard error.
pub fn fatal_exit(err: &Error) -> ! {
    eprintln!("[glcast-inject] Error: {err}");
    std::process::exit(FATAL_EXIT_CODE);
}
