//! Recorder-side channel owner
//!
//! Creates the shared segments, publishes the configuration block, and
//! consumes published frames. The consumer only ever writes `read_pos`,
//! the hotkey configuration, and (once, at creation) the configuration
//! block and descriptor table.

use crate::layout::{
    grow_align16, main_segment_size, ring_distance, ChannelHeader, FrameDescriptor,
};
use crate::settings::ChannelSettings;
use crate::shm::ShmSegment;
use glcast_core::Result;
use std::sync::atomic::{fence, Ordering};
use tracing::info;

/// Hotkey configuration snapshot, as seen by either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotkeyInfo {
    pub enabled: bool,
    pub keycode: u32,
    pub modifiers: u32,
}

/// A published frame, borrowed from its ring slot.
///
/// Valid to read only while `read_pos` still points at (or before) the
/// slot; `pop()` invalidates it. Rows are stored bottom-up with a
/// 16-byte-aligned stride.
pub struct FrameView<'a> {
    pub timestamp: i64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub data: &'a [u8],
}

/// The consumer end of the capture channel.
pub struct CaptureChannel {
    main: ShmSegment,
    payloads: Vec<ShmSegment>,
    ring_size: u32,
    max_bytes: u32,
    last_hotkey_counter: u32,
}

impl CaptureChannel {
    /// Allocate the shared segments and publish the configuration.
    pub fn create(settings: &ChannelSettings) -> Result<Self> {
        settings.validate()?;

        let main = ShmSegment::create(main_segment_size(settings.ring_buffer_size))?;
        unsafe { main.as_ptr().write_bytes(0, main.size()) };

        let mut payloads = Vec::with_capacity(settings.ring_buffer_size as usize);
        for _ in 0..settings.ring_buffer_size {
            payloads.push(ShmSegment::create(settings.max_bytes as usize)?);
        }

        let channel = Self {
            main,
            payloads,
            ring_size: settings.ring_buffer_size,
            max_bytes: settings.max_bytes,
            last_hotkey_counter: 0,
        };

        // Publish the configuration block and the descriptor table, then
        // fence so a producer attaching later observes it fully written.
        let header = channel.header();
        header.ring_buffer_size.store(settings.ring_buffer_size, Ordering::Relaxed);
        header.max_bytes.store(settings.max_bytes, Ordering::Relaxed);
        header.target_fps.store(settings.target_fps, Ordering::Relaxed);
        header.flags.store(settings.flags, Ordering::Relaxed);
        for (i, seg) in channel.payloads.iter().enumerate() {
            channel.descriptor(i as u32).shm_id.store(seg.id(), Ordering::Relaxed);
        }
        fence(Ordering::Release);

        info!(
            "Capture channel created: id {}, {} slots x {} bytes",
            channel.main.id(),
            settings.ring_buffer_size,
            settings.max_bytes
        );

        Ok(channel)
    }

    /// Id of the main segment, handed to the producer via the environment.
    pub fn main_id(&self) -> i32 {
        self.main.id()
    }

    pub fn ring_size(&self) -> u32 {
        self.ring_size
    }

    pub fn max_bytes(&self) -> u32 {
        self.max_bytes
    }

    fn header(&self) -> &ChannelHeader {
        unsafe { &*(self.main.as_ptr() as *const ChannelHeader) }
    }

    fn descriptor(&self, slot: u32) -> &FrameDescriptor {
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

    /// Number of published frames not yet consumed.
    pub fn frames_ready(&self) -> u32 {
        fence(Ordering::Acquire);
        let read_pos = self.header().read_pos.load(Ordering::Relaxed);
        let write_pos = self.header().write_pos.load(Ordering::Relaxed);
        ring_distance(write_pos, read_pos, self.ring_size)
    }

    /// The oldest unconsumed frame, if any.
    pub fn front(&self) -> Option<FrameView<'_>> {
        if self.frames_ready() == 0 {
            return None;
        }
        fence(Ordering::Acquire);
        let read_pos = self.header().read_pos.load(Ordering::Relaxed);
        let slot = read_pos % self.ring_size;
        let desc = self.descriptor(slot);
        let timestamp = desc.timestamp.load(Ordering::Relaxed);
        let width = desc.width.load(Ordering::Relaxed);
        let height = desc.height.load(Ordering::Relaxed);
        let stride = grow_align16(width * 4);
        let len = (stride as usize) * (height as usize);
        debug_assert!(len <= self.max_bytes as usize);
        let data =
            unsafe { std::slice::from_raw_parts(self.payloads[slot as usize].as_ptr(), len) };
        Some(FrameView {
            timestamp,
            width,
            height,
            stride,
            data,
        })
    }

    /// Consume the oldest frame, freeing its slot for the producer.
    pub fn pop(&self) {
        let header = self.header();
        fence(Ordering::Acquire);
        let read_pos = header.read_pos.load(Ordering::Relaxed);
        let write_pos = header.write_pos.load(Ordering::Relaxed);
        if ring_distance(write_pos, read_pos, self.ring_size) == 0 {
            return;
        }
        header
            .read_pos
            .store((read_pos + 1) % (2 * self.ring_size), Ordering::Relaxed);
        fence(Ordering::Release);
    }

    /// Most recently observed window geometry, as published by the producer.
    pub fn current_geometry(&self) -> (u32, u32) {
        fence(Ordering::Acquire);
        let w = self.header().current_width.load(Ordering::Relaxed);
        let h = self.header().current_height.load(Ordering::Relaxed);
        (w, h)
    }

    /// Monotonic count of grab attempts in the producer.
    pub fn frame_counter(&self) -> u32 {
        fence(Ordering::Acquire);
        self.header().frame_counter.load(Ordering::Relaxed)
    }

    /// Publish the hotkey the producer should watch for.
    pub fn set_hotkey(&self, info: HotkeyInfo) {
        let header = self.header();
        fence(Ordering::Acquire);
        header
            .hotkey_enabled
            .store(info.enabled as u32, Ordering::Relaxed);
        header.hotkey_keycode.store(info.keycode, Ordering::Relaxed);
        header
            .hotkey_modifiers
            .store(info.modifiers, Ordering::Relaxed);
        fence(Ordering::Release);
    }

    /// Number of hotkey presses reported by the producer since the last
    /// call. One press per observed counter increment.
    pub fn take_hotkey_presses(&mut self) -> u32 {
        fence(Ordering::Acquire);
        let counter = self.header().hotkey_counter.load(Ordering::Relaxed);
        let presses = counter.wrapping_sub(self.last_hotkey_counter);
        self.last_hotkey_counter = counter;
        presses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::FLAG_LIMIT_FPS;

    fn small_channel() -> CaptureChannel {
        let settings = ChannelSettings::new()
            .with_ring_buffer_size(4)
            .with_max_bytes(64 * 64 * 4)
            .with_target_fps(0);
        CaptureChannel::create(&settings).unwrap()
    }

    #[test]
    fn create_publishes_configuration() {
        let settings = ChannelSettings::new()
            .with_ring_buffer_size(8)
            .with_max_bytes(4096)
            .with_target_fps(25)
            .with_flags(FLAG_LIMIT_FPS);
        let channel = CaptureChannel::create(&settings).unwrap();

        // Attach as a second mapping, the way the producer does, and read
        // the frozen configuration back.
        let seg = ShmSegment::attach(channel.main_id()).unwrap();
        assert_eq!(seg.size(), main_segment_size(8));
        let header = unsafe { &*(seg.as_ptr() as *const ChannelHeader) };
        fence(Ordering::Acquire);
        assert_eq!(header.ring_buffer_size.load(Ordering::Relaxed), 8);
        assert_eq!(header.max_bytes.load(Ordering::Relaxed), 4096);
        assert_eq!(header.target_fps.load(Ordering::Relaxed), 25);
        assert_eq!(header.flags.load(Ordering::Relaxed), FLAG_LIMIT_FPS);
    }

    #[test]
    fn payload_segments_match_descriptor_table() {
        let channel = small_channel();
        for slot in 0..channel.ring_size() {
            let id = channel.descriptor(slot).shm_id.load(Ordering::Relaxed);
            let seg = ShmSegment::attach(id).unwrap();
            assert_eq!(seg.size(), channel.max_bytes() as usize);
        }
    }

    #[test]
    fn empty_channel_has_no_frames() {
        let channel = small_channel();
        assert_eq!(channel.frames_ready(), 0);
        assert!(channel.front().is_none());
        channel.pop(); // no-op on empty ring
        assert_eq!(channel.frames_ready(), 0);
    }

    #[test]
    fn published_frame_is_visible_then_consumed() {
        let channel = small_channel();
        let header = channel.header();

        // Act as the producer: fill slot 0 and advance write_pos.
        let desc = channel.descriptor(0);
        desc.timestamp.store(12345, Ordering::Relaxed);
        desc.width.store(16, Ordering::Relaxed);
        desc.height.store(2, Ordering::Relaxed);
        unsafe { channel.payloads[0].as_ptr().write_bytes(0x7F, 16 * 4 * 2) };
        fence(Ordering::Release);
        header.write_pos.store(1, Ordering::Relaxed);
        fence(Ordering::Release);

        assert_eq!(channel.frames_ready(), 1);
        let frame = channel.front().unwrap();
        assert_eq!(frame.timestamp, 12345);
        assert_eq!((frame.width, frame.height), (16, 2));
        assert_eq!(frame.stride, 64);
        assert_eq!(frame.data.len(), 128);
        assert!(frame.data.iter().all(|&b| b == 0x7F));

        channel.pop();
        assert_eq!(channel.frames_ready(), 0);
    }

    #[test]
    fn hotkey_round_trip() {
        let mut channel = small_channel();
        let info = HotkeyInfo {
            enabled: true,
            keycode: 107,
            modifiers: 0x5,
        };
        channel.set_hotkey(info);

        fence(Ordering::Acquire);
        assert_eq!(channel.header().hotkey_enabled.load(Ordering::Relaxed), 1);
        assert_eq!(channel.header().hotkey_keycode.load(Ordering::Relaxed), 107);
        assert_eq!(channel.header().hotkey_modifiers.load(Ordering::Relaxed), 0x5);

        assert_eq!(channel.take_hotkey_presses(), 0);
        channel.header().hotkey_counter.fetch_add(1, Ordering::Relaxed);
        channel.header().hotkey_counter.fetch_add(1, Ordering::Relaxed);
        assert_eq!(channel.take_hotkey_presses(), 2);
        assert_eq!(channel.take_hotkey_presses(), 0);
    }
}
