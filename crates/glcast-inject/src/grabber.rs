//! The frame grabber state machine
//!
//! One grabber exists per captured drawable. `grab_frame` runs on the
//! host's rendering thread at every buffer swap: it publishes the current
//! geometry, applies size checks and rate limiting, reads the rendered
//! pixels straight into the next ring slot, optionally composites the
//! hardware cursor, and advances the write cursor.
//!
//! The producer never blocks on the consumer: a full ring drops the frame.

use crate::attach::ProducerChannel;
use crate::cursor::composite_cursor;
use crate::gl::{GlCapture, ReadBuffer};
use glcast_channel::layout::{grow_align16, ring_distance};
use glcast_channel::{HotkeyInfo, FLAG_CAPTURE_FRONT, FLAG_LIMIT_FPS, FLAG_RECORD_CURSOR};
use glcast_core::monotonic_us;
use std::sync::atomic::{fence, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Producer-side state machine bound to one drawable.
pub struct FrameGrabber {
    channel: ProducerChannel,
    gl: Box<dyn GlCapture>,
    debug: bool,
    cursor_available: bool,
    width: u32,
    height: u32,
    next_frame_time: i64,
    warn_too_small: bool,
    warn_too_large: bool,
}

impl FrameGrabber {
    pub fn new(channel: ProducerChannel, gl: Box<dyn GlCapture>, debug: bool) -> Self {
        let cursor_available = gl.cursor_supported();
        if channel.flags() & FLAG_RECORD_CURSOR != 0 && !cursor_available {
            warn!("Cursor extension not supported by the server, the cursor has been hidden");
        }
        if debug {
            info!("Debug mode enabled");
        }
        Self {
            channel,
            gl,
            debug,
            cursor_available,
            width: 0,
            height: 0,
            next_frame_time: monotonic_us(),
            warn_too_small: true,
            warn_too_large: true,
        }
    }

    /// Capture the frame that was just rendered, if the channel has room
    /// and pacing allows it.
    pub fn grab_frame(&mut self) {
        let (width, height) = self.gl.drawable_geometry();
        if width != self.width || height != self.height {
            info!("Frame size changed to {}x{}", width, height);
            self.width = width;
            self.height = height;
        }

        // publish geometry and count the attempt
        let header = self.channel.header();
        fence(Ordering::Acquire);
        header.current_width.store(width, Ordering::Relaxed);
        header.current_height.store(height, Ordering::Relaxed);
        header.frame_counter.fetch_add(1, Ordering::Relaxed);
        fence(Ordering::Release);

        let stride = grow_align16(width * 4);
        if width < 2 || height < 2 {
            if self.warn_too_small {
                self.warn_too_small = false;
                warn!("Frame is too small to capture ({}x{})", width, height);
            }
            return;
        }
        if width > 10000
            || height > 10000
            || stride as u64 * height as u64 > self.channel.max_bytes() as u64
        {
            if self.warn_too_large {
                self.warn_too_large = false;
                warn!("Frame is too large to capture ({}x{})", width, height);
            }
            return;
        }

        // is there space in the ring?
        fence(Ordering::Acquire);
        let read_pos = header.read_pos.load(Ordering::Relaxed);
        let write_pos = header.write_pos.load(Ordering::Relaxed);
        fence(Ordering::Release);
        let ring_size = self.channel.ring_size();
        if ring_distance(write_pos, read_pos, ring_size) >= ring_size {
            return;
        }

        // pacing
        let mut timestamp = monotonic_us();
        let target_fps = self.channel.target_fps();
        if target_fps > 0 {
            let delay = 1_000_000 / target_fps as i64;
            if self.channel.flags() & FLAG_LIMIT_FPS != 0 {
                if timestamp < self.next_frame_time {
                    std::thread::sleep(Duration::from_micros(
                        (self.next_frame_time - timestamp) as u64,
                    ));
                    timestamp = monotonic_us();
                }
            } else if timestamp < self.next_frame_time {
                return;
            }
            self.next_frame_time = (self.next_frame_time + delay).max(timestamp);
        }

        // pre-existing errors from host code get reported as such
        if self.debug {
            self.probe("<external code>");
        }

        // save settings
        let saved = self.gl.save_pixel_state();
        self.probe("save_pixel_state");

        // change settings: read the default framebuffer, packed rows
        self.gl.bind_pack_buffer(0);
        self.probe("bind_pack_buffer");
        self.gl.bind_framebuffer(0);
        self.probe("bind_framebuffer");
        self.gl.configure_pack(8, stride / 4);
        self.probe("configure_pack");
        let buffer = if self.channel.flags() & FLAG_CAPTURE_FRONT != 0 {
            ReadBuffer::Front
        } else {
            ReadBuffer::Back
        };
        self.gl.set_read_buffer(buffer);
        self.probe("set_read_buffer");

        fence(Ordering::Acquire); // start writing the slot

        let slot = write_pos % ring_size;
        let desc = self.channel.descriptor(slot);
        desc.timestamp.store(timestamp, Ordering::Relaxed);
        desc.width.store(width, Ordering::Relaxed);
        desc.height.store(height, Ordering::Relaxed);

        let payload = unsafe {
            std::slice::from_raw_parts_mut(
                self.channel.payload_ptr(slot),
                stride as usize * height as usize,
            )
        };
        self.gl.read_pixels(width, height, payload);
        self.probe("read_pixels");

        if self.channel.flags() & FLAG_RECORD_CURSOR != 0 && self.cursor_available {
            if let Some((area_x, area_y)) = self.gl.root_offset() {
                if let Some(cursor) = self.gl.cursor_image() {
                    composite_cursor(
                        payload,
                        stride as usize,
                        width as i32,
                        height as i32,
                        area_x,
                        area_y,
                        &cursor,
                    );
                }
            }
        }

        fence(Ordering::Release); // stop writing the slot

        // publish the slot
        fence(Ordering::Acquire);
        self.channel
            .header()
            .write_pos
            .store((write_pos + 1) % (ring_size * 2), Ordering::Relaxed);
        fence(Ordering::Release);

        // restore settings
        self.gl.restore_pixel_state(saved);
        self.probe("restore_pixel_state");
    }

    /// Snapshot the hotkey the recorder asked to be watched.
    pub fn hotkey_info(&self) -> HotkeyInfo {
        let header = self.channel.header();
        fence(Ordering::Acquire);
        let info = HotkeyInfo {
            enabled: header.hotkey_enabled.load(Ordering::Relaxed) != 0,
            keycode: header.hotkey_keycode.load(Ordering::Relaxed),
            modifiers: header.hotkey_modifiers.load(Ordering::Relaxed),
        };
        fence(Ordering::Release);
        info
    }

    /// Report one hotkey press to the recorder.
    pub fn trigger_hotkey(&mut self) {
        let header = self.channel.header();
        fence(Ordering::Acquire);
        header.hotkey_counter.fetch_add(1, Ordering::Relaxed);
        fence(Ordering::Release);
    }

    fn probe(&mut self, at: &str) {
        if self.debug {
            if let Some(code) = self.gl.poll_error() {
                warn!("Graphics error in {}: 0x{:04X}", at, code);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::{CursorImage, SavedPixelState};
    use glcast_channel::{CaptureChannel, ChannelSettings};
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;
    use std::time::Instant;

    /// Scripted stand-in for the host graphics pipeline.
    struct FakeGl {
        width: u32,
        height: u32,
        fill: u8,
        cursor: Option<CursorImage>,
        offset: (i32, i32),
        calls: Arc<std::sync::Mutex<Vec<String>>>,
        restored: Arc<AtomicU32>,
    }

    impl FakeGl {
        fn new(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                fill: 0,
                cursor: None,
                offset: (0, 0),
                calls: Arc::new(std::sync::Mutex::new(Vec::new())),
                restored: Arc::new(AtomicU32::new(0)),
            }
        }

        fn log(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }
    }

    impl GlCapture for FakeGl {
        fn drawable_geometry(&mut self) -> (u32, u32) {
            (self.width, self.height)
        }
        fn save_pixel_state(&mut self) -> SavedPixelState {
            self.log("save");
            SavedPixelState {
                pack_buffer: 7,
                draw_framebuffer: 3,
                read_framebuffer: 4,
            }
        }
        fn restore_pixel_state(&mut self, state: SavedPixelState) {
            self.log("restore");
            assert_eq!(state.pack_buffer, 7);
            assert_eq!(state.draw_framebuffer, 3);
            assert_eq!(state.read_framebuffer, 4);
            self.restored.fetch_add(1, Ordering::Relaxed);
        }
        fn bind_pack_buffer(&mut self, buffer: u32) {
            self.log(&format!("bind_pack_buffer({buffer})"));
        }
        fn bind_framebuffer(&mut self, framebuffer: u32) {
            self.log(&format!("bind_framebuffer({framebuffer})"));
        }
        fn configure_pack(&mut self, alignment: u32, row_length: u32) {
            self.log(&format!("configure_pack({alignment},{row_length})"));
        }
        fn set_read_buffer(&mut self, buffer: ReadBuffer) {
            self.log(&format!("set_read_buffer({buffer:?})"));
        }
        fn read_pixels(&mut self, _width: u32, _height: u32, dest: &mut [u8]) {
            self.log("read_pixels");
            dest.fill(self.fill);
        }
        fn poll_error(&mut self) -> Option<u32> {
            None
        }
        fn cursor_supported(&self) -> bool {
            true
        }
        fn cursor_image(&mut self) -> Option<CursorImage> {
            self.cursor.clone()
        }
        fn root_offset(&mut self) -> Option<(i32, i32)> {
            Some(self.offset)
        }
    }

    fn recorder(slots: u32, fps: u32, flags: u32) -> CaptureChannel {
        let settings = ChannelSettings::new()
            .with_ring_buffer_size(slots)
            .with_max_bytes(grow_align16(64 * 4) * 64)
            .with_target_fps(fps)
            .with_flags(flags);
        CaptureChannel::create(&settings).unwrap()
    }

    fn grabber_for(channel: &CaptureChannel, gl: FakeGl) -> FrameGrabber {
        let producer = ProducerChannel::attach(channel.main_id()).unwrap();
        FrameGrabber::new(producer, Box::new(gl), false)
    }

    #[test]
    fn full_ring_saturates_and_counts_attempts() {
        let channel = recorder(4, 0, 0);
        let mut grabber = grabber_for(&channel, FakeGl::new(16, 16));

        for _ in 0..10 {
            grabber.grab_frame();
        }

        // exactly 4 frames visible, 10 attempts counted
        assert_eq!(channel.frames_ready(), 4);
        assert_eq!(channel.frame_counter(), 10);

        // consuming one slot lets exactly one more frame through
        channel.pop();
        grabber.grab_frame();
        grabber.grab_frame();
        assert_eq!(channel.frames_ready(), 4);
        assert_eq!(channel.frame_counter(), 12);
    }

    #[test]
    fn published_frames_carry_geometry_and_pixels() {
        let channel = recorder(4, 0, 0);
        let mut gl = FakeGl::new(16, 4);
        gl.fill = 0x5A;
        let mut grabber = grabber_for(&channel, gl);

        grabber.grab_frame();

        assert_eq!(channel.current_geometry(), (16, 4));
        let frame = channel.front().unwrap();
        assert_eq!((frame.width, frame.height), (16, 4));
        assert_eq!(frame.stride, grow_align16(16 * 4));
        assert!(frame.data.iter().all(|&b| b == 0x5A));
        assert!(frame.timestamp >= 0);
    }

    #[test]
    fn tiny_frames_are_rejected_but_counted() {
        let channel = recorder(4, 0, 0);
        let mut grabber = grabber_for(&channel, FakeGl::new(1, 16));

        grabber.grab_frame();
        grabber.grab_frame();

        assert_eq!(channel.frames_ready(), 0);
        assert_eq!(channel.frame_counter(), 2);
    }

    #[test]
    fn oversized_frames_are_rejected() {
        // 64x64 payload cap, 100x100 drawable
        let channel = recorder(4, 0, 0);
        let mut grabber = grabber_for(&channel, FakeGl::new(100, 100));

        grabber.grab_frame();

        assert_eq!(channel.frames_ready(), 0);
        assert_eq!(channel.frame_counter(), 1);
    }

    #[test]
    fn fps_limit_sleeps_to_hold_the_rate() {
        // 100 fps -> 10 ms per frame; 5 grabs need at least ~40 ms
        let channel = recorder(8, 100, FLAG_LIMIT_FPS);
        let mut grabber = grabber_for(&channel, FakeGl::new(16, 16));

        let start = Instant::now();
        for _ in 0..5 {
            grabber.grab_frame();
        }

        assert_eq!(channel.frames_ready(), 5);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn early_frames_drop_without_the_limit_flag() {
        // 50 fps -> 20 ms per frame; a busy loop for ~70 ms lands 3-5 frames
        let channel = recorder(16, 50, 0);
        let mut grabber = grabber_for(&channel, FakeGl::new(16, 16));

        let start = Instant::now();
        let mut attempts = 0u32;
        while start.elapsed() < Duration::from_millis(70) {
            grabber.grab_frame();
            attempts += 1;
        }

        let ready = channel.frames_ready();
        assert!((2..=6).contains(&ready), "got {ready} frames");
        assert!(attempts > ready, "pacing never dropped anything");
        assert_eq!(channel.frame_counter(), attempts);
    }

    #[test]
    fn cursor_is_composited_when_requested() {
        let channel = recorder(4, 0, FLAG_RECORD_CURSOR);
        let mut gl = FakeGl::new(4, 4);
        gl.cursor = Some(CursorImage {
            x: 1,
            y: 1,
            xhot: 0,
            yhot: 0,
            width: 2,
            height: 2,
            pixels: vec![0xFF_FF_00_00; 4],
        });
        let mut grabber = grabber_for(&channel, gl);

        grabber.grab_frame();

        let frame = channel.front().unwrap();
        let stride = frame.stride as usize;
        // window (1,1) lives at buffer row height-1-1 = 2
        assert_eq!(&frame.data[2 * stride + 4..2 * stride + 7], &[0, 0, 255]);
        assert_eq!(&frame.data[2 * stride + 8..2 * stride + 11], &[0, 0, 255]);
        // outside the cursor rectangle stays untouched
        assert_eq!(&frame.data[..3], &[0, 0, 0]);
    }

    #[test]
    fn pipeline_state_is_saved_and_restored_around_readback() {
        let channel = recorder(4, 0, 0);
        let gl = FakeGl::new(16, 16);
        let calls = gl.calls.clone();
        let restored = gl.restored.clone();
        let mut grabber = grabber_for(&channel, gl);

        grabber.grab_frame();

        assert_eq!(restored.load(Ordering::Relaxed), 1);
        let calls = calls.lock().unwrap();
        let expected: Vec<String> = vec![
            "save".into(),
            "bind_pack_buffer(0)".into(),
            "bind_framebuffer(0)".into(),
            format!("configure_pack(8,{})", grow_align16(16 * 4) / 4),
            "set_read_buffer(Back)".into(),
            "read_pixels".into(),
            "restore".into(),
        ];
        assert_eq!(calls.as_slice(), expected.as_slice());
    }

    #[test]
    fn front_buffer_flag_selects_the_front_buffer() {
        let channel = recorder(4, 0, FLAG_CAPTURE_FRONT);
        let gl = FakeGl::new(16, 16);
        let calls = gl.calls.clone();
        let mut grabber = grabber_for(&channel, gl);

        grabber.grab_frame();

        assert!(calls
            .lock()
            .unwrap()
            .iter()
            .any(|c| c == "set_read_buffer(Front)"));
    }

    #[test]
    fn hotkey_snapshot_and_trigger() {
        let mut channel = recorder(4, 0, 0);
        let mut grabber = grabber_for(&channel, FakeGl::new(16, 16));

        channel.set_hotkey(HotkeyInfo {
            enabled: true,
            keycode: 96,
            modifiers: 0x8,
        });

        let info = grabber.hotkey_info();
        assert_eq!(
            info,
            HotkeyInfo {
                enabled: true,
                keycode: 96,
                modifiers: 0x8
            }
        );
        // snapshot with no intervening write is stable
        assert_eq!(grabber.hotkey_info(), info);

        grabber.trigger_hotkey();
        grabber.trigger_hotkey();
        assert_eq!(channel.take_hotkey_presses(), 2);
    }
}
