//! Facade over the graphics pipeline
//!
//! The grabber needs a handful of operations from the host's GL context
//! and windowing connection. They are expressed as a trait so the state
//! machine can be driven by the real binding inside the interceptor and by
//! a scripted fake in tests.

/// Which color buffer `read_pixels` reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadBuffer {
    Front,
    Back,
}

/// Pipeline state the grabber mutates and must restore afterwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct SavedPixelState {
    pub pack_buffer: u32,
    pub draw_framebuffer: u32,
    pub read_framebuffer: u32,
}

/// Hardware cursor snapshot in root-window coordinates.
///
/// `pixels` are packed ARGB words with premultiplied alpha, row-major
/// top-down, `width * height` entries.
#[derive(Debug, Clone)]
pub struct CursorImage {
    pub x: i32,
    pub y: i32,
    pub xhot: i32,
    pub yhot: i32,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

/// Operations the grabber drives on the captured process's pipeline.
pub trait GlCapture: Send {
    /// Pixel dimensions of the drawable being captured.
    fn drawable_geometry(&mut self) -> (u32, u32);

    /// Snapshot the pixel-pack parameters and buffer/framebuffer bindings.
    fn save_pixel_state(&mut self) -> SavedPixelState;

    /// Restore a snapshot taken by [`save_pixel_state`](Self::save_pixel_state).
    fn restore_pixel_state(&mut self, state: SavedPixelState);

    /// Bind a pixel-pack buffer; 0 unbinds.
    fn bind_pack_buffer(&mut self, buffer: u32);

    /// Bind a framebuffer on both targets; 0 selects the default framebuffer.
    fn bind_framebuffer(&mut self, framebuffer: u32);

    /// Set pack alignment and row length (in pixels) for the readback.
    fn configure_pack(&mut self, alignment: u32, row_length: u32);

    /// Select the color buffer to read from.
    fn set_read_buffer(&mut self, buffer: ReadBuffer);

    /// Read `width * height` BGRA pixels into `dest`, bottom row first,
    /// using the previously configured row length.
    fn read_pixels(&mut self, width: u32, height: u32, dest: &mut [u8]);

    /// Drain one pending pipeline error, if any. Used by debug probing.
    fn poll_error(&mut self) -> Option<u32>;

    /// Whether the windowing system exposes the cursor-image extension.
    fn cursor_supported(&self) -> bool;

    /// Current hardware cursor, if available.
    fn cursor_image(&mut self) -> Option<CursorImage>;

    /// Origin of the drawable in root-window coordinates.
    fn root_offset(&mut self) -> Option<(i32, i32)>;
}
