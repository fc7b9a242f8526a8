//! Process-wide grabber registry
//!
//! The graphics-call interceptor needs to find the grabber bound to the
//! drawable it is about to swap, from whatever thread the host renders
//! on. Grabbers are registered here when a drawable is first seen and the
//! whole table is torn down on library unload.

use crate::attach::ProducerChannel;
use crate::gl::GlCapture;
use crate::grabber::FrameGrabber;
use glcast_core::Result;
use std::sync::{Mutex, OnceLock};
use tracing::info;

struct Entry {
    dpy: usize,
    window: u64,
    drawable: u64,
    grabber: FrameGrabber,
}

fn table() -> &'static Mutex<Vec<Entry>> {
    static TABLE: OnceLock<Mutex<Vec<Entry>>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(Vec::new()))
}

/// Attach a channel from the environment and register a grabber for
/// `(dpy, drawable)`. Called by the interceptor the first time it
/// sees a drawable.
pub fn create_grabber(
    dpy: usize,
    window: u64,
    drawable: u64,
    gl: Box<dyn GlCapture>,
) -> Result<()> {
    let (channel, debug) = ProducerChannel::from_env()?;
    register_grabber(dpy, window, drawable, FrameGrabber::new(channel, gl, debug));
    Ok(())
}

/// Register an already-constructed grabber.
pub fn register_grabber(dpy: usize, window: u64, drawable: u64, grabber: FrameGrabber) {
    info!(
        "Grabber for [{:#x}-{:#x}-{:#x}] created",
        dpy, window, drawable
    );
    table().lock().unwrap().push(Entry {
        dpy,
        window,
        drawable,
        grabber,
    });
}

/// Run `f` on the grabber bound to `(dpy, drawable)`, if one exists.
pub fn with_grabber<R>(
    dpy: usize,
    drawable: u64,
    f: impl FnOnce(&mut FrameGrabber) -> R,
) -> Option<R> {
    let mut entries = table().lock().unwrap();
    entries
        .iter_mut()
        .find(|e| e.dpy == dpy && e.drawable == drawable)
        .map(|e| f(&mut e.grabber))
}

/// Drop the grabber for one drawable, detaching its channel.
pub fn remove_grabber(dpy: usize, drawable: u64) -> bool {
    let mut entries = table().lock().unwrap();
    let before = entries.len();
    entries.retain(|e| !(e.dpy == dpy && e.drawable == drawable));
    let removed = entries.len() != before;
    if removed {
        info!("Grabber for [{:#x}-?-{:#x}] destroyed", dpy, drawable);
    }
    removed
}

/// Tear down every registered grabber. Called on library unload.
pub fn shutdown() {
    let mut entries = table().lock().unwrap();
    let count = entries.len();
    entries.clear();
    if count > 0 {
        info!("Released {} grabber(s)", count);
    }
}
