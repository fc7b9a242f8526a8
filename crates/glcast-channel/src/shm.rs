//! RAII wrapper around SysV shared-memory segments
//!
//! The channel uses plain `shmget`/`shmat` segments so that the recorder
//! can hand a decimal id to the injected process through the environment.

use glcast_core::{Error, Result};
use std::ptr;
use tracing::debug;

/// One mapped SysV shared-memory segment.
///
/// Creating marks the segment for removal right away, so the kernel frees
/// it once the last attached process detaches or dies; a crashed recorder
/// cannot leak segments.
#[derive(Debug)]
pub struct ShmSegment {
    id: i32,
    addr: *mut u8,
    size: usize,
}

// Safety: the mapping stays valid for the lifetime of the struct and the
// ring protocol serializes cross-process access to its contents.
unsafe impl Send for ShmSegment {}

impl ShmSegment {
    /// Create and attach a fresh segment of `size` bytes.
    pub fn create(size: usize) -> Result<Self> {
        let id = unsafe { libc::shmget(libc::IPC_PRIVATE, size, libc::IPC_CREAT | 0o777) };
        if id < 0 {
            return Err(Error::Shm(format!(
                "shmget failed: {}",
                std::io::Error::last_os_error()
            )));
        }

        let addr = unsafe { libc::shmat(id, ptr::null(), 0) };
        if addr == usize::MAX as *mut libc::c_void {
            unsafe { libc::shmctl(id, libc::IPC_RMID, ptr::null_mut()) };
            return Err(Error::Shm(format!(
                "shmat failed: {}",
                std::io::Error::last_os_error()
            )));
        }

        // Mark for removal now; the id stays attachable until the last
        // process detaches.
        unsafe { libc::shmctl(id, libc::IPC_RMID, ptr::null_mut()) };

        debug!("Created shm segment {} ({} bytes)", id, size);

        Ok(Self {
            id,
            addr: addr as *mut u8,
            size,
        })
    }

    /// Attach to an existing segment by id. The mapped size is recovered
    /// from the kernel.
    pub fn attach(id: i32) -> Result<Self> {
        let addr = unsafe { libc::shmat(id, ptr::null(), libc::SHM_RND) };
        if addr == usize::MAX as *mut libc::c_void {
            return Err(Error::Shm(format!(
                "can't attach to shm segment {}: {}",
                id,
                std::io::Error::last_os_error()
            )));
        }

        let size = segment_size(id);
        if size == 0 {
            unsafe { libc::shmdt(addr) };
            return Err(Error::Shm(format!("can't stat shm segment {}", id)));
        }

        debug!("Attached shm segment {} ({} bytes)", id, size);

        Ok(Self {
            id,
            addr: addr as *mut u8,
            size,
        })
    }

    /// Segment id, as passed between processes.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Mapped size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Base address of the mapping.
    pub fn as_ptr(&self) -> *mut u8 {
        self.addr
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        unsafe { libc::shmdt(self.addr as *const libc::c_void) };
        debug!("Detached shm segment {}", self.id);
    }
}

fn segment_size(id: i32) -> usize {
    let mut buf: libc::shmid_ds = unsafe { std::mem::zeroed() };
    if unsafe { libc::shmctl(id, libc::IPC_STAT, &mut buf) } < 0 {
        return 0;
    }
    buf.shm_segsz as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_reports_id_and_size() {
        let seg = ShmSegment::create(4096).unwrap();
        assert!(seg.id() >= 0);
        assert_eq!(seg.size(), 4096);
    }

    #[test]
    fn attach_sees_writes_from_creator() {
        let seg = ShmSegment::create(128).unwrap();
        unsafe { seg.as_ptr().write_bytes(0xAB, 128) };

        let other = ShmSegment::attach(seg.id()).unwrap();
        assert_eq!(other.size(), 128);
        let byte = unsafe { *other.as_ptr().add(100) };
        assert_eq!(byte, 0xAB);
    }

    #[test]
    fn removed_segment_is_gone_after_last_detach() {
        let id = {
            let seg = ShmSegment::create(64).unwrap();
            seg.id()
        };
        // The creator marked it IPC_RMID and has now detached.
        assert!(ShmSegment::attach(id).is_err());
    }
}
