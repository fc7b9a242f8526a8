//! Encoded packets
//!
//! A packet is an owned, movable handle to a timed compressed buffer. It
//! flows encoder -> muxer queue -> container: ownership of the payload
//! bytes transfers out of the muxer's lifetime exactly when the container
//! accepts the packet, which [`Packet::take_payload`] makes explicit.

use glcast_core::NO_TIMESTAMP;

/// One encoded packet with presentation/decoding timestamps in ticks of
/// the producing encoder's time base. Either timestamp may be
/// [`NO_TIMESTAMP`].
#[derive(Debug)]
pub struct Packet {
    data: Option<Vec<u8>>,
    pub pts: i64,
    pub dts: i64,
    pub stream_index: usize,
}

impl Packet {
    /// A packet with unknown timestamps.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Some(data),
            pts: NO_TIMESTAMP,
            dts: NO_TIMESTAMP,
            stream_index: 0,
        }
    }

    pub fn with_timestamps(data: Vec<u8>, pts: i64, dts: i64) -> Self {
        Self {
            data: Some(data),
            pts,
            dts,
            stream_index: 0,
        }
    }

    /// Payload bytes, empty once consumed by a container.
    pub fn payload(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.payload().len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload().is_empty()
    }

    /// Move the payload out, leaving the handle consumed. Containers call
    /// this when a write succeeds; dropping the handle afterwards frees
    /// nothing.
    pub fn take_payload(&mut self) -> Option<Vec<u8>> {
        self.data.take()
    }

    /// Whether the payload has been handed to a container.
    pub fn is_consumed(&self) -> bool {
        self.data.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_packet_has_unknown_timestamps() {
        let p = Packet::new(vec![1, 2, 3]);
        assert_eq!(p.pts, NO_TIMESTAMP);
        assert_eq!(p.dts, NO_TIMESTAMP);
        assert_eq!(p.len(), 3);
        assert!(!p.is_consumed());
    }

    #[test]
    fn take_payload_consumes_exactly_once() {
        let mut p = Packet::with_timestamps(vec![9; 16], 100, 90);
        assert_eq!(p.take_payload().unwrap().len(), 16);
        assert!(p.is_consumed());
        assert!(p.take_payload().is_none());
        assert_eq!(p.payload(), &[]);
    }
}
