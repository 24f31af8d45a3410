//! # Frame
//!
//! One complete unit of the wire protocol: a 4-byte header followed by an
//! optional payload.
//!
//! Header layout (all integers little-endian):
//! - byte 0: `0xFF` marker
//! - byte 1: packet identifier
//! - bytes 2–3: total frame length *including* this header
//!
//! A declared length of exactly 4 means an empty payload; anything below 4
//! is a framing violation and closes the connection.

use crate::error::{ProtocolError, Result};
use crate::utils::buffer_pool::PooledBuf;

/// Marker byte that opens every frame header.
pub const FRAME_MARKER: u8 = 0xFF;

/// Size of the frame header in bytes.
pub const HEADER_LEN: usize = 4;

/// Largest payload a 16-bit declared length can carry.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize - HEADER_LEN;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Packet identifier selecting the logical message.
    pub identifier: u8,
    /// Total frame length as declared on the wire, header included.
    pub declared_len: u16,
}

impl FrameHeader {
    /// Parse the 4 header bytes read off the socket.
    ///
    /// # Errors
    /// [`ProtocolError::BadMarker`] when byte 0 is not `0xFF`;
    /// [`ProtocolError::FramingViolation`] when the declared length is 0–3.
    pub fn parse(bytes: [u8; HEADER_LEN]) -> Result<Self> {
        if bytes[0] != FRAME_MARKER {
            return Err(ProtocolError::BadMarker(bytes[0]));
        }

        let declared_len = u16::from_le_bytes([bytes[2], bytes[3]]);
        if (declared_len as usize) < HEADER_LEN {
            return Err(ProtocolError::FramingViolation {
                declared: declared_len,
            });
        }

        Ok(Self {
            identifier: bytes[1],
            declared_len,
        })
    }

    /// Payload size implied by the declared length.
    pub fn payload_len(&self) -> usize {
        self.declared_len as usize - HEADER_LEN
    }
}

/// An inbound frame, owned by exactly one party at a time: the priority
/// queue until dequeued, then the handler it is dispatched to.
///
/// The payload is a pool lease; dropping the frame returns the buffer to
/// its pool (when pool-sized) without any manual bookkeeping. A handler
/// that retains the bytes takes them out with [`Frame::into_payload`].
#[derive(Debug)]
pub struct Frame {
    identifier: u8,
    payload: PooledBuf,
}

impl Frame {
    pub fn new(identifier: u8, payload: PooledBuf) -> Self {
        Self {
            identifier,
            payload,
        }
    }

    /// Packet identifier from the frame header.
    pub fn identifier(&self) -> u8 {
        self.identifier
    }

    /// The payload bytes (empty for a bare 4-byte frame).
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take the payload out of pool ownership; the storage is never
    /// returned to the pool after this.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = FrameHeader::parse([0xFF, 0x50, 0x2A, 0x00]).unwrap();
        assert_eq!(header.identifier, 0x50);
        assert_eq!(header.declared_len, 42);
        assert_eq!(header.payload_len(), 38);
    }

    #[test]
    fn empty_payload_at_minimum_length() {
        let header = FrameHeader::parse([0xFF, 0x00, 0x04, 0x00]).unwrap();
        assert_eq!(header.payload_len(), 0);
    }

    #[test]
    fn short_declared_lengths_are_violations() {
        for declared in 0u16..4 {
            let [lo, hi] = declared.to_le_bytes();
            let err = FrameHeader::parse([0xFF, 0x25, lo, hi]).unwrap_err();
            assert!(
                matches!(err, ProtocolError::FramingViolation { declared: d } if d == declared),
                "length {declared} must be a framing violation"
            );
        }
    }

    #[test]
    fn missing_marker_rejected() {
        let err = FrameHeader::parse([0x7F, 0x25, 0x04, 0x00]).unwrap_err();
        assert!(matches!(err, ProtocolError::BadMarker(0x7F)));
    }
}
