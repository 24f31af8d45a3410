//! # Frame Builder
//!
//! Append-only builder for outbound frames. Four header bytes are reserved
//! up front; [`FrameBuilder::finish`] patches the marker, identifier, and
//! little-endian total length once the payload is complete, so handlers
//! never compute frame lengths by hand.

use bytes::{BufMut, BytesMut};

use crate::core::frame::{FRAME_MARKER, HEADER_LEN, MAX_PAYLOAD_LEN};
use crate::error::{ProtocolError, Result};

/// Builder for one outbound frame.
#[derive(Debug)]
pub struct FrameBuilder {
    identifier: u8,
    buf: BytesMut,
}

impl FrameBuilder {
    /// Start a frame for the given packet identifier.
    pub fn new(identifier: u8) -> Self {
        let mut buf = BytesMut::with_capacity(64);
        // Header placeholder, patched in finish().
        buf.put_bytes(0, HEADER_LEN);
        Self { identifier, buf }
    }

    /// Payload bytes appended so far.
    pub fn payload_len(&self) -> usize {
        self.buf.len() - HEADER_LEN
    }

    pub fn insert_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    pub fn insert_u16(&mut self, value: u16) -> &mut Self {
        self.buf.put_u16_le(value);
        self
    }

    pub fn insert_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32_le(value);
        self
    }

    pub fn insert_i32(&mut self, value: i32) -> &mut Self {
        self.buf.put_i32_le(value);
        self
    }

    pub fn insert_i64(&mut self, value: i64) -> &mut Self {
        self.buf.put_i64_le(value);
        self
    }

    /// Text plus its `0x00` terminator.
    pub fn insert_cstring(&mut self, text: &str) -> &mut Self {
        self.buf.put_slice(text.as_bytes());
        self.buf.put_u8(0);
        self
    }

    /// A 4-character code, optionally byte-reversed into wire order.
    ///
    /// # Panics
    /// Debug-asserts that `code` is exactly 4 bytes; every caller passes a
    /// product/platform tag constant.
    pub fn insert_dword_string(&mut self, code: &str, reverse: bool) -> &mut Self {
        debug_assert_eq!(code.len(), 4, "dword string must be 4 bytes");
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&code.as_bytes()[..4]);
        if reverse {
            bytes.reverse();
        }
        self.buf.put_slice(&bytes);
        self
    }

    pub fn insert_fixed_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.put_slice(bytes);
        self
    }

    /// Patch the header and return the wire image of the frame.
    ///
    /// # Errors
    /// [`ProtocolError::OversizedPayload`] when the payload cannot be
    /// declared in 16 bits.
    pub fn finish(self) -> Result<Vec<u8>> {
        let payload_len = self.buf.len() - HEADER_LEN;
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::OversizedPayload(payload_len));
        }

        let mut frame = self.buf;
        let total = (payload_len + HEADER_LEN) as u16;
        frame[0] = FRAME_MARKER;
        frame[1] = self.identifier;
        frame[2..4].copy_from_slice(&total.to_le_bytes());
        Ok(frame.to_vec())
    }
}
