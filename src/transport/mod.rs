//! Transport layer: the blocking TCP connection, the transport pump that
//! feeds the pipeline, and the file-transfer sub-protocol client used by
//! lockdown versioning.

pub mod filetransfer;
pub mod tcp;

pub use tcp::{connect, TcpFrameSink, TransportPump};

use crate::error::Result;

/// Where outbound frames go.
///
/// The session's writer implements this over the TCP stream; tests drop in
/// a collecting sink. Handlers and timers share one sink through an `Arc`.
pub trait FrameSink: Send + Sync {
    /// Write one finished frame (header included) to the wire.
    fn send_frame(&self, frame: &[u8]) -> Result<()>;
}

/// Sub-protocol selector written as the first byte of a fresh connection.
pub mod selector {
    /// The chat service.
    pub const CHAT: u8 = 0x01;
    /// The file-transfer service.
    pub const FILE_TRANSFER: u8 = 0x02;
}
