//! # TCP Transport and the Transport Pump
//!
//! The session runs over one long-lived blocking TCP connection. This
//! module owns the two pieces that touch the socket directly: the shared
//! frame writer and the pump thread that turns the inbound byte stream
//! into prioritized frames.
//!
//! The pump does no decoding beyond framing. Each iteration reads exactly
//! one frame: 4 header bytes, then the declared payload into a pooled
//! buffer (or a one-off allocation for oversized frames), then a push into
//! the shared queue and a wakeup for the dispatcher.
//!
//! Shutdown: the session sets the closing flag and shuts the socket down;
//! the pump's blocked read fails, it observes the flag, and exits cleanly.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, trace, warn};

use crate::config::TransportConfig;
use crate::core::frame::{Frame, FrameHeader, HEADER_LEN};
use crate::error::{ProtocolError, Result};
use crate::protocol::priority::{FrameQueue, PriorityResolver};
use crate::transport::{selector, FrameSink};
use crate::utils::buffer_pool::BufferPool;
use crate::utils::metrics::global_metrics;

/// Open the chat-service connection: resolve, connect with the configured
/// timeout, disable Nagle, and write the sub-protocol selector byte.
pub fn connect(config: &TransportConfig) -> Result<TcpStream> {
    let stream = connect_raw(config, selector::CHAT)?;
    info!(address = %config.address, "Connected to chat service");
    global_metrics().connection_established();
    Ok(stream)
}

/// Open a connection for an arbitrary sub-protocol selector.
pub(crate) fn connect_raw(config: &TransportConfig, selector_byte: u8) -> Result<TcpStream> {
    let mut last_err = None;
    let addrs = config.address.to_socket_addrs().map_err(|e| {
        ProtocolError::ConfigError(format!("cannot resolve '{}': {e}", config.address))
    })?;

    for addr in addrs {
        match TcpStream::connect_timeout(&addr, config.connect_timeout) {
            Ok(mut stream) => {
                stream.set_nodelay(true)?;
                stream.write_all(&[selector_byte])?;
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err
        .map(ProtocolError::Io)
        .unwrap_or_else(|| ProtocolError::ConfigError("address resolved to nothing".into())))
}

/// Shared writer over the session socket.
///
/// Writes are serialized by a mutex: the dispatcher thread and the timer
/// thread both send through this sink. Each frame is staged through the
/// outbound buffer pool on its way to the socket.
pub struct TcpFrameSink {
    stream: Mutex<TcpStream>,
    pool: BufferPool,
}

impl TcpFrameSink {
    pub fn new(stream: TcpStream, pool: BufferPool) -> Self {
        Self {
            stream: Mutex::new(stream),
            pool,
        }
    }
}

impl FrameSink for TcpFrameSink {
    fn send_frame(&self, frame: &[u8]) -> Result<()> {
        let mut scratch = self.pool.acquire_for(frame.len());
        scratch.extend_from_slice(frame);

        let mut stream = self
            .stream
            .lock()
            .map_err(|_| ProtocolError::Custom("frame sink lock poisoned".into()))?;
        stream.write_all(&scratch)?;
        global_metrics().frame_sent((frame.len() - HEADER_LEN) as u64);
        trace!(bytes = frame.len(), "Frame written");
        Ok(())
    }
}

/// The listener half of the pipeline: reads frames off the socket,
/// classifies them, and feeds the dispatcher's queue.
pub struct TransportPump {
    stream: TcpStream,
    queue: Arc<FrameQueue>,
    resolver: PriorityResolver,
    pool: BufferPool,
    closing: Arc<AtomicBool>,
}

impl TransportPump {
    pub fn new(
        stream: TcpStream,
        queue: Arc<FrameQueue>,
        resolver: PriorityResolver,
        pool: BufferPool,
        closing: Arc<AtomicBool>,
    ) -> Self {
        Self {
            stream,
            queue,
            resolver,
            pool,
            closing,
        }
    }

    /// Pump frames until the connection closes.
    ///
    /// Returns `Ok(())` for an orderly close (EOF or local shutdown) and an
    /// error for framing violations or unexpected I/O failures. Either way
    /// the caller owns surfacing the outcome and closing the queue.
    pub fn run(mut self) -> Result<()> {
        loop {
            let mut header = [0u8; HEADER_LEN];
            if let Err(e) = self.stream.read_exact(&mut header) {
                if self.closing.load(Ordering::SeqCst)
                    || e.kind() == std::io::ErrorKind::UnexpectedEof
                {
                    debug!("Transport pump exiting on connection close");
                    return Ok(());
                }
                return Err(e.into());
            }

            let header = FrameHeader::parse(header)?;
            let payload_len = header.payload_len();

            let mut payload = self.pool.acquire_for(payload_len);
            if payload_len > 0 {
                payload.resize(payload_len, 0);
                if let Err(e) = self.stream.read_exact(&mut payload) {
                    // A frame torn mid-payload is a disconnect regardless
                    // of errno.
                    if self.closing.load(Ordering::SeqCst) {
                        return Ok(());
                    }
                    warn!(
                        identifier = header.identifier,
                        expected = payload_len,
                        "Disconnected mid-payload"
                    );
                    return Err(e.into());
                }
            }

            global_metrics().frame_received(payload_len as u64);

            let priority = self.resolver.resolve(header.identifier);
            trace!(
                identifier = format_args!("{:#04x}", header.identifier),
                payload = payload_len,
                ?priority,
                "Frame received"
            );
            self.queue
                .push(priority, Frame::new(header.identifier, payload));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn pump_over(wire: &'static [u8]) -> (Arc<FrameQueue>, Result<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut peer, _) = listener.accept().unwrap();
            peer.write_all(wire).unwrap();
            // Closing the socket ends the pump loop.
        });

        let stream = TcpStream::connect(addr).unwrap();
        let queue = Arc::new(FrameQueue::new());
        let pump = TransportPump::new(
            stream,
            queue.clone(),
            PriorityResolver::new(),
            BufferPool::new(4, 64),
            Arc::new(AtomicBool::new(false)),
        );
        let outcome = pump.run();
        server.join().unwrap();
        (queue, outcome)
    }

    #[test]
    fn frames_and_eof_handled() {
        // One empty frame, one with payload, then EOF.
        let (queue, outcome) = pump_over(&[
            0xFF, 0x00, 0x04, 0x00, // keep-alive
            0xFF, 0x25, 0x08, 0x00, 0xDD, 0xCC, 0xBB, 0xAA, // ping cookie
        ]);
        assert!(outcome.is_ok());

        let first = queue.pop_wait().unwrap();
        assert_eq!(first.identifier(), 0x00);
        assert!(first.payload().is_empty());

        let second = queue.pop_wait().unwrap();
        assert_eq!(second.identifier(), 0x25);
        assert_eq!(second.payload(), &[0xDD, 0xCC, 0xBB, 0xAA]);
    }

    #[test]
    fn short_declared_length_is_fatal() {
        let (queue, outcome) = pump_over(&[0xFF, 0x10, 0x02, 0x00]);
        assert!(matches!(
            outcome,
            Err(ProtocolError::FramingViolation { declared: 2 })
        ));
        assert!(queue.is_empty());
    }

    #[test]
    fn torn_payload_is_a_disconnect() {
        // Declares 8 total bytes but the peer hangs up after 2 of payload.
        let (_queue, outcome) = pump_over(&[0xFF, 0x25, 0x08, 0x00, 0x01, 0x02]);
        assert!(matches!(outcome, Err(ProtocolError::Io(_))));
    }
}
