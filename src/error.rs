//! # Error Types
//!
//! Comprehensive error handling for the chat-service protocol client.
//!
//! This module defines all error variants that can occur during a session,
//! from low-level I/O errors to handshake-sequencing failures.
//!
//! ## Error Categories
//! - **I/O Errors**: socket and file system failures
//! - **Framing Errors**: malformed headers, impossible declared lengths
//! - **Decode Errors**: a handler read past the end of a payload
//! - **Handshake Errors**: version check, key proof, and logon failures
//! - **Configuration Errors**: invalid or missing client settings
//!
//! Transport and framing errors terminate the session; decode errors are
//! local to the handler that raised them and are contained by the dispatch
//! loop. See [`HandshakeFailure::is_fatal`] for the handshake policy.

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common cases.
pub mod constants {
    /// Dispatch-table errors
    pub const ERR_TABLE_POISONED: &str = "Dispatch table lock poisoned";
    pub const ERR_RESERVED_IDENTIFIER: &str =
        "Identifier is reserved for the challenge channel; use set_challenge_handler";

    /// Framing errors
    pub const ERR_BAD_MARKER: &str = "Frame header missing 0xFF marker byte";
    pub const ERR_SHORT_LENGTH: &str = "Declared frame length shorter than the header";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_NOT_CONNECTED: &str = "Session is not connected";

    /// Handshake errors
    pub const ERR_CLIENT_CHECK_FAILED: &str = "Server rejected the version/key check";
    pub const ERR_UPGRADE_REQUIRED: &str = "Server requires an unsupported client upgrade";
    pub const ERR_SERVER_PROOF: &str = "Server logon proof did not match the expected value";
    pub const ERR_NO_KEYS: &str = "No product keys configured for the key proof";

    /// File-transfer errors
    pub const ERR_TRANSFER_HEADER: &str = "File-transfer response header malformed";
}

/// Status codes a logon response can carry, normalized across the legacy
/// and SRP sub-protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogonStatus {
    Success,
    AccountAbsent,
    BadPassword,
    AccountClosed,
    AccountCreateRequested,
    UpgradeRequired,
    Unknown(u32),
}

/// Failures raised while sequencing the authentication handshake.
///
/// Most of these close the connection; a server-proof mismatch is reported
/// but tolerated unless strict verification is configured.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeFailure {
    #[error("client check failed with status {0:#x}")]
    ClientCheckFailed(u32),

    #[error("logon rejected: {0:?}")]
    LogonRejected(LogonStatus),

    #[error("account creation rejected with status {0:#x}")]
    AccountCreateRejected(u32),

    #[error("server requires an unsupported client upgrade")]
    UpgradeRequired,

    #[error("server logon proof mismatch")]
    ServerProofMismatch,

    #[error("handshake frame arrived in state {0}")]
    OutOfSequence(&'static str),
}

impl HandshakeFailure {
    /// Whether this failure must close the connection.
    ///
    /// `ServerProofMismatch` is the one recoverable case; the legacy service
    /// family tolerates servers that cannot prove their identity.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, HandshakeFailure::ServerProofMismatch)
    }
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("framing violation: declared length {declared} is impossible")]
    FramingViolation { declared: u16 },

    #[error("framing violation: header marker byte {0:#04x} is not 0xff")]
    BadMarker(u8),

    #[error("truncated frame: needed {needed} bytes, {remaining} remained")]
    TruncatedFrame { needed: usize, remaining: usize },

    #[error("payload of {0} bytes does not fit a 16-bit frame length")]
    OversizedPayload(usize),

    #[error("text field is not valid {encoding}: {detail}")]
    InvalidText {
        encoding: &'static str,
        detail: String,
    },

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeFailure),

    #[error("anti-cheat module failed to initialize: {0}")]
    AntiCheatInit(String),

    #[error("identifier {0:#04x} is reserved")]
    ReservedIdentifier(u8),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("session is not connected")]
    NotConnected,

    #[error("file transfer failed: {0}")]
    FileTransfer(String),

    #[error("revision check failed: {0}")]
    RevisionCheck(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("{0}")]
    Custom(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
