//! Protocol-level building blocks: packet identifiers, dispatch priority,
//! the dispatch table, the authentication state machine, and the logon /
//! version-check math it relies on.

pub mod dispatcher;
pub mod handshake;
pub mod priority;
pub mod revision;
pub mod srp;

pub use dispatcher::{handler, DispatchOutcome, DispatchTable, Handler};
pub use handshake::ConnectionState;
pub use priority::{FrameQueue, Priority, PriorityProvider, PriorityQueue, PriorityResolver};

/// Packet identifiers of the legacy chat service.
///
/// Single-byte tags from the frame header; named by what the message does.
pub mod ids {
    /// Empty keep-alive frame, sent on a fixed interval once in chat.
    pub const KEEP_ALIVE: u8 = 0x00;
    /// Enter-chat request/response.
    pub const ENTER_CHAT: u8 = 0x0A;
    /// Channel-list request sent right after entering chat.
    pub const CHANNEL_LIST: u8 = 0x0B;
    /// Join-channel request.
    pub const JOIN_CHANNEL: u8 = 0x0C;
    /// Periodic "check for updated advertisement" request.
    pub const CHECK_AD: u8 = 0x15;
    /// Ping with a 4-byte cookie, echoed back verbatim.
    pub const PING: u8 = 0x25;
    /// Legacy single-round logon (plaintext-equivalent status codes).
    pub const LEGACY_LOGON: u8 = 0x3A;
    /// Ladder-map info request (war products).
    pub const LADDER_MAP_INFO: u8 = 0x44;
    /// Server auth info: token, logon method, version-check challenge.
    pub const AUTH_INFO: u8 = 0x50;
    /// Version/key check request and result.
    pub const AUTH_CHECK: u8 = 0x51;
    /// Account-creation sub-exchange on the SRP path.
    pub const ACCOUNT_CREATE: u8 = 0x52;
    /// SRP logon round 1: client public value + username.
    pub const ACCOUNT_LOGON: u8 = 0x53;
    /// SRP logon round 2: client proof, server proof.
    pub const ACCOUNT_LOGON_PROOF: u8 = 0x54;
    /// Reserved anti-cheat challenge channel.
    pub const CHALLENGE: u8 = 0x5E;
    /// Friends-list request (non-war products).
    pub const FRIENDS_LIST: u8 = 0x65;
}
