//! # chatwire
//!
//! Client protocol core for a legacy binary chat/game service.
//!
//! The service speaks a header-framed, packet-ID-addressed, little-endian
//! wire protocol over one persistent TCP connection. This crate owns the
//! parts with real protocol complexity:
//!
//! - **Framing codec** ([`core`]): the 4-byte header contract, a
//!   bounds-checked decode cursor, and a header-patching frame builder.
//! - **Pipeline** ([`transport`], [`protocol`]): a transport-pump thread
//!   that reads and classifies frames, a priority queue with stable FIFO
//!   tiers, and a dispatcher thread that routes frames through a mutable
//!   handler table.
//! - **Handshake** ([`protocol::handshake`]): the version-check, key-proof,
//!   and logon state machine (legacy single-round and SRP-like multi-round)
//!   that must complete before the session is usable.
//! - **Session** ([`service`]): the public surface: connect, register
//!   handlers, receive events, shut down.
//!
//! Collaborating subsystems (clan roster, friends list, chat-room
//! bookkeeping, ad rotation, profile lookups) sit on top of this crate:
//! they register handlers by packet identifier and consume decoded frames.
//!
//! ## Example
//! ```rust,no_run
//! use chatwire::config::ChatwireConfig;
//! use chatwire::service::{Session, SessionEvent};
//!
//! fn main() -> chatwire::error::Result<()> {
//!     let config = ChatwireConfig::default_with_overrides(|c| {
//!         c.client.username = "tester".into();
//!         c.client.password = "sekrit".into();
//!         c.transport.address = "gateway.example.net:6112".into();
//!     });
//!
//!     let session = Session::builder(config)
//!         .on_event(|event| {
//!             if let SessionEvent::EnteredChat { unique_name } = event {
//!                 println!("in chat as {unique_name}");
//!             }
//!         })
//!         .connect()?;
//!
//!     session.wait()
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::config::ChatwireConfig;
pub use crate::core::{BinaryCursor, Encoding, Frame, FrameBuilder, FrameHeader};
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::{ConnectionState, DispatchTable, Priority, PriorityResolver};
pub use crate::service::{ChallengeModule, Session, SessionContext, SessionEvent};
pub use crate::transport::FrameSink;
