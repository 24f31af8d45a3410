//! Anti-cheat challenge module seam.
//!
//! The anti-cheat component is external and pluggable: it owns the
//! reserved challenge identifier's frames and runs its own challenge /
//! response protocol over them. The core only knows how to seed it, feed
//! it frames, and disable it.

use crate::error::Result;
use crate::transport::FrameSink;

/// A pluggable anti-cheat module.
///
/// Installed on the session before connecting. `initialize` is called once
/// during the handshake with a seed derived from the key proof; a failure
/// there tears the module down and disables it for the rest of the session
/// without aborting the connection.
pub trait ChallengeModule: Send {
    /// Prepare the module with the handshake-derived seed.
    fn initialize(&mut self, seed: &[u8]) -> Result<()>;

    /// One inbound frame on the challenge channel. Responses go out
    /// through `sink`.
    fn handle_frame(&mut self, payload: &[u8], sink: &dyn FrameSink) -> Result<()>;

    /// Release any module resources. Called when the module is disabled or
    /// the session ends.
    fn teardown(&mut self) {}
}
