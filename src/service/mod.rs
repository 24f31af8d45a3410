//! Session services: the public client surface and the anti-cheat seam.

pub mod challenge;
pub mod session;

pub use challenge::ChallengeModule;
pub use session::{
    EventCallback, PendingRequests, Session, SessionBuilder, SessionContext,
    SessionCredentials, SessionEvent,
};
