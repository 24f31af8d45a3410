//! # Dispatch Table
//!
//! Mutable mapping from packet identifier to handler, replaceable at
//! runtime. External collaborators (clan roster, friends list, chat-room
//! bookkeeping, ad rotation, profile lookups) layer their behavior by
//! registering over an identifier and restoring the previous handler when
//! they detach:
//!
//! ```text
//! let previous = table.register(0x65, handler)?;
//! // ...
//! table.unregister(0x65, previous);
//! ```
//!
//! One identifier is reserved for the anti-cheat challenge channel and
//! cannot be registered through the generic path; it has a dedicated
//! single-slot handler instead.
//!
//! Handlers are invoked synchronously on the dispatcher thread, which is
//! the sole place session state is mutated, so they take `&mut C` without
//! any further locking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::core::frame::Frame;
use crate::error::{ProtocolError, Result};

/// A registered frame handler.
///
/// The `Arc<Mutex<..>>` wrapper lets the table hand the handler out without
/// holding the table lock during invocation, so a handler may register or
/// unregister others while it runs.
pub type Handler<C> = Arc<Mutex<dyn FnMut(&mut C, Frame) -> Result<()> + Send>>;

/// Convenience constructor for [`Handler`] values.
pub fn handler<C, F>(f: F) -> Handler<C>
where
    F: FnMut(&mut C, Frame) -> Result<()> + Send + 'static,
{
    Arc::new(Mutex::new(f))
}

/// What the table did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    /// No handler registered; the frame was dropped and its buffer lease
    /// reclaimed.
    Unhandled,
}

/// Identifier → handler registry with runtime override.
pub struct DispatchTable<C> {
    handlers: RwLock<HashMap<u8, Handler<C>>>,
    challenge_id: u8,
    challenge: Mutex<Option<Handler<C>>>,
}

impl<C> DispatchTable<C> {
    /// Create a table reserving `challenge_id` for the challenge channel.
    pub fn new(challenge_id: u8) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            challenge_id,
            challenge: Mutex::new(None),
        }
    }

    /// Register a handler, returning the one it replaced so the caller can
    /// chain to it or restore it later.
    ///
    /// # Errors
    /// [`ProtocolError::ReservedIdentifier`] for the challenge identifier.
    pub fn register(&self, identifier: u8, handler: Handler<C>) -> Result<Option<Handler<C>>> {
        if identifier == self.challenge_id {
            return Err(ProtocolError::ReservedIdentifier(identifier));
        }
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::Custom(crate::error::constants::ERR_TABLE_POISONED.into()))?;
        Ok(handlers.insert(identifier, handler))
    }

    /// Put `previous` (as returned by [`DispatchTable::register`]) back for
    /// `identifier`; `None` clears the slot.
    pub fn unregister(&self, identifier: u8, previous: Option<Handler<C>>) {
        if identifier == self.challenge_id {
            return;
        }
        if let Ok(mut handlers) = self.handlers.write() {
            match previous {
                Some(handler) => {
                    handlers.insert(identifier, handler);
                }
                None => {
                    handlers.remove(&identifier);
                }
            }
        }
    }

    /// Install or clear the dedicated challenge-channel handler.
    pub fn set_challenge_handler(&self, handler: Option<Handler<C>>) {
        if let Ok(mut slot) = self.challenge.lock() {
            *slot = handler;
        }
    }

    /// The reserved challenge identifier.
    pub fn challenge_id(&self) -> u8 {
        self.challenge_id
    }

    fn lookup(&self, identifier: u8) -> Option<Handler<C>> {
        if identifier == self.challenge_id {
            return self.challenge.lock().ok().and_then(|slot| slot.clone());
        }
        self.handlers
            .read()
            .ok()
            .and_then(|handlers| handlers.get(&identifier).cloned())
    }

    /// Route one frame to its handler.
    ///
    /// The frame is consumed either way; with no handler registered its
    /// buffer lease drops here, returning a pool-sized buffer exactly once.
    pub fn dispatch(&self, ctx: &mut C, frame: Frame) -> Result<DispatchOutcome> {
        let identifier = frame.identifier();
        let Some(handler) = self.lookup(identifier) else {
            drop(frame);
            return Ok(DispatchOutcome::Unhandled);
        };

        let mut handler = handler
            .lock()
            .map_err(|_| ProtocolError::Custom(crate::error::constants::ERR_TABLE_POISONED.into()))?;
        (*handler)(ctx, frame)?;
        Ok(DispatchOutcome::Handled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::buffer_pool::BufferPool;

    const CHALLENGE: u8 = 0x5E;

    fn frame(pool: &BufferPool, id: u8) -> Frame {
        Frame::new(id, pool.acquire())
    }

    #[test]
    fn register_returns_previous_for_restore() {
        let table: DispatchTable<Vec<&'static str>> = DispatchTable::new(CHALLENGE);
        let pool = BufferPool::new(4, 32);
        let mut log = Vec::new();

        let first = table
            .register(
                0x0F,
                handler(|log: &mut Vec<&'static str>, _| {
                    log.push("first");
                    Ok(())
                }),
            )
            .unwrap();
        assert!(first.is_none());

        let previous = table
            .register(
                0x0F,
                handler(|log: &mut Vec<&'static str>, _| {
                    log.push("override");
                    Ok(())
                }),
            )
            .unwrap();
        assert!(previous.is_some());

        table.dispatch(&mut log, frame(&pool, 0x0F)).unwrap();
        table.unregister(0x0F, previous);
        table.dispatch(&mut log, frame(&pool, 0x0F)).unwrap();

        assert_eq!(log, vec!["override", "first"]);
    }

    #[test]
    fn unhandled_frame_reclaims_buffer() {
        let table: DispatchTable<()> = DispatchTable::new(CHALLENGE);
        let pool = BufferPool::new(1, 32);
        let f = frame(&pool, 0xEE);
        assert_eq!(pool.available(), 0);

        let outcome = table.dispatch(&mut (), f).unwrap();
        assert_eq!(outcome, DispatchOutcome::Unhandled);
        // Exactly one release back to the pool.
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn challenge_identifier_is_reserved() {
        let table: DispatchTable<u32> = DispatchTable::new(CHALLENGE);
        let err = match table.register(CHALLENGE, handler(|_, _| Ok(()))) {
            Err(e) => e,
            Ok(_) => panic!("registering the reserved identifier should error"),
        };
        assert!(matches!(err, ProtocolError::ReservedIdentifier(CHALLENGE)));

        let pool = BufferPool::new(2, 32);
        let mut hits = 0u32;
        table.set_challenge_handler(Some(handler(|hits: &mut u32, _| {
            *hits += 1;
            Ok(())
        })));
        table.dispatch(&mut hits, frame(&pool, CHALLENGE)).unwrap();
        assert_eq!(hits, 1);

        table.set_challenge_handler(None);
        let outcome = table.dispatch(&mut hits, frame(&pool, CHALLENGE)).unwrap();
        assert_eq!(outcome, DispatchOutcome::Unhandled);
    }

    #[test]
    fn handler_may_reregister_during_dispatch() {
        let table: Arc<DispatchTable<Vec<u8>>> = Arc::new(DispatchTable::new(CHALLENGE));
        let pool = BufferPool::new(4, 32);
        let mut seen = Vec::new();

        let inner = table.clone();
        table
            .register(
                0x20,
                handler(move |seen: &mut Vec<u8>, f: Frame| {
                    seen.push(f.identifier());
                    // Swapping the table from inside a handler must not
                    // deadlock.
                    inner
                        .register(0x21, handler(|seen: &mut Vec<u8>, _| {
                            seen.push(0x21);
                            Ok(())
                        }))
                        .map(|_| ())
                }),
            )
            .unwrap();

        table.dispatch(&mut seen, frame(&pool, 0x20)).unwrap();
        table.dispatch(&mut seen, frame(&pool, 0x21)).unwrap();
        assert_eq!(seen, vec![0x20, 0x21]);
    }
}
