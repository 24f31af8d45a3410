//! # Session
//!
//! Wires the whole pipeline together: one TCP connection, the transport
//! pump thread, the dispatcher thread, the dispatch table, and the
//! connection/authentication state machine.
//!
//! Threading model: the pump reads and classifies frames; the dispatcher
//! decodes and runs handlers. All session state (the state machine, SRP
//! exchange, pending pings) lives in [`SessionContext`] and is touched
//! only on the dispatcher thread, so handlers never lock it. The priority
//! queue and its condition variable are the only shared pipeline state.
//!
//! Shutdown: [`Session::shutdown`] (or a fatal error on either thread)
//! trips one shared signal that sets the closing flag, shuts the socket
//! down to unblock the pump, and closes the queue to release the
//! dispatcher. Buffers held by in-flight frames drain with the queue;
//! anything already handed to a handler is reclaimed by its lease drop.

use std::any::Any;
use std::collections::HashMap;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use rand::Rng;
use tracing::{debug, error, info, warn};
use zeroize::Zeroize;

use crate::config::ChatwireConfig;
use crate::core::builder::FrameBuilder;
use crate::core::frame::Frame;
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::{handler, DispatchOutcome, DispatchTable, Handler};
use crate::protocol::handshake::{self, ConnectionState};
use crate::protocol::priority::{FrameQueue, Priority, PriorityProvider, PriorityResolver};
use crate::protocol::srp::SrpClient;
use crate::protocol::{ids, srp};
use crate::service::challenge::ChallengeModule;
use crate::transport::tcp::{self, TcpFrameSink, TransportPump};
use crate::transport::FrameSink;
use crate::utils::buffer_pool::BufferPool;
use crate::utils::metrics::global_metrics;

/// Things a session tells the outside world.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The TCP connection is up and the handshake has started.
    Connected,
    /// The handshake completed; the session is usable.
    EnteredChat { unique_name: String },
    /// The server's logon proof did not match; tolerated unless strict
    /// verification is configured.
    ServerProofMismatch,
    /// The anti-cheat module failed to initialize and was disabled.
    AntiCheatDisabled { reason: String },
    /// A handler raised a decode error; the pipeline continues.
    HandlerFault { identifier: u8, error: String },
    /// A fatal error; the connection is closing.
    Error { error: String },
    /// Both pipeline threads have ended.
    Disconnected,
}

/// Session event callback. Invoked on whichever session thread raises the
/// event; keep it quick.
pub type EventCallback = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

fn log_only_events() -> EventCallback {
    Arc::new(|event| debug!(?event, "Session event"))
}

/// The client/server token pair for the authentication phase.
#[derive(Debug, Default, Zeroize)]
pub struct SessionCredentials {
    pub client_token: u32,
    pub server_token: u32,
}

/// Cookie correlation for outbound requests.
///
/// Collaborators stash whatever state their response handler needs under a
/// fresh cookie; the map is cleared on disconnect, so an orphaned cookie
/// leaks only until then.
#[derive(Default)]
pub struct PendingRequests {
    next_cookie: AtomicU32,
    map: Mutex<HashMap<u32, Box<dyn Any + Send>>>,
}

impl PendingRequests {
    /// Stash request state and return the cookie to embed in the frame.
    pub fn issue(&self, data: Box<dyn Any + Send>) -> u32 {
        let cookie = self.next_cookie.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if let Ok(mut map) = self.map.lock() {
            map.insert(cookie, data);
        }
        cookie
    }

    /// Consume and return the state for a response's cookie.
    pub fn claim(&self, cookie: u32) -> Option<Box<dyn Any + Send>> {
        self.map.lock().ok().and_then(|mut map| map.remove(&cookie))
    }

    pub fn len(&self) -> usize {
        self.map.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut map) = self.map.lock() {
            map.clear();
        }
    }
}

/// One shared trip wire for ending the session.
pub(crate) struct ShutdownSignal {
    closing: Arc<AtomicBool>,
    queue: Arc<FrameQueue>,
    stream: Mutex<Option<TcpStream>>,
}

impl ShutdownSignal {
    fn new(queue: Arc<FrameQueue>, stream: Option<TcpStream>) -> Self {
        Self {
            closing: Arc::new(AtomicBool::new(false)),
            queue,
            stream: Mutex::new(stream),
        }
    }

    pub(crate) fn trigger(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(stream) = self.stream.lock() {
            if let Some(stream) = stream.as_ref() {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
        self.queue.close();
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    fn closing_flag(&self) -> Arc<AtomicBool> {
        self.closing.clone()
    }
}

/// Per-connection state, owned by the dispatcher thread and handed to
/// every handler.
pub struct SessionContext {
    pub(crate) config: Arc<ChatwireConfig>,
    pub(crate) state: ConnectionState,
    pub(crate) credentials: SessionCredentials,
    /// Logon capability advertised by the server's auth info.
    pub(crate) login_type: u32,
    pub(crate) srp: Option<SrpClient>,
    pub(crate) expected_server_proof: Option<[u8; srp::PROOF_LEN]>,
    pub(crate) deferred_ping: Option<u32>,
    pub(crate) unique_name: Option<String>,
    sink: Arc<dyn FrameSink>,
    events: EventCallback,
    pending: Arc<PendingRequests>,
    challenge: Option<Box<dyn ChallengeModule>>,
    shutdown: Arc<ShutdownSignal>,
    timer: Option<JoinHandle<()>>,
}

impl SessionContext {
    fn new(
        config: Arc<ChatwireConfig>,
        sink: Arc<dyn FrameSink>,
        events: EventCallback,
        challenge: Option<Box<dyn ChallengeModule>>,
        shutdown: Arc<ShutdownSignal>,
    ) -> Self {
        Self {
            config,
            state: ConnectionState::AwaitingAuthInfo,
            credentials: SessionCredentials {
                client_token: rand::rng().random(),
                server_token: 0,
            },
            login_type: 0,
            srp: None,
            expected_server_proof: None,
            deferred_ping: None,
            unique_name: None,
            sink,
            events,
            pending: Arc::new(PendingRequests::default()),
            challenge,
            shutdown,
            timer: None,
        }
    }

    /// Context without a live connection, for exercising handlers against
    /// a collecting sink.
    #[cfg(test)]
    pub(crate) fn for_tests(
        config: ChatwireConfig,
        sink: Arc<dyn FrameSink>,
        events: EventCallback,
    ) -> Self {
        Self::new(
            Arc::new(config),
            sink,
            events,
            None,
            Arc::new(ShutdownSignal::new(Arc::new(FrameQueue::new()), None)),
        )
    }

    pub fn config(&self) -> &ChatwireConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The session's unique chat name, once entered.
    pub fn unique_name(&self) -> Option<&str> {
        self.unique_name.as_deref()
    }

    /// The cookie correlation map for outbound requests.
    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Write a finished frame to the connection.
    pub fn send_frame(&self, frame: &[u8]) -> Result<()> {
        self.sink.send_frame(frame)
    }

    /// The shared outbound sink, for timers and challenge modules.
    pub fn sink(&self) -> Arc<dyn FrameSink> {
        self.sink.clone()
    }

    /// Raise a session event.
    pub fn emit(&self, event: SessionEvent) {
        (*self.events)(&event);
    }

    /// Begin an orderly close of the connection.
    pub fn request_close(&mut self) {
        self.state = ConnectionState::Closed;
        self.shutdown.trigger();
    }

    pub fn is_closing(&self) -> bool {
        self.shutdown.is_closing()
    }

    /// Seed the anti-cheat module during the handshake. A failure disables
    /// the module for the session and is surfaced as a warning event, not
    /// an error.
    pub(crate) fn init_challenge(&mut self, seed: &[u8]) {
        let Some(mut module) = self.challenge.take() else {
            return;
        };
        match module.initialize(seed) {
            Ok(()) => self.challenge = Some(module),
            Err(e) => {
                module.teardown();
                warn!(error = %e, "Anti-cheat module disabled");
                self.emit(SessionEvent::AntiCheatDisabled {
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Default handler for the reserved challenge identifier: forward to
    /// the installed module, or drop the frame when there is none.
    pub(crate) fn handle_challenge_frame(&mut self, frame: Frame) -> Result<()> {
        match self.challenge.as_mut() {
            Some(module) => {
                let sink = self.sink.clone();
                module.handle_frame(frame.payload(), sink.as_ref())
            }
            None => {
                debug!("Challenge frame dropped; no module installed");
                Ok(())
            }
        }
    }

    /// Start the keep-alive and ad-check timers. Called once on entering
    /// chat; later calls are no-ops.
    pub(crate) fn start_timers(&mut self) {
        if self.timer.is_some() {
            return;
        }

        let sink = self.sink.clone();
        let closing = self.shutdown.closing_flag();
        let keepalive_every = self.config.transport.keepalive_interval;
        let ad_check_every = self.config.transport.ad_check_interval;
        let platform = self.config.client.platform.clone();
        let product = self.config.client.product.clone();

        let handle = thread::Builder::new()
            .name("chatwire-timer".into())
            .spawn(move || {
                let tick = std::time::Duration::from_millis(250);
                let mut next_keepalive = Instant::now() + keepalive_every;
                let mut next_ad_check = Instant::now() + ad_check_every;

                while !closing.load(Ordering::SeqCst) {
                    thread::sleep(tick);
                    let now = Instant::now();

                    if now >= next_keepalive {
                        next_keepalive = now + keepalive_every;
                        let frame = FrameBuilder::new(ids::KEEP_ALIVE).finish();
                        if frame.and_then(|f| sink.send_frame(&f)).is_err() {
                            break;
                        }
                    }

                    if now >= next_ad_check {
                        next_ad_check = now + ad_check_every;
                        let mut builder = FrameBuilder::new(ids::CHECK_AD);
                        builder
                            .insert_dword_string(&platform, true)
                            .insert_dword_string(&product, true)
                            .insert_u32(0)
                            .insert_u32(0);
                        if builder.finish().and_then(|f| sink.send_frame(&f)).is_err() {
                            break;
                        }
                    }
                }
                debug!("Timer thread exiting");
            });

        match handle {
            Ok(handle) => self.timer = Some(handle),
            Err(e) => warn!(error = %e, "Failed to start timer thread"),
        }
    }

    /// End-of-session cleanup on the dispatcher thread.
    fn finish(&mut self) {
        self.state = ConnectionState::Closed;
        self.credentials.zeroize();
        self.srp = None;
        self.expected_server_proof = None;
        self.pending.clear();
        if let Some(mut module) = self.challenge.take() {
            module.teardown();
        }
        if let Some(timer) = self.timer.take() {
            // Closing flag is already set; the timer exits within a tick.
            let _ = timer.join();
        }
    }
}

/// Built-in priority overrides: the challenge channel and pings jump the
/// queue so the anti-cheat deadline and latency measurement are not stuck
/// behind bulk traffic.
struct BuiltinPriorities;

impl PriorityProvider for BuiltinPriorities {
    fn priority_for(&self, identifier: u8) -> Option<Priority> {
        match identifier {
            ids::CHALLENGE | ids::PING => Some(Priority::High),
            _ => None,
        }
    }
}

/// Builder for [`Session`].
pub struct SessionBuilder {
    config: ChatwireConfig,
    events: Option<EventCallback>,
    challenge: Option<Box<dyn ChallengeModule>>,
}

impl SessionBuilder {
    /// Receive session events through `callback`.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.events = Some(Arc::new(callback));
        self
    }

    /// Install an anti-cheat module for the reserved challenge channel.
    pub fn challenge_module(mut self, module: Box<dyn ChallengeModule>) -> Self {
        self.challenge = Some(module);
        self
    }

    /// Connect and start the pipeline threads.
    pub fn connect(self) -> Result<Session> {
        Session::start(self)
    }
}

/// A live client session.
pub struct Session {
    config: Arc<ChatwireConfig>,
    table: Arc<DispatchTable<SessionContext>>,
    resolver: PriorityResolver,
    queue: Arc<FrameQueue>,
    shutdown: Arc<ShutdownSignal>,
    pump: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Session {
    /// Start configuring a session.
    pub fn builder(config: ChatwireConfig) -> SessionBuilder {
        SessionBuilder {
            config,
            events: None,
            challenge: None,
        }
    }

    fn start(builder: SessionBuilder) -> Result<Self> {
        let config = Arc::new(builder.config);
        config.validate_strict()?;
        let events = builder.events.unwrap_or_else(log_only_events);

        let stream = tcp::connect(&config.transport)?;

        let inbound_pool = BufferPool::new(
            config.transport.pool_size,
            config.transport.buffer_capacity,
        );
        let outbound_pool = BufferPool::new(
            config.transport.pool_size,
            config.transport.buffer_capacity,
        );

        let queue = Arc::new(FrameQueue::new());
        let shutdown = Arc::new(ShutdownSignal::new(queue.clone(), Some(stream.try_clone()?)));
        let sink: Arc<dyn FrameSink> =
            Arc::new(TcpFrameSink::new(stream.try_clone()?, outbound_pool));

        let resolver = PriorityResolver::new();
        resolver.register(Arc::new(BuiltinPriorities));

        let table = Arc::new(DispatchTable::new(ids::CHALLENGE));
        handshake::register_builtin(&table)?;
        table.set_challenge_handler(Some(handler(|ctx: &mut SessionContext, frame| {
            ctx.handle_challenge_frame(frame)
        })));

        let mut ctx = SessionContext::new(
            config.clone(),
            sink,
            events.clone(),
            builder.challenge,
            shutdown.clone(),
        );

        ctx.emit(SessionEvent::Connected);
        handshake::send_auth_info(&mut ctx)?;

        let pump = TransportPump::new(
            stream,
            queue.clone(),
            resolver.clone(),
            inbound_pool,
            shutdown.closing_flag(),
        );
        let pump_shutdown = shutdown.clone();
        let pump_events = events.clone();
        let pump_handle = thread::Builder::new()
            .name("chatwire-pump".into())
            .spawn(move || {
                match pump.run() {
                    Ok(()) => info!("Transport pump ended"),
                    Err(e) => {
                        error!(error = %e, "Transport pump failed");
                        (*pump_events)(&SessionEvent::Error {
                            error: e.to_string(),
                        });
                    }
                }
                pump_shutdown.trigger();
            })
            .map_err(|e| ProtocolError::Custom(format!("failed to spawn pump thread: {e}")))?;

        let dispatch_table = table.clone();
        let dispatch_queue = queue.clone();
        let dispatcher_handle = thread::Builder::new()
            .name("chatwire-dispatch".into())
            .spawn(move || dispatch_loop(dispatch_table, dispatch_queue, ctx))
            .map_err(|e| {
                ProtocolError::Custom(format!("failed to spawn dispatcher thread: {e}"))
            })?;

        Ok(Self {
            config,
            table,
            resolver,
            queue,
            shutdown,
            pump: Some(pump_handle),
            dispatcher: Some(dispatcher_handle),
        })
    }

    pub fn config(&self) -> &ChatwireConfig {
        &self.config
    }

    /// Register a handler for `identifier`, returning the previous one.
    pub fn register_handler(
        &self,
        identifier: u8,
        handler: Handler<SessionContext>,
    ) -> Result<Option<Handler<SessionContext>>> {
        self.table.register(identifier, handler)
    }

    /// Restore `previous` (from [`Session::register_handler`]) for
    /// `identifier`.
    pub fn unregister_handler(&self, identifier: u8, previous: Option<Handler<SessionContext>>) {
        self.table.unregister(identifier, previous)
    }

    /// Replace the dedicated challenge-channel handler.
    pub fn set_challenge_handler(&self, handler: Option<Handler<SessionContext>>) {
        self.table.set_challenge_handler(handler)
    }

    /// The priority override chain, for runtime registration.
    pub fn priority_resolver(&self) -> &PriorityResolver {
        &self.resolver
    }

    /// Frames queued but not yet dispatched.
    pub fn backlog(&self) -> usize {
        self.queue.len()
    }

    pub fn is_closing(&self) -> bool {
        self.shutdown.is_closing()
    }

    /// Close the connection and join both pipeline threads.
    pub fn shutdown(mut self) -> Result<()> {
        self.shutdown.trigger();
        self.join_threads()
    }

    /// Block until the connection ends on its own.
    pub fn wait(mut self) -> Result<()> {
        self.join_threads()
    }

    fn join_threads(&mut self) -> Result<()> {
        for handle in [self.pump.take(), self.dispatcher.take()].into_iter().flatten() {
            handle
                .join()
                .map_err(|_| ProtocolError::Custom("session thread panicked".into()))?;
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// The dispatcher half of the pipeline: drain the queue, route frames,
/// contain handler faults, and escalate fatal errors into a close.
fn dispatch_loop(
    table: Arc<DispatchTable<SessionContext>>,
    queue: Arc<FrameQueue>,
    mut ctx: SessionContext,
) {
    while let Some(frame) = queue.pop_wait() {
        let identifier = frame.identifier();
        match table.dispatch(&mut ctx, frame) {
            Ok(DispatchOutcome::Handled) => {}
            Ok(DispatchOutcome::Unhandled) => {
                global_metrics().frame_unhandled();
                debug!(
                    identifier = format_args!("{identifier:#04x}"),
                    "No handler registered; frame dropped"
                );
            }
            Err(e) => {
                let fatal = match &e {
                    ProtocolError::Handshake(failure) => failure.is_fatal(),
                    ProtocolError::Io(_) | ProtocolError::ConnectionClosed => true,
                    _ => false,
                };
                if fatal {
                    error!(
                        identifier = format_args!("{identifier:#04x}"),
                        error = %e,
                        "Fatal error; closing connection"
                    );
                    if matches!(&e, ProtocolError::Handshake(_)) {
                        global_metrics().handshake_failed();
                    }
                    ctx.emit(SessionEvent::Error {
                        error: e.to_string(),
                    });
                    ctx.request_close();
                } else {
                    global_metrics().handler_fault();
                    warn!(
                        identifier = format_args!("{identifier:#04x}"),
                        error = %e,
                        "Handler fault; pipeline continues"
                    );
                    ctx.emit(SessionEvent::HandlerFault {
                        identifier,
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    ctx.finish();
    ctx.emit(SessionEvent::Disconnected);
    debug!("Dispatcher thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_requests_issue_and_claim() {
        let pending = PendingRequests::default();
        let cookie = pending.issue(Box::new("profile lookup".to_string()));
        let other = pending.issue(Box::new(42u32));
        assert_ne!(cookie, other);
        assert_eq!(pending.len(), 2);

        let claimed = pending.claim(cookie).unwrap();
        assert_eq!(
            claimed.downcast_ref::<String>().map(String::as_str),
            Some("profile lookup")
        );
        // A cookie is consumed on claim.
        assert!(pending.claim(cookie).is_none());

        pending.clear();
        assert!(pending.is_empty());
    }

    #[test]
    fn credentials_zero_on_reset() {
        let mut credentials = SessionCredentials {
            client_token: 0x1234_5678,
            server_token: 0xAABB_CCDD,
        };
        credentials.zeroize();
        assert_eq!(credentials.client_token, 0);
        assert_eq!(credentials.server_token, 0);
    }

    #[test]
    fn builtin_priorities_raise_challenge_and_ping() {
        let provider = BuiltinPriorities;
        assert_eq!(provider.priority_for(ids::CHALLENGE), Some(Priority::High));
        assert_eq!(provider.priority_for(ids::PING), Some(Priority::High));
        assert_eq!(provider.priority_for(ids::AUTH_INFO), None);
    }
}
