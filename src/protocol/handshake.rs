//! # Connection / Authentication State Machine
//!
//! Sequences the version check, the key proofs, and the logon exchange
//! before the session is usable:
//!
//! ```text
//! Disconnected → AwaitingAuthInfo → VersioningInProgress
//!     → AwaitingAuthCheckResult → { LegacyLogon | SrpLogonInProgress }
//!     → AwaitingLogonProof (SRP only) → EnteredChat → Closed
//! ```
//!
//! Error transitions from any state go to `Closed` with a surfaced error.
//! Everything here runs on the dispatcher thread; the protocol is strictly
//! sequential during this phase, so the inline file hashing and the
//! lockdown download block nothing that matters.
//!
//! The server's auth info decides the logon family: login type 0 is the
//! legacy single-round logon; anything else enables the SRP-like exchange,
//! with the configured method as the tie-breaker.

use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};

use crate::config::LogonMethod;
use crate::core::builder::FrameBuilder;
use crate::core::cursor::{BinaryCursor, Encoding};
use crate::core::frame::Frame;
use crate::error::{HandshakeFailure, LogonStatus, ProtocolError, Result};
use crate::protocol::dispatcher::{handler, DispatchTable};
use crate::protocol::ids;
use crate::protocol::revision::{is_lockdown_filename, lockdown_digest, ChecksumFormula};
use crate::protocol::srp::{SrpClient, FIELD_LEN, PROOF_LEN};
use crate::service::session::{SessionContext, SessionEvent};
use crate::transport::filetransfer;
use crate::utils::metrics::global_metrics;

/// Connection lifecycle. Exactly one instance of this progression exists
/// per connection, mutated only on the dispatcher thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    AwaitingAuthInfo,
    VersioningInProgress,
    AwaitingAuthCheckResult,
    LegacyLogon,
    SrpLogonInProgress,
    AwaitingLogonProof,
    EnteredChat,
    Closed,
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::AwaitingAuthInfo => "AwaitingAuthInfo",
            ConnectionState::VersioningInProgress => "VersioningInProgress",
            ConnectionState::AwaitingAuthCheckResult => "AwaitingAuthCheckResult",
            ConnectionState::LegacyLogon => "LegacyLogon",
            ConnectionState::SrpLogonInProgress => "SrpLogonInProgress",
            ConnectionState::AwaitingLogonProof => "AwaitingLogonProof",
            ConnectionState::EnteredChat => "EnteredChat",
            ConnectionState::Closed => "Closed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Marker stashed under a pending-request cookie for a ladder-map info
/// request.
pub struct LadderMapInfoRequest;

/// Install the built-in handshake handlers on a fresh dispatch table.
pub fn register_builtin(table: &DispatchTable<SessionContext>) -> Result<()> {
    table.register(ids::AUTH_INFO, handler(handle_auth_info))?;
    table.register(ids::AUTH_CHECK, handler(handle_auth_check))?;
    table.register(ids::LEGACY_LOGON, handler(handle_legacy_logon))?;
    table.register(ids::ACCOUNT_LOGON, handler(handle_account_logon))?;
    table.register(ids::ACCOUNT_LOGON_PROOF, handler(handle_logon_proof))?;
    table.register(ids::ACCOUNT_CREATE, handler(handle_account_create))?;
    table.register(ids::ENTER_CHAT, handler(handle_enter_chat))?;
    table.register(ids::PING, handler(handle_ping))?;
    Ok(())
}

/// First frame of the handshake: announce platform, product, and locale.
pub fn send_auth_info(ctx: &mut SessionContext) -> Result<()> {
    let client = &ctx.config.client;
    let mut builder = FrameBuilder::new(ids::AUTH_INFO);
    builder
        .insert_u32(0) // protocol id
        .insert_dword_string(&client.platform, true)
        .insert_dword_string(&client.product, true)
        .insert_u32(client.version_byte as u32)
        .insert_dword_string(&client.language, false)
        .insert_u32(0) // local ip, unused by modern servers
        .insert_i32(0) // timezone bias
        .insert_u32(client.locale_id)
        .insert_u32(client.locale_id)
        .insert_cstring(&client.country_abbrev)
        .insert_cstring(&client.country);
    ctx.send_frame(&builder.finish()?)?;
    debug!(product = %client.product, "Auth info sent");
    Ok(())
}

fn expect_state(ctx: &SessionContext, expected: &[ConnectionState]) -> Result<()> {
    if expected.contains(&ctx.state) {
        Ok(())
    } else {
        Err(HandshakeFailure::OutOfSequence(ctx.state.name()).into())
    }
}

/// SHA-1 over the proof fields of one key:
/// `(client_token, server_token, product, public, 0, private)`.
fn key_proof(
    client_token: u32,
    server_token: u32,
    key: &crate::config::ProductKey,
) -> [u8; PROOF_LEN] {
    let mut hasher = Sha1::new();
    hasher.update(client_token.to_le_bytes());
    hasher.update(server_token.to_le_bytes());
    hasher.update(key.product_value.to_le_bytes());
    hasher.update(key.public_value.to_le_bytes());
    hasher.update(0u32.to_le_bytes());
    hasher.update(&key.private_value);
    hasher.finalize().into()
}

/// Legacy logon proof: `SHA-1(client_token, server_token, SHA-1(password))`.
fn legacy_password_proof(
    client_token: u32,
    server_token: u32,
    password: &str,
) -> [u8; PROOF_LEN] {
    let password_hash: [u8; PROOF_LEN] =
        Sha1::digest(password.to_lowercase().as_bytes()).into();
    let mut hasher = Sha1::new();
    hasher.update(client_token.to_le_bytes());
    hasher.update(server_token.to_le_bytes());
    hasher.update(password_hash);
    hasher.finalize().into()
}

/// Run the version-check routine the server selected.
///
/// Returns the 32-bit checksum plus, on the lockdown path, the full digest
/// blob that accompanies it in the auth check.
fn version_check(
    ctx: &SessionContext,
    filename: &str,
    value_string: &str,
    filetime: i64,
) -> Result<(u32, Option<[u8; PROOF_LEN]>)> {
    if is_lockdown_filename(filename) {
        info!(filename, "Lockdown revision check selected");
        let archive = filetransfer::download(
            &ctx.config.transport,
            &ctx.config.client,
            filename,
            filetime,
        )?;
        let digest = lockdown_digest(&archive, ctx.credentials.server_token);
        let checksum = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
        Ok((checksum, Some(digest)))
    } else {
        let formula = ChecksumFormula::parse(value_string)?;
        let mut images = Vec::with_capacity(ctx.config.client.game_files.len());
        for path in &ctx.config.client.game_files {
            images.push(std::fs::read(path).map_err(|e| {
                ProtocolError::RevisionCheck(format!("cannot read {}: {e}", path.display()))
            })?);
        }
        Ok((formula.checksum(&images), None))
    }
}

/// Auth info arrived: version check, key proofs, anti-cheat seed, auth
/// check request.
///
/// Any failure while constructing the auth-check request is caught here,
/// surfaced as an error event, and closes the connection. This is the one
/// point where an unexpected local failure must not leave the machine stuck.
pub(crate) fn handle_auth_info(ctx: &mut SessionContext, frame: Frame) -> Result<()> {
    expect_state(ctx, &[ConnectionState::AwaitingAuthInfo])?;

    match build_and_send_auth_check(ctx, &frame) {
        Ok(()) => {
            if let Some(cookie) = ctx.deferred_ping.take() {
                let mut builder = FrameBuilder::new(ids::PING);
                builder.insert_u32(cookie);
                ctx.send_frame(&builder.finish()?)?;
                debug!(cookie, "Deferred ping reply flushed");
            }
            Ok(())
        }
        Err(e) => {
            global_metrics().handshake_failed();
            ctx.emit(SessionEvent::Error {
                error: format!("auth check construction failed: {e}"),
            });
            ctx.request_close();
            Ok(())
        }
    }
}

fn build_and_send_auth_check(ctx: &mut SessionContext, frame: &Frame) -> Result<()> {
    let mut cursor = BinaryCursor::new(frame.payload());
    let login_type = cursor.read_u32()?;
    let server_token = cursor.read_u32()?;
    let _udp_value = cursor.read_u32()?;
    let archive_filetime = cursor.read_i64()?;
    let archive_filename = cursor.read_cstring(Encoding::Ascii)?;
    let value_string = cursor.read_cstring(Encoding::Ascii)?;

    ctx.credentials.server_token = server_token;
    ctx.login_type = login_type;
    ctx.state = ConnectionState::VersioningInProgress;
    debug!(login_type, filename = %archive_filename, "Auth info received");

    let (checksum, lockdown) =
        version_check(ctx, &archive_filename, &value_string, archive_filetime)?;

    let config = ctx.config.clone();
    let client = &config.client;
    if client.keys.len() < client.required_key_count() {
        return Err(ProtocolError::ConfigError(
            crate::error::constants::ERR_NO_KEYS.into(),
        ));
    }
    let keys = &client.keys[..client.required_key_count()];
    let proofs: Vec<[u8; PROOF_LEN]> = keys
        .iter()
        .map(|key| key_proof(ctx.credentials.client_token, server_token, key))
        .collect();

    // The anti-cheat seed derives from the first key proof; a module that
    // cannot initialize is disabled, not fatal.
    let seed = proofs[0][..4].to_vec();
    ctx.init_challenge(&seed);

    let mut builder = FrameBuilder::new(ids::AUTH_CHECK);
    builder
        .insert_u32(ctx.credentials.client_token)
        .insert_u32(client.exe_version)
        .insert_u32(checksum);
    if let Some(digest) = lockdown {
        builder.insert_fixed_bytes(&digest);
    }
    builder.insert_u32(keys.len() as u32).insert_u32(0); // no spawn
    for (key, proof) in keys.iter().zip(&proofs) {
        builder
            .insert_u32(key.private_value.len() as u32)
            .insert_u32(key.product_value)
            .insert_u32(key.public_value)
            .insert_u32(0)
            .insert_fixed_bytes(proof);
    }
    builder
        .insert_cstring(&client.exe_info)
        .insert_cstring(&client.key_owner);

    ctx.send_frame(&builder.finish()?)?;
    ctx.state = ConnectionState::AwaitingAuthCheckResult;
    debug!(keys = keys.len(), checksum, "Auth check sent");
    Ok(())
}

/// Auth check verdict: zero proceeds to logon, anything else is a fatal
/// client-check failure.
pub(crate) fn handle_auth_check(ctx: &mut SessionContext, frame: Frame) -> Result<()> {
    expect_state(ctx, &[ConnectionState::AwaitingAuthCheckResult])?;

    let mut cursor = BinaryCursor::new(frame.payload());
    let result = cursor.read_u32()?;
    let info = if cursor.remaining() > 0 {
        cursor.read_cstring(Encoding::Ascii).unwrap_or_default()
    } else {
        String::new()
    };

    if result != 0 {
        warn!(result = format_args!("{result:#x}"), info = %info, "Client check rejected");
        return Err(HandshakeFailure::ClientCheckFailed(result).into());
    }

    info!("Client check passed; starting logon");
    begin_logon(ctx)
}

fn effective_logon_method(ctx: &SessionContext) -> LogonMethod {
    // Login type 0 means the server cannot drive the SRP rounds at all.
    if ctx.login_type == 0 {
        LogonMethod::Legacy
    } else {
        ctx.config.client.logon_method
    }
}

fn begin_logon(ctx: &mut SessionContext) -> Result<()> {
    match effective_logon_method(ctx) {
        LogonMethod::Legacy => send_legacy_logon(ctx),
        LogonMethod::Srp => send_account_logon(ctx),
    }
}

fn send_legacy_logon(ctx: &mut SessionContext) -> Result<()> {
    let client = &ctx.config.client;
    let proof = legacy_password_proof(
        ctx.credentials.client_token,
        ctx.credentials.server_token,
        &client.password,
    );

    let mut builder = FrameBuilder::new(ids::LEGACY_LOGON);
    builder
        .insert_u32(ctx.credentials.client_token)
        .insert_u32(ctx.credentials.server_token)
        .insert_fixed_bytes(&proof)
        .insert_cstring(&client.username);
    ctx.send_frame(&builder.finish()?)?;
    ctx.state = ConnectionState::LegacyLogon;
    debug!(username = %client.username, "Legacy logon sent");
    Ok(())
}

fn send_account_logon(ctx: &mut SessionContext) -> Result<()> {
    let client = &ctx.config.client;
    let srp = SrpClient::new(&client.username, &client.password);

    let mut builder = FrameBuilder::new(ids::ACCOUNT_LOGON);
    builder
        .insert_fixed_bytes(&srp.public_value())
        .insert_cstring(&client.username);
    ctx.send_frame(&builder.finish()?)?;

    ctx.srp = Some(srp);
    ctx.expected_server_proof = None;
    ctx.state = ConnectionState::SrpLogonInProgress;
    debug!(username = %client.username, "Account logon sent");
    Ok(())
}

/// Legacy logon verdict.
pub(crate) fn handle_legacy_logon(ctx: &mut SessionContext, frame: Frame) -> Result<()> {
    expect_state(ctx, &[ConnectionState::LegacyLogon])?;

    let mut cursor = BinaryCursor::new(frame.payload());
    let status = cursor.read_u32()?;
    match status {
        0 => {
            info!("Logon accepted");
            send_enter_chat(ctx)
        }
        1 => Err(HandshakeFailure::LogonRejected(LogonStatus::AccountAbsent).into()),
        2 => Err(HandshakeFailure::LogonRejected(LogonStatus::BadPassword).into()),
        6 => Err(HandshakeFailure::LogonRejected(LogonStatus::AccountClosed).into()),
        other => Err(HandshakeFailure::LogonRejected(LogonStatus::Unknown(other)).into()),
    }
}

/// SRP round 1 response: salt + server public value, or a status that
/// redirects the exchange.
pub(crate) fn handle_account_logon(ctx: &mut SessionContext, frame: Frame) -> Result<()> {
    expect_state(ctx, &[ConnectionState::SrpLogonInProgress])?;

    let mut cursor = BinaryCursor::new(frame.payload());
    let status = cursor.read_u32()?;
    match status {
        0 => {
            let mut salt = [0u8; FIELD_LEN];
            salt.copy_from_slice(cursor.read_fixed_bytes(FIELD_LEN)?);
            let mut server_public = [0u8; FIELD_LEN];
            server_public.copy_from_slice(cursor.read_fixed_bytes(FIELD_LEN)?);

            let srp = ctx
                .srp
                .as_ref()
                .ok_or(HandshakeFailure::OutOfSequence("missing SRP state"))?;
            let proof = srp.session_proof(&salt, &server_public)?;

            let mut builder = FrameBuilder::new(ids::ACCOUNT_LOGON_PROOF);
            builder.insert_fixed_bytes(&proof.client_proof);
            ctx.send_frame(&builder.finish()?)?;

            ctx.expected_server_proof = Some(proof.expected_server_proof);
            ctx.state = ConnectionState::AwaitingLogonProof;
            debug!("Logon proof sent");
            Ok(())
        }
        1 => {
            // Server asks for the account to be created first.
            info!("Account absent; creating");
            send_account_create(ctx)
        }
        5 => Err(HandshakeFailure::UpgradeRequired.into()),
        other => Err(HandshakeFailure::LogonRejected(LogonStatus::Unknown(other)).into()),
    }
}

fn send_account_create(ctx: &mut SessionContext) -> Result<()> {
    let srp = ctx
        .srp
        .as_ref()
        .ok_or(HandshakeFailure::OutOfSequence("missing SRP state"))?;
    let (salt, verifier) = srp.account_create_values();

    let username = ctx.config.client.username.clone();
    let mut builder = FrameBuilder::new(ids::ACCOUNT_CREATE);
    builder
        .insert_fixed_bytes(&salt)
        .insert_fixed_bytes(&verifier)
        .insert_cstring(&username);
    ctx.send_frame(&builder.finish()?)?;
    debug!(username = %username, "Account create sent");
    Ok(())
}

/// Account-creation verdict: success retries the logon with a fresh
/// ephemeral.
pub(crate) fn handle_account_create(ctx: &mut SessionContext, frame: Frame) -> Result<()> {
    expect_state(ctx, &[ConnectionState::SrpLogonInProgress])?;

    let mut cursor = BinaryCursor::new(frame.payload());
    let status = cursor.read_u32()?;
    if status != 0 {
        return Err(HandshakeFailure::AccountCreateRejected(status).into());
    }
    info!("Account created; retrying logon");
    send_account_logon(ctx)
}

/// SRP round 2 response: the server's proof.
///
/// A mismatching proof is reported and, unless strict verification is
/// configured, tolerated, matching the behavior of the legacy service
/// family toward servers that cannot prove their identity.
pub(crate) fn handle_logon_proof(ctx: &mut SessionContext, frame: Frame) -> Result<()> {
    expect_state(ctx, &[ConnectionState::AwaitingLogonProof])?;

    let mut cursor = BinaryCursor::new(frame.payload());
    let status = cursor.read_u32()?;
    match status {
        0 | 0x0E => {} // 0x0E: success, server wants an email registered
        2 => return Err(HandshakeFailure::LogonRejected(LogonStatus::BadPassword).into()),
        other => {
            return Err(HandshakeFailure::LogonRejected(LogonStatus::Unknown(other)).into())
        }
    }

    let mut server_proof = [0u8; PROOF_LEN];
    server_proof.copy_from_slice(cursor.read_fixed_bytes(PROOF_LEN)?);

    let expected = ctx
        .expected_server_proof
        .take()
        .ok_or(HandshakeFailure::OutOfSequence("no expected server proof"))?;
    ctx.srp = None;

    if server_proof != expected {
        warn!("Server logon proof mismatch");
        ctx.emit(SessionEvent::ServerProofMismatch);
        if ctx.config.client.strict_server_proof {
            global_metrics().handshake_failed();
            ctx.emit(SessionEvent::Error {
                error: crate::error::constants::ERR_SERVER_PROOF.into(),
            });
            ctx.request_close();
            return Ok(());
        }
    }

    info!("Logon accepted");
    send_enter_chat(ctx)
}

fn send_enter_chat(ctx: &mut SessionContext) -> Result<()> {
    let username = ctx.config.client.username.clone();
    let mut builder = FrameBuilder::new(ids::ENTER_CHAT);
    builder.insert_cstring(&username).insert_cstring("");
    ctx.send_frame(&builder.finish()?)?;
    debug!("Enter chat requested");
    Ok(())
}

/// The server's enter-chat confirmation: the session is usable. Fire the
/// product follow-ups and start the periodic timers.
pub(crate) fn handle_enter_chat(ctx: &mut SessionContext, frame: Frame) -> Result<()> {
    expect_state(
        ctx,
        &[
            ConnectionState::LegacyLogon,
            ConnectionState::SrpLogonInProgress,
            ConnectionState::AwaitingLogonProof,
        ],
    )?;

    let mut cursor = BinaryCursor::new(frame.payload());
    let unique_name = cursor.read_cstring(Encoding::Utf8)?;
    let _statstring = cursor.read_null_terminated_bytes()?;
    let _account_name = if cursor.remaining() > 0 {
        cursor.read_cstring(Encoding::Utf8)?
    } else {
        String::new()
    };

    ctx.state = ConnectionState::EnteredChat;
    ctx.unique_name = Some(unique_name.clone());
    global_metrics().handshake_success();
    info!(unique_name = %unique_name, "Entered chat");
    ctx.emit(SessionEvent::EnteredChat {
        unique_name: unique_name.clone(),
    });

    let client = &ctx.config.client;
    let product = client.product.clone();
    let war_product = client.is_war_product();

    let mut builder = FrameBuilder::new(ids::CHANNEL_LIST);
    builder.insert_dword_string(&product, true);
    ctx.send_frame(&builder.finish()?)?;

    if war_product {
        let cookie = ctx.pending().issue(Box::new(LadderMapInfoRequest));
        let mut builder = FrameBuilder::new(ids::LADDER_MAP_INFO);
        builder.insert_u8(0x02).insert_u32(cookie);
        ctx.send_frame(&builder.finish()?)?;
    } else {
        ctx.send_frame(&FrameBuilder::new(ids::FRIENDS_LIST).finish()?)?;
    }

    ctx.start_timers();
    Ok(())
}

/// Ping echo, optionally deferred while auth info is still pending.
pub(crate) fn handle_ping(ctx: &mut SessionContext, frame: Frame) -> Result<()> {
    let mut cursor = BinaryCursor::new(frame.payload());
    let cookie = cursor.read_u32()?;

    if ctx.state == ConnectionState::AwaitingAuthInfo && ctx.config.client.defer_ping_reply {
        debug!(cookie, "Ping deferred until auth info");
        ctx.deferred_ping = Some(cookie);
        return Ok(());
    }

    let mut builder = FrameBuilder::new(ids::PING);
    builder.insert_u32(cookie);
    ctx.send_frame(&builder.finish()?)
}
