//! # Connection State Machine
//!
//! [`Session`] is the pure half of a connection: it consumes frames and
//! returns [`SessionAction`]s, never touching the socket. The async actor in
//! `service::connection` executes the actions strictly in order, which gives
//! the cipher-switch ordering guarantee:
//!
//! ```text
//! Send(ServerLoginAccepted)   sealed with the cipher active before the exchange
//! InstallCipher(session key)  only after that send succeeded
//! Transition(Authenticated)
//! ```
//!
//! ## States
//! `Connected → Authenticating → Authenticated → Disconnected`

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::core::frame::Frame;
use crate::core::opcode::Opcode;
use crate::crypto::packet_cipher::CipherPair;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::handshake::{LoginGranted, LoginHandshake};
use crate::protocol::message::{
    ClientHeartbeat, ClientLoginProof, ClientLoginStart, ClientTicketLogin, ConnectionRole,
    DenialCode, ServerHeartbeat, ServerHello, ServerLoginDenied, ServerTicketAccepted,
};
use crate::store::AccountStore;
use crate::utils::metrics::Metrics;
use crate::utils::replay_cache::ReplayCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Authenticating,
    Authenticated,
    Disconnected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connected => "connected",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// One step for the connection actor.
#[derive(Debug)]
pub enum SessionAction {
    /// Seal with the current cipher and write
    Send(Frame),
    /// Replace both cipher directions
    InstallCipher(CipherPair),
    Transition(ConnectionState),
    Close(String),
}

/// Per-connection data visible to game handlers.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub connection_id: u64,
    pub role: ConnectionRole,
    pub peer: Option<SocketAddr>,
    /// Set once a login succeeds
    pub identity: Option<String>,
}

impl SessionContext {
    pub fn new(connection_id: u64, role: ConnectionRole, peer: Option<SocketAddr>) -> Self {
        Self {
            connection_id,
            role,
            peer,
            identity: None,
        }
    }
}

/// Shared collaborators, cloned into every connection.
#[derive(Clone)]
pub struct SessionServices {
    pub store: Arc<dyn AccountStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub replay_cache: Arc<Mutex<ReplayCache>>,
    pub metrics: Arc<Metrics>,
    pub config: Arc<NetworkConfig>,
}

impl SessionServices {
    pub fn new(
        config: NetworkConfig,
        store: Arc<dyn AccountStore>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let replay_cache = ReplayCache::with_settings(
            config.session.replay_window,
            config.session.replay_cache_entries,
        );
        Self {
            store,
            dispatcher,
            replay_cache: Arc::new(Mutex::new(replay_cache)),
            metrics: Arc::new(Metrics::new()),
            config: Arc::new(config),
        }
    }
}

pub struct Session {
    ctx: SessionContext,
    state: ConnectionState,
    cipher: Option<CipherPair>,
    handshake: LoginHandshake,
    services: SessionServices,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("ctx", &self.ctx)
            .field("state", &self.state)
            .field("encrypted", &self.cipher.is_some())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(ctx: SessionContext, services: SessionServices) -> Self {
        Self {
            ctx,
            state: ConnectionState::Connected,
            cipher: None,
            handshake: LoginHandshake::new(),
            services,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn install_cipher(&mut self, cipher: CipherPair) {
        debug!(connection_id = self.ctx.connection_id, "Cipher installed");
        self.cipher = Some(cipher);
    }

    pub fn transition(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(
                connection_id = self.ctx.connection_id,
                from = %self.state,
                to = %state,
                "State transition"
            );
            self.state = state;
        }
    }

    /// Greeting sequence for a freshly accepted socket.
    pub fn on_connect(&mut self) -> Result<Vec<SessionAction>> {
        let realm = &self.services.config.realm;
        let crypto = &self.services.config.crypto;
        let hello = ServerHello::new(
            realm.auth_version,
            realm.realm_id,
            realm.realm_group_id,
            self.ctx.role,
            crypto.protocol_magic,
        );

        let mut actions = Vec::with_capacity(3);
        if self.ctx.role.encrypted_from_start() {
            actions.push(SessionAction::InstallCipher(CipherPair::auth(
                crypto.build_number,
                crypto.protocol_magic,
            )));
        }
        actions.push(SessionAction::Send(Frame::from_message(&hello)?));
        actions.push(SessionAction::Transition(ConnectionState::Authenticating));
        Ok(actions)
    }

    /// Wrap an outbound frame under the installed cipher, if any.
    ///
    /// # Errors
    /// Cipher failures abort the send; the caller logs and drops the frame.
    pub fn seal(&mut self, frame: Frame) -> Result<Frame> {
        match self.cipher.as_mut() {
            None => Ok(frame),
            Some(pair) => {
                self.services.metrics.cipher_operation();
                frame.seal(Opcode::ServerEncrypted, &mut pair.encrypt)
            }
        }
    }

    /// Open an inbound envelope.
    ///
    /// Returns `Ok(None)` for a plain frame that arrived while a cipher is
    /// active; such frames are ignored.
    pub fn unseal(&mut self, frame: Frame) -> Result<Option<Frame>> {
        let envelope = frame.known_opcode().is_some_and(Opcode::is_envelope);
        match (self.cipher.as_mut(), envelope) {
            (Some(pair), true) => {
                self.services.metrics.cipher_operation();
                frame.open(&mut pair.decrypt).map(Some)
            }
            (Some(_), false) => {
                warn!(
                    connection_id = self.ctx.connection_id,
                    opcode = frame.opcode,
                    "Plain frame on encrypted connection ignored"
                );
                Ok(None)
            }
            (None, true) => Err(ProtocolError::Decode(
                constants::ERR_ENVELOPE_WITHOUT_CIPHER.into(),
            )),
            (None, false) => Ok(Some(frame)),
        }
    }

    /// Handle one frame exactly as read from the socket.
    pub fn handle_frame(&mut self, frame: Frame) -> Result<Vec<SessionAction>> {
        if matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Disconnected
        ) {
            debug!(state = %self.state, opcode = frame.opcode, "Frame outside active state dropped");
            return Ok(Vec::new());
        }

        let Some(inner) = self.unseal(frame)? else {
            return Ok(Vec::new());
        };

        match inner.known_opcode() {
            Some(op) if op.is_handshake() => self.handle_handshake(op, &inner),
            _ if self.state == ConnectionState::Authenticating => {
                debug!(
                    connection_id = self.ctx.connection_id,
                    opcode = inner.opcode,
                    "Non-handshake opcode before login ignored"
                );
                Ok(Vec::new())
            }
            Some(Opcode::ClientHeartbeat) => {
                let heartbeat = inner.decode_message::<ClientHeartbeat>()?;
                Ok(vec![SessionAction::Send(Frame::from_message(
                    &ServerHeartbeat {
                        sequence: heartbeat.sequence,
                    },
                )?)])
            }
            _ => self.forward(&inner),
        }
    }

    fn forward(&mut self, inner: &Frame) -> Result<Vec<SessionAction>> {
        match self
            .services
            .dispatcher
            .dispatch(inner.opcode, &mut self.ctx, &inner.payload)
        {
            Ok(reply) => Ok(reply.into_frames().into_iter().map(SessionAction::Send).collect()),
            Err(ProtocolError::UnknownOpcode(opcode)) => {
                self.services.metrics.unknown_opcode();
                debug!(
                    connection_id = self.ctx.connection_id,
                    opcode = format_args!("{opcode:#06x}"),
                    "Unhandled opcode skipped"
                );
                Ok(Vec::new())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(
                    connection_id = self.ctx.connection_id,
                    opcode = inner.opcode,
                    error = %e,
                    "Handler failed"
                );
                Ok(Vec::new())
            }
        }
    }

    fn handle_handshake(&mut self, op: Opcode, inner: &Frame) -> Result<Vec<SessionAction>> {
        self.services.metrics.handshake_attempt();
        match self.run_handshake(op, inner) {
            Ok(actions) => Ok(actions),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                if matches!(e, ProtocolError::HandshakeError(ref m) if m == constants::ERR_REPLAYED_PUBLIC)
                {
                    self.services.metrics.replay_cache_hit();
                }
                Ok(self.deny(&e))
            }
        }
    }

    fn run_handshake(&mut self, op: Opcode, inner: &Frame) -> Result<Vec<SessionAction>> {
        let store = self.services.store.as_ref();
        match op {
            Opcode::ClientLoginStart => {
                let request = inner.decode_message::<ClientLoginStart>()?;
                let challenge = self.handshake.start(store, &request)?;
                Ok(vec![SessionAction::Send(Frame::from_message(&challenge)?)])
            }
            Opcode::ClientLoginProof => {
                let proof = inner.decode_message::<ClientLoginProof>()?;
                let (accepted, granted) =
                    self.handshake
                        .prove(store, &self.services.replay_cache, &proof)?;
                self.grant(Frame::from_message(&accepted)?, granted)
            }
            Opcode::ClientTicketLogin => {
                let request = inner.decode_message::<ClientTicketLogin>()?;
                let granted = self.handshake.redeem(store, &request)?;
                let reply = ServerTicketAccepted {
                    realm_id: self.services.config.realm.realm_id,
                };
                self.grant(Frame::from_message(&reply)?, granted)
            }
            _ => Err(ProtocolError::UnexpectedMessage),
        }
    }

    /// Reply under the old cipher, then switch keys.
    fn grant(&mut self, reply: Frame, granted: LoginGranted) -> Result<Vec<SessionAction>> {
        let crypto = &self.services.config.crypto;
        let cipher = CipherPair::session(&granted.ticket, crypto.build_number, crypto.protocol_magic);

        self.services.metrics.handshake_success();
        info!(
            connection_id = self.ctx.connection_id,
            role = %self.ctx.role,
            identity = %granted.identity,
            "Login accepted"
        );
        self.ctx.identity = Some(granted.identity);

        Ok(vec![
            SessionAction::Send(reply),
            SessionAction::InstallCipher(cipher),
            SessionAction::Transition(ConnectionState::Authenticated),
        ])
    }

    fn deny(&mut self, error: &ProtocolError) -> Vec<SessionAction> {
        self.services.metrics.handshake_failed();
        let failures = self.handshake.record_failure();
        debug!(
            connection_id = self.ctx.connection_id,
            failures,
            error = %error,
            "Handshake step rejected"
        );

        let limit = self.services.config.server.max_failed_logins;
        let (code, close) = if failures >= limit {
            (DenialCode::TooManyAttempts, true)
        } else {
            (DenialCode::Denied, false)
        };

        let mut actions = Vec::with_capacity(2);
        match Frame::from_message(&ServerLoginDenied { code }) {
            Ok(frame) => actions.push(SessionAction::Send(frame)),
            Err(e) => warn!(error = %e, "Failed to encode denial"),
        }
        if close {
            warn!(connection_id = self.ctx.connection_id, "Too many failed logins");
            actions.push(SessionAction::Close("too many failed logins".into()));
        }
        actions
    }
}
