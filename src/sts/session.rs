//! Request routing for the bootstrap channel.
//!
//! Same shape as the binary session: requests in, ordered actions out. The
//! `/Auth/KeyData` reply is written in the clear and RC4 is enabled only
//! after it, mirroring the binary protocol's cipher-switch ordering.

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::crypto::legacy_cipher::LegacyCipher;
use crate::crypto::srp6::{PROOF_LEN, PUBLIC_LEN};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::handshake::LoginHandshake;
use crate::protocol::message::{ClientLoginProof, ClientLoginStart};
use crate::protocol::session::SessionServices;
use crate::store::SessionTicket;
use crate::sts::message::{escape_text, StsMessage, SEQUENCE_HEADER};

/// Uniform failure code for every login problem
pub const ERROR_DENIED: u32 = 11;
/// Request requires a completed login
pub const ERROR_NOT_AUTHENTICATED: u32 = 401;
pub const ERROR_NOT_FOUND: u32 = 404;

#[derive(Debug)]
pub enum StsAction {
    Reply(StsMessage),
    EnableCipher(LegacyCipher),
    Close(String),
}

pub struct StsSession {
    connection_id: u64,
    handshake: LoginHandshake,
    identity: Option<String>,
    /// Ticket minted by the proof step, handed out by the first token request
    pending_ticket: Option<SessionTicket>,
    /// Client build announced in `/Sts/Connect`
    client_build: Option<u32>,
    services: SessionServices,
}

impl std::fmt::Debug for StsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StsSession")
            .field("connection_id", &self.connection_id)
            .field("identity", &self.identity)
            .field("client_build", &self.client_build)
            .finish_non_exhaustive()
    }
}

impl StsSession {
    pub fn new(connection_id: u64, services: SessionServices) -> Self {
        Self {
            connection_id,
            handshake: LoginHandshake::new(),
            identity: None,
            pending_ticket: None,
            client_build: None,
            services,
        }
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn client_build(&self) -> Option<u32> {
        self.client_build
    }

    /// Route one request.
    ///
    /// # Errors
    /// Only a malformed request line is fatal; everything else becomes an
    /// error reply.
    pub fn handle(&mut self, request: &StsMessage) -> Result<Vec<StsAction>> {
        let (_, path) = request.method_and_path()?;
        let path = path.to_string();
        debug!(connection_id = self.connection_id, path = %path, "Bootstrap request");

        let result = match path.as_str() {
            "/Sts/Connect" => self.connect(request),
            "/Sts/Ping" => Ok(self.optional_reply(request, "")),
            "/Auth/LoginStart" => self.login_start(request),
            "/Auth/KeyData" => self.key_data(request),
            "/Auth/LoginFinish" => self.login_finish(request),
            "/Auth/RequestGameToken" => self.request_game_token(request),
            _ => {
                debug!(path = %path, "Unknown bootstrap path");
                Ok(vec![StsAction::Reply(StsMessage::error(request, ERROR_NOT_FOUND))])
            }
        };

        match result {
            Ok(actions) => Ok(actions),
            Err(e) if e.is_fatal() && !matches!(e, ProtocolError::Sts(_)) => Err(e),
            Err(e) => Ok(self.deny(request, &e)),
        }
    }

    /// One-way messages only get a reply when they carry a sequence.
    fn optional_reply(&self, request: &StsMessage, body: &str) -> Vec<StsAction> {
        if request.header(SEQUENCE_HEADER).is_some() {
            vec![StsAction::Reply(StsMessage::ok(request, body))]
        } else {
            Vec::new()
        }
    }

    fn connect(&mut self, request: &StsMessage) -> Result<Vec<StsAction>> {
        self.client_build = request.element("Build").ok().and_then(|b| b.trim().parse().ok());
        let expected = self.services.config.crypto.build_number;
        if let Some(build) = self.client_build {
            if build != expected {
                warn!(build, expected, "Client build differs from configured build");
            }
        }
        Ok(self.optional_reply(request, ""))
    }

    fn login_start(&mut self, request: &StsMessage) -> Result<Vec<StsAction>> {
        self.services.metrics.handshake_attempt();
        let identity = request.element("LoginName")?.trim().to_string();
        if identity.contains(['<', '>', '&']) {
            return Err(ProtocolError::HandshakeError(constants::ERR_STS_MARKUP.into()));
        }
        let challenge = self.handshake.start(
            self.services.store.as_ref(),
            &ClientLoginStart { identity },
        )?;

        let mut key_data = Vec::with_capacity(challenge.salt.len() + PUBLIC_LEN);
        key_data.extend_from_slice(&challenge.salt);
        key_data.extend_from_slice(&challenge.server_public);
        Ok(vec![StsAction::Reply(StsMessage::ok(
            request,
            format!("<Reply><KeyData>{}</KeyData></Reply>\n", hex::encode(key_data)),
        ))])
    }

    fn key_data(&mut self, request: &StsMessage) -> Result<Vec<StsAction>> {
        let raw = hex::decode(request.element("KeyData")?.trim())
            .map_err(|e| ProtocolError::HandshakeError(format!("bad key data: {e}")))?;
        if raw.len() != PUBLIC_LEN + PROOF_LEN {
            return Err(ProtocolError::HandshakeError(format!(
                "key data length {}",
                raw.len()
            )));
        }

        let mut proof = ClientLoginProof {
            client_public: [0; PUBLIC_LEN],
            evidence: [0; PROOF_LEN],
        };
        proof.client_public.copy_from_slice(&raw[..PUBLIC_LEN]);
        proof.evidence.copy_from_slice(&raw[PUBLIC_LEN..]);

        let (accepted, granted) = self.handshake.prove(
            self.services.store.as_ref(),
            &self.services.replay_cache,
            &proof,
        )?;
        let session_key = granted
            .session_key
            .ok_or_else(|| ProtocolError::HandshakeError("missing session key".into()))?;
        let cipher = LegacyCipher::new(&session_key[..])?;

        self.services.metrics.handshake_success();
        info!(
            connection_id = self.connection_id,
            identity = %granted.identity,
            "Bootstrap login accepted"
        );
        self.identity = Some(granted.identity);
        self.pending_ticket = Some(granted.ticket);

        Ok(vec![
            StsAction::Reply(StsMessage::ok(
                request,
                format!(
                    "<Reply><KeyData>{}</KeyData></Reply>\n",
                    hex::encode(accepted.server_evidence)
                ),
            )),
            StsAction::EnableCipher(cipher),
        ])
    }

    fn login_finish(&mut self, request: &StsMessage) -> Result<Vec<StsAction>> {
        let Some(identity) = self.identity.as_deref() else {
            return Ok(vec![StsAction::Reply(StsMessage::error(
                request,
                ERROR_NOT_AUTHENTICATED,
            ))]);
        };
        Ok(vec![StsAction::Reply(StsMessage::ok(
            request,
            format!(
                "<Reply><UserName>{}</UserName><RealmId>{}</RealmId></Reply>\n",
                escape_text(identity),
                self.services.config.realm.realm_id
            ),
        ))])
    }

    fn request_game_token(&mut self, request: &StsMessage) -> Result<Vec<StsAction>> {
        let Some(identity) = self.identity.as_deref() else {
            return Ok(vec![StsAction::Reply(StsMessage::error(
                request,
                ERROR_NOT_AUTHENTICATED,
            ))]);
        };
        let ticket = match self.pending_ticket.take() {
            Some(ticket) => ticket,
            None => self.services.store.issue_ticket(identity)?,
        };
        let token = Uuid::from_bytes(ticket).hyphenated().to_string().to_uppercase();
        Ok(vec![StsAction::Reply(StsMessage::ok(
            request,
            format!("<Reply><Token>{token}</Token></Reply>\n"),
        ))])
    }

    fn deny(&mut self, request: &StsMessage, error: &ProtocolError) -> Vec<StsAction> {
        self.services.metrics.handshake_failed();
        let failures = self.handshake.record_failure();
        debug!(
            connection_id = self.connection_id,
            failures,
            error = %error,
            "Bootstrap request rejected"
        );

        let mut actions = vec![StsAction::Reply(StsMessage::error(request, ERROR_DENIED))];
        if failures >= self.services.config.server.max_failed_logins {
            warn!(connection_id = self.connection_id, "Too many failed logins");
            actions.push(StsAction::Close("too many failed logins".into()));
        }
        actions
    }
}

/// Parse a game token back into ticket bytes.
pub fn parse_game_token(token: &str) -> Result<[u8; 16]> {
    Uuid::parse_str(token.trim())
        .map(|uuid| *uuid.as_bytes())
        .map_err(|e| ProtocolError::Sts(format!("bad game token: {e}")))
}
