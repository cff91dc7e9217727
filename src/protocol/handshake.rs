//! Server side of the SRP6 login handshake.
//!
//! Handshake state is scoped to one connection: [`LoginHandshake`] lives inside
//! the session and holds at most one pending [`HandshakeSession`]. The pending
//! session is taken out before verification, so any failure leaves the
//! connection with nothing in flight and the client must start over.

use std::fmt;
use std::sync::Mutex;

use tracing::{debug, instrument, warn};
use zeroize::Zeroizing;

use crate::crypto::srp6::{HandshakeSession, SESSION_KEY_LEN};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{
    ClientLoginProof, ClientLoginStart, ClientTicketLogin, ServerLoginAccepted,
    ServerLoginChallenge,
};
use crate::store::{AccountStore, SessionTicket};
use crate::utils::replay_cache::ReplayCache;

/// A successful login: who, and the ticket that keys the session cipher.
pub struct LoginGranted {
    pub identity: String,
    pub ticket: SessionTicket,
    /// SRP6 session key K; absent for ticket logins
    pub session_key: Option<Zeroizing<[u8; SESSION_KEY_LEN]>>,
}

impl fmt::Debug for LoginGranted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginGranted")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Per-connection handshake state
#[derive(Debug, Default)]
pub struct LoginHandshake {
    pending: Option<HandshakeSession>,
    failed_attempts: u32,
}

impl LoginHandshake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Count a failure and drop whatever was in flight.
    pub fn record_failure(&mut self) -> u32 {
        self.pending = None;
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        self.failed_attempts
    }

    /// Step 1: look up the account and issue the challenge.
    ///
    /// A second `start` replaces any pending attempt.
    #[instrument(skip(self, store, request), fields(identity = %request.identity))]
    pub fn start(
        &mut self,
        store: &dyn AccountStore,
        request: &ClientLoginStart,
    ) -> Result<ServerLoginChallenge> {
        self.pending = None;

        let record = store.account(&request.identity)?.ok_or_else(|| {
            debug!("Login attempt for unknown account");
            ProtocolError::HandshakeError(constants::ERR_UNKNOWN_ACCOUNT.into())
        })?;

        let session = HandshakeSession::begin(&record.identity, record.salt, &record.verifier);
        let challenge = ServerLoginChallenge {
            salt: *session.salt(),
            server_public: session.server_public(),
        };
        self.pending = Some(session);
        Ok(challenge)
    }

    /// Step 2: verify A and M1, then mint a ticket.
    ///
    /// # Errors
    /// `HandshakeError` with no pending challenge or a replayed A,
    /// `InvalidPublicKey` / `InvalidProof` from verification.
    #[instrument(skip_all)]
    pub fn prove(
        &mut self,
        store: &dyn AccountStore,
        replay_cache: &Mutex<ReplayCache>,
        proof: &ClientLoginProof,
    ) -> Result<(ServerLoginAccepted, LoginGranted)> {
        let session = self.pending.take().ok_or_else(|| {
            ProtocolError::HandshakeError(constants::ERR_NO_PENDING_HANDSHAKE.into())
        })?;

        let replayed = replay_cache
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))?
            .is_replay(session.identity(), &proof.client_public);
        if replayed {
            return Err(ProtocolError::HandshakeError(
                constants::ERR_REPLAYED_PUBLIC.into(),
            ));
        }

        let outcome = session.verify(&proof.client_public, &proof.evidence)?;
        let ticket = store.issue_ticket(&outcome.identity)?;
        self.failed_attempts = 0;

        Ok((
            ServerLoginAccepted {
                server_evidence: outcome.server_evidence,
                ticket,
            },
            LoginGranted {
                identity: outcome.identity,
                ticket,
                session_key: Some(outcome.session_key),
            },
        ))
    }

    /// Ticket login on the gameplay listener.
    #[instrument(skip(self, store, request), fields(identity = %request.identity))]
    pub fn redeem(
        &mut self,
        store: &dyn AccountStore,
        request: &ClientTicketLogin,
    ) -> Result<LoginGranted> {
        self.pending = None;

        if store.redeem_ticket(&request.identity, &request.ticket)?.is_none() {
            warn!("Ticket login rejected");
            return Err(ProtocolError::HandshakeError(
                constants::ERR_TICKET_REJECTED.into(),
            ));
        }

        self.failed_attempts = 0;
        Ok(LoginGranted {
            identity: request.identity.clone(),
            ticket: request.ticket,
            session_key: None,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::crypto::srp6::SrpClient;
    use crate::store::MemoryAccountStore;

    fn fixture() -> (MemoryAccountStore, Mutex<ReplayCache>) {
        let store = MemoryAccountStore::default();
        store.register("alice", "wonderland").unwrap();
        (store, Mutex::new(ReplayCache::new()))
    }

    fn start(handshake: &mut LoginHandshake, store: &MemoryAccountStore) -> ServerLoginChallenge {
        handshake
            .start(
                store,
                &ClientLoginStart {
                    identity: "alice".into(),
                },
            )
            .unwrap()
    }

    #[test]
    fn test_full_login() {
        let (store, cache) = fixture();
        let mut handshake = LoginHandshake::new();
        let challenge = start(&mut handshake, &store);
        assert!(handshake.is_pending());

        let client = SrpClient::new("alice", "wonderland");
        let proof = client
            .respond(&challenge.salt, &challenge.server_public)
            .unwrap();

        let (accepted, granted) = handshake
            .prove(
                &store,
                &cache,
                &ClientLoginProof {
                    client_public: proof.public,
                    evidence: proof.evidence,
                },
            )
            .unwrap();

        proof.verify_server(&accepted.server_evidence).unwrap();
        assert_eq!(granted.identity, "alice");
        assert_eq!(accepted.ticket, granted.ticket);
        assert_eq!(granted.session_key.as_deref(), Some(&*proof.session_key));
        assert!(!handshake.is_pending());
        // the ticket is now redeemable on the gameplay listener
        assert_eq!(store.redeem_ticket("alice", &granted.ticket).unwrap(), Some(()));
    }

    #[test]
    fn test_unknown_account() {
        let (store, _) = fixture();
        let mut handshake = LoginHandshake::new();
        let result = handshake.start(
            &store,
            &ClientLoginStart {
                identity: "mallory".into(),
            },
        );
        assert!(result.unwrap_err().is_handshake_failure());
        assert!(!handshake.is_pending());
    }

    #[test]
    fn test_wrong_password_clears_pending() {
        let (store, cache) = fixture();
        let mut handshake = LoginHandshake::new();
        let challenge = start(&mut handshake, &store);

        let proof = SrpClient::new("alice", "looking-glass")
            .respond(&challenge.salt, &challenge.server_public)
            .unwrap();
        let result = handshake.prove(
            &store,
            &cache,
            &ClientLoginProof {
                client_public: proof.public,
                evidence: proof.evidence,
            },
        );
        assert!(matches!(result, Err(ProtocolError::InvalidProof)));
        assert!(!handshake.is_pending());
    }

    #[test]
    fn test_proof_without_challenge() {
        let (store, cache) = fixture();
        let mut handshake = LoginHandshake::new();
        let result = handshake.prove(
            &store,
            &cache,
            &ClientLoginProof {
                client_public: [1; 128],
                evidence: [0; 32],
            },
        );
        assert!(matches!(result, Err(ProtocolError::HandshakeError(_))));
    }

    #[test]
    fn test_replayed_public_rejected() {
        let (store, cache) = fixture();
        let client = SrpClient::new("alice", "wonderland");

        let mut first = LoginHandshake::new();
        let challenge = start(&mut first, &store);
        let proof = client.respond(&challenge.salt, &challenge.server_public).unwrap();
        first
            .prove(
                &store,
                &cache,
                &ClientLoginProof {
                    client_public: proof.public,
                    evidence: proof.evidence,
                },
            )
            .unwrap();

        // same A against a fresh challenge
        let mut second = LoginHandshake::new();
        let challenge = start(&mut second, &store);
        let proof = client.respond(&challenge.salt, &challenge.server_public).unwrap();
        let result = second.prove(
            &store,
            &cache,
            &ClientLoginProof {
                client_public: proof.public,
                evidence: proof.evidence,
            },
        );
        assert!(matches!(result, Err(ProtocolError::HandshakeError(_))));
    }

    #[test]
    fn test_failure_counter() {
        let mut handshake = LoginHandshake::new();
        assert_eq!(handshake.record_failure(), 1);
        assert_eq!(handshake.record_failure(), 2);
        assert_eq!(handshake.failed_attempts(), 2);
    }
}
