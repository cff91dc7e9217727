//! # Reference Clients
//!
//! Minimal client halves of both protocols, used by the integration tests
//! and handy for smoke-testing a deployment. They mirror the server's cipher
//! ordering: the reply that negotiates a key is read under the old key and
//! the new one is installed right after.

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, instrument};

use crate::config::CryptoConfig;
use crate::core::codec::FrameCodec;
use crate::core::frame::{Frame, Message};
use crate::core::opcode::Opcode;
use crate::crypto::legacy_cipher::LegacyCipher;
use crate::crypto::packet_cipher::CipherPair;
use crate::crypto::srp6::{SrpClient, PROOF_LEN, PUBLIC_LEN, SALT_LEN};
use crate::error::{ProtocolError, Result};
use crate::protocol::message::{
    ClientLoginProof, ClientLoginStart, ClientTicketLogin, ConnectionRole, ServerHello,
    ServerLoginAccepted, ServerLoginChallenge, ServerLoginDenied, ServerTicketAccepted,
};
use crate::store::SessionTicket;
use crate::sts::codec::StsCodec;
use crate::sts::message::StsMessage;
use crate::sts::session::parse_game_token;

/// Client side of a binary-protocol connection.
pub struct GameClient<S> {
    framed: Framed<S, FrameCodec>,
    cipher: Option<CipherPair>,
    crypto: CryptoConfig,
    hello: ServerHello,
}

impl GameClient<TcpStream> {
    pub async fn connect(addr: SocketAddr, role: ConnectionRole, crypto: CryptoConfig) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Self::handshake(stream, role, crypto).await
    }
}

impl<S> GameClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Read the greeting on an already connected stream.
    ///
    /// Realm connections are encrypted from the first byte, so the auth
    /// cipher is installed before the greeting is read.
    #[instrument(skip(stream, crypto))]
    pub async fn handshake(stream: S, role: ConnectionRole, crypto: CryptoConfig) -> Result<Self> {
        let cipher = role
            .encrypted_from_start()
            .then(|| CipherPair::auth(crypto.build_number, crypto.protocol_magic));
        let mut client = Self {
            framed: Framed::new(stream, FrameCodec::default()),
            cipher,
            crypto,
            hello: ServerHello::new(0, 0, 0, role, crypto.protocol_magic),
        };

        let hello: ServerHello = client.recv_message().await?;
        if hello.role != role {
            return Err(ProtocolError::HandshakeError(format!(
                "server greeted as {} instead of {role}",
                hello.role
            )));
        }
        if hello.protocol_magic != crypto.protocol_magic {
            return Err(ProtocolError::HandshakeError("protocol magic mismatch".into()));
        }
        client.hello = hello;
        Ok(client)
    }

    pub fn hello(&self) -> &ServerHello {
        &self.hello
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Send a frame, sealing it when a cipher is installed.
    pub async fn send(&mut self, frame: Frame) -> Result<()> {
        let wire = match self.cipher.as_mut() {
            Some(pair) => frame.seal(Opcode::ClientEncrypted, &mut pair.encrypt)?,
            None => frame,
        };
        self.framed.send(wire).await
    }

    pub async fn send_message<M: Message>(&mut self, message: &M) -> Result<()> {
        self.send(Frame::from_message(message)?).await
    }

    /// Next frame from the server, opened when a cipher is installed.
    pub async fn recv(&mut self) -> Result<Frame> {
        let frame = self
            .framed
            .next()
            .await
            .ok_or(ProtocolError::ConnectionClosed)??;
        match self.cipher.as_mut() {
            Some(pair) => frame.open(&mut pair.decrypt),
            None => Ok(frame),
        }
    }

    /// Next message of type `M`. A login denial surfaces as a handshake error.
    pub async fn recv_message<M: Message>(&mut self) -> Result<M> {
        let frame = self.recv().await?;
        if frame.opcode == Opcode::ServerLoginDenied.as_u16() && M::OPCODE != Opcode::ServerLoginDenied {
            let denied: ServerLoginDenied = frame.decode_message()?;
            return Err(ProtocolError::HandshakeError(format!(
                "login denied: {:?}",
                denied.code
            )));
        }
        frame.decode_message()
    }

    /// Password login. Returns the ticket the server issued.
    #[instrument(skip(self, password))]
    pub async fn login(&mut self, identity: &str, password: &str) -> Result<SessionTicket> {
        self.send_message(&ClientLoginStart {
            identity: identity.to_string(),
        })
        .await?;
        let challenge: ServerLoginChallenge = self.recv_message().await?;

        let srp = SrpClient::new(identity, password);
        let proof = srp.respond(&challenge.salt, &challenge.server_public)?;
        self.send_message(&ClientLoginProof {
            client_public: proof.public,
            evidence: proof.evidence,
        })
        .await?;

        let accepted: ServerLoginAccepted = self.recv_message().await?;
        proof.verify_server(&accepted.server_evidence)?;
        self.install_session_cipher(&accepted.ticket);
        debug!("Password login complete");
        Ok(accepted.ticket)
    }

    /// Ticket login on a gameplay connection.
    #[instrument(skip(self, ticket))]
    pub async fn login_with_ticket(
        &mut self,
        identity: &str,
        ticket: &SessionTicket,
    ) -> Result<ServerTicketAccepted> {
        self.send_message(&ClientTicketLogin {
            identity: identity.to_string(),
            ticket: *ticket,
        })
        .await?;
        let accepted: ServerTicketAccepted = self.recv_message().await?;
        self.install_session_cipher(ticket);
        debug!("Ticket login complete");
        Ok(accepted)
    }

    fn install_session_cipher(&mut self, ticket: &SessionTicket) {
        self.cipher = Some(CipherPair::session(
            ticket,
            self.crypto.build_number,
            self.crypto.protocol_magic,
        ));
    }
}

/// Client side of the bootstrap channel.
pub struct StsClient<S> {
    framed: Framed<S, StsCodec>,
    sequence: u32,
}

impl StsClient<TcpStream> {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Ok(Self::new(TcpStream::connect(addr).await?))
    }
}

impl<S> StsClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            framed: Framed::new(stream, StsCodec::new()),
            sequence: 0,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.framed.codec().is_encrypted()
    }

    /// Fire-and-forget request without a sequence header.
    pub async fn notify(&mut self, path: &str, body: &str) -> Result<()> {
        self.framed
            .send(StsMessage::request("POST", path, None, body))
            .await
    }

    /// Send a request and wait for its reply. Error replies become `Sts` errors.
    pub async fn request(&mut self, path: &str, body: &str) -> Result<StsMessage> {
        self.sequence += 1;
        self.framed
            .send(StsMessage::request("POST", path, Some(self.sequence), body))
            .await?;
        let reply = self
            .framed
            .next()
            .await
            .ok_or(ProtocolError::ConnectionClosed)??;
        if reply.status()? != 200 {
            return Err(ProtocolError::Sts(format!(
                "{path} failed with code {}",
                reply.error_code().unwrap_or_default()
            )));
        }
        Ok(reply)
    }

    /// SRP login over the bootstrap channel, then switch to RC4.
    #[instrument(skip(self, password))]
    pub async fn login(&mut self, identity: &str, password: &str) -> Result<()> {
        let reply = self
            .request(
                "/Auth/LoginStart",
                &format!("<Request><LoginName>{identity}</LoginName></Request>\n"),
            )
            .await?;
        let key_data = hex::decode(reply.element("KeyData")?.trim())
            .map_err(|e| ProtocolError::Sts(format!("bad key data: {e}")))?;
        if key_data.len() != SALT_LEN + PUBLIC_LEN {
            return Err(ProtocolError::Sts(format!("key data length {}", key_data.len())));
        }
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&key_data[..SALT_LEN]);

        let srp = SrpClient::new(identity, password);
        let proof = srp.respond(&salt, &key_data[SALT_LEN..])?;
        let mut payload = proof.public.to_vec();
        payload.extend_from_slice(&proof.evidence);

        let reply = self
            .request(
                "/Auth/KeyData",
                &format!("<Request><KeyData>{}</KeyData></Request>\n", hex::encode(payload)),
            )
            .await?;
        let evidence = hex::decode(reply.element("KeyData")?.trim())
            .map_err(|e| ProtocolError::Sts(format!("bad server proof: {e}")))?;
        let evidence: [u8; PROOF_LEN] = evidence
            .try_into()
            .map_err(|_| ProtocolError::InvalidProof)?;
        proof.verify_server(&evidence)?;

        self.framed
            .codec_mut()
            .enable_cipher(LegacyCipher::new(&proof.session_key[..])?);
        Ok(())
    }

    /// Ask for a ticket to present on the gameplay listeners.
    pub async fn request_game_token(&mut self) -> Result<SessionTicket> {
        let reply = self.request("/Auth/RequestGameToken", "").await?;
        parse_game_token(reply.element("Token")?)
    }
}
