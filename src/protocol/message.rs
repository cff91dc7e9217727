//! Typed handshake and keep-alive packets.
//!
//! Every message is bit-packed with [`PacketWriter`]; fields follow one another
//! with no alignment, so a 5-bit field shifts everything after it.

use crate::core::bitstream::{BitReader, PacketWriter, Readable, Writable};
use crate::core::frame::Message;
use crate::core::opcode::Opcode;
use crate::crypto::srp6::{PROOF_LEN, PUBLIC_LEN, SALT_LEN};
use crate::error::{ProtocolError, Result};

/// Length of a session ticket.
pub const TICKET_LEN: usize = 16;

/// Width of the greeting's connection-role selector.
pub const ROLE_BITS: u32 = 5;

/// Bit offset of the role selector inside the greeting payload.
pub const ROLE_BIT_OFFSET: usize = 32 * 4 + 64 + 16;

/// Which listener a connection came through.
///
/// The discriminant is the 5-bit selector sent in the greeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionRole {
    /// Login listener. Plain greeting, no cipher until login succeeds.
    Auth = 0b00011,
    /// Gameplay listener. Auth-mode cipher from the first byte.
    Realm = 0b01011,
}

impl ConnectionRole {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0b00011 => Some(Self::Auth),
            0b01011 => Some(Self::Realm),
            _ => None,
        }
    }

    pub fn as_bits(self) -> u8 {
        self as u8
    }

    /// Whether frames are enveloped from the moment the socket is accepted.
    pub fn encrypted_from_start(self) -> bool {
        matches!(self, Self::Realm)
    }
}

impl std::fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auth => write!(f, "auth"),
            Self::Realm => write!(f, "realm"),
        }
    }
}

/// Server greeting, first packet on every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub auth_version: u32,
    pub realm_id: u32,
    pub realm_group_id: u32,
    pub reserved_a: u32,
    pub reserved_b: u64,
    pub reserved_c: u16,
    pub role: ConnectionRole,
    pub protocol_magic: u32,
}

impl ServerHello {
    pub fn new(
        auth_version: u32,
        realm_id: u32,
        realm_group_id: u32,
        role: ConnectionRole,
        protocol_magic: u32,
    ) -> Self {
        Self {
            auth_version,
            realm_id,
            realm_group_id,
            reserved_a: 0,
            reserved_b: 0,
            reserved_c: 0,
            role,
            protocol_magic,
        }
    }
}

impl Writable for ServerHello {
    fn write(&self, writer: &mut PacketWriter) -> Result<()> {
        writer.write_u32(self.auth_version);
        writer.write_u32(self.realm_id);
        writer.write_u32(self.realm_group_id);
        writer.write_u32(self.reserved_a);
        writer.write_u64(self.reserved_b);
        writer.write_u16(self.reserved_c);
        writer.write_bits(u64::from(self.role.as_bits()), ROLE_BITS);
        writer.write_u32(self.protocol_magic);
        Ok(())
    }
}

impl Readable for ServerHello {
    fn read(reader: &mut BitReader<'_>) -> Result<Self> {
        let auth_version = reader.read_u32()?;
        let realm_id = reader.read_u32()?;
        let realm_group_id = reader.read_u32()?;
        let reserved_a = reader.read_u32()?;
        let reserved_b = reader.read_u64()?;
        let reserved_c = reader.read_u16()?;
        let bits = reader.read_bits(ROLE_BITS)? as u8;
        let role = ConnectionRole::from_bits(bits)
            .ok_or_else(|| ProtocolError::Decode(format!("unknown connection role {bits:#07b}")))?;
        let protocol_magic = reader.read_u32()?;

        Ok(Self {
            auth_version,
            realm_id,
            realm_group_id,
            reserved_a,
            reserved_b,
            reserved_c,
            role,
            protocol_magic,
        })
    }
}

impl Message for ServerHello {
    const OPCODE: Opcode = Opcode::ServerHello;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientLoginStart {
    pub identity: String,
}

impl Writable for ClientLoginStart {
    fn write(&self, writer: &mut PacketWriter) -> Result<()> {
        writer.write_wide_string(&self.identity)
    }
}

impl Readable for ClientLoginStart {
    fn read(reader: &mut BitReader<'_>) -> Result<Self> {
        Ok(Self {
            identity: reader.read_wide_string()?,
        })
    }
}

impl Message for ClientLoginStart {
    const OPCODE: Opcode = Opcode::ClientLoginStart;
}

/// Salt and server public ephemeral B.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLoginChallenge {
    pub salt: [u8; SALT_LEN],
    pub server_public: [u8; PUBLIC_LEN],
}

impl Writable for ServerLoginChallenge {
    fn write(&self, writer: &mut PacketWriter) -> Result<()> {
        writer.write_bytes(&self.salt);
        writer.write_bytes(&self.server_public);
        Ok(())
    }
}

impl Readable for ServerLoginChallenge {
    fn read(reader: &mut BitReader<'_>) -> Result<Self> {
        Ok(Self {
            salt: reader.read_array()?,
            server_public: reader.read_array()?,
        })
    }
}

impl Message for ServerLoginChallenge {
    const OPCODE: Opcode = Opcode::ServerLoginChallenge;
}

/// Client public ephemeral A and evidence M1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientLoginProof {
    pub client_public: [u8; PUBLIC_LEN],
    pub evidence: [u8; PROOF_LEN],
}

impl Writable for ClientLoginProof {
    fn write(&self, writer: &mut PacketWriter) -> Result<()> {
        writer.write_bytes(&self.client_public);
        writer.write_bytes(&self.evidence);
        Ok(())
    }
}

impl Readable for ClientLoginProof {
    fn read(reader: &mut BitReader<'_>) -> Result<Self> {
        Ok(Self {
            client_public: reader.read_array()?,
            evidence: reader.read_array()?,
        })
    }
}

impl Message for ClientLoginProof {
    const OPCODE: Opcode = Opcode::ClientLoginProof;
}

/// Server evidence M2 plus the ticket that keys the session cipher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLoginAccepted {
    pub server_evidence: [u8; PROOF_LEN],
    pub ticket: [u8; TICKET_LEN],
}

impl Writable for ServerLoginAccepted {
    fn write(&self, writer: &mut PacketWriter) -> Result<()> {
        writer.write_bytes(&self.server_evidence);
        writer.write_bytes(&self.ticket);
        Ok(())
    }
}

impl Readable for ServerLoginAccepted {
    fn read(reader: &mut BitReader<'_>) -> Result<Self> {
        Ok(Self {
            server_evidence: reader.read_array()?,
            ticket: reader.read_array()?,
        })
    }
}

impl Message for ServerLoginAccepted {
    const OPCODE: Opcode = Opcode::ServerLoginAccepted;
}

/// Denial reasons. Every handshake failure is reported as `Denied` so the
/// client cannot tell an unknown account from a wrong password.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DenialCode {
    Denied = 16,
    TooManyAttempts = 17,
}

impl DenialCode {
    fn from_u32(value: u32) -> Option<Self> {
        match value {
            16 => Some(Self::Denied),
            17 => Some(Self::TooManyAttempts),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLoginDenied {
    pub code: DenialCode,
}

impl ServerLoginDenied {
    pub fn uniform() -> Self {
        Self {
            code: DenialCode::Denied,
        }
    }
}

impl Writable for ServerLoginDenied {
    fn write(&self, writer: &mut PacketWriter) -> Result<()> {
        writer.write_u32(self.code as u32);
        Ok(())
    }
}

impl Readable for ServerLoginDenied {
    fn read(reader: &mut BitReader<'_>) -> Result<Self> {
        let raw = reader.read_u32()?;
        let code = DenialCode::from_u32(raw)
            .ok_or_else(|| ProtocolError::Decode(format!("unknown denial code {raw}")))?;
        Ok(Self { code })
    }
}

impl Message for ServerLoginDenied {
    const OPCODE: Opcode = Opcode::ServerLoginDenied;
}

/// Gameplay connection login with a ticket issued on the auth listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientTicketLogin {
    pub identity: String,
    pub ticket: [u8; TICKET_LEN],
}

impl Writable for ClientTicketLogin {
    fn write(&self, writer: &mut PacketWriter) -> Result<()> {
        writer.write_wide_string(&self.identity)?;
        writer.write_bytes(&self.ticket);
        Ok(())
    }
}

impl Readable for ClientTicketLogin {
    fn read(reader: &mut BitReader<'_>) -> Result<Self> {
        Ok(Self {
            identity: reader.read_wide_string()?,
            ticket: reader.read_array()?,
        })
    }
}

impl Message for ClientTicketLogin {
    const OPCODE: Opcode = Opcode::ClientTicketLogin;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTicketAccepted {
    pub realm_id: u32,
}

impl Writable for ServerTicketAccepted {
    fn write(&self, writer: &mut PacketWriter) -> Result<()> {
        writer.write_u32(self.realm_id);
        Ok(())
    }
}

impl Readable for ServerTicketAccepted {
    fn read(reader: &mut BitReader<'_>) -> Result<Self> {
        Ok(Self {
            realm_id: reader.read_u32()?,
        })
    }
}

impl Message for ServerTicketAccepted {
    const OPCODE: Opcode = Opcode::ServerTicketAccepted;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientHeartbeat {
    pub sequence: u32,
}

impl Writable for ClientHeartbeat {
    fn write(&self, writer: &mut PacketWriter) -> Result<()> {
        writer.write_u32(self.sequence);
        Ok(())
    }
}

impl Readable for ClientHeartbeat {
    fn read(reader: &mut BitReader<'_>) -> Result<Self> {
        Ok(Self {
            sequence: reader.read_u32()?,
        })
    }
}

impl Message for ClientHeartbeat {
    const OPCODE: Opcode = Opcode::ClientHeartbeat;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerHeartbeat {
    pub sequence: u32,
}

impl Writable for ServerHeartbeat {
    fn write(&self, writer: &mut PacketWriter) -> Result<()> {
        writer.write_u32(self.sequence);
        Ok(())
    }
}

impl Readable for ServerHeartbeat {
    fn read(reader: &mut BitReader<'_>) -> Result<Self> {
        Ok(Self {
            sequence: reader.read_u32()?,
        })
    }
}

impl Message for ServerHeartbeat {
    const OPCODE: Opcode = Opcode::ServerHeartbeat;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::frame::Frame;

    #[test]
    fn test_greeting_selector_position() {
        let hello = ServerHello::new(16042, 1, 21, ConnectionRole::Realm, 0x0979_98A0);
        let frame = Frame::from_message(&hello).unwrap();

        // 26 whole bytes precede the selector; the magic starts at bit 5 of byte 26
        assert_eq!(ROLE_BIT_OFFSET, 208);
        assert_eq!(frame.payload.len(), (208 + 5 + 32 + 7) / 8);

        let mut reader = BitReader::new(&frame.payload);
        reader.read_bits(64).unwrap();
        reader.read_bits(64).unwrap();
        reader.read_bits(64).unwrap();
        reader.read_bits(16).unwrap();
        assert_eq!(reader.bit_position(), ROLE_BIT_OFFSET);
        assert_eq!(reader.read_bits(ROLE_BITS).unwrap(), 0b01011);
        assert_eq!(reader.read_u32().unwrap(), 0x0979_98A0);

        assert_eq!(frame.payload[26] & 0x1F, 0b01011);
        assert_eq!(frame.payload[26] >> 5, (0x0979_98A0u32 & 0x7) as u8);
    }

    #[test]
    fn test_greeting_decode() {
        let hello = ServerHello::new(7, 2, 3, ConnectionRole::Auth, 0xDEAD_BEEF);
        let frame = Frame::from_message(&hello).unwrap();
        assert_eq!(frame.decode_message::<ServerHello>().unwrap(), hello);
    }

    #[test]
    fn test_unknown_role_rejected() {
        let mut writer = PacketWriter::new();
        writer.write_bits(0, 64);
        writer.write_bits(0, 64);
        writer.write_bits(0, 64);
        writer.write_u16(0);
        writer.write_bits(0b11111, ROLE_BITS);
        writer.write_u32(0);
        let payload = writer.finish();
        assert!(matches!(
            ServerHello::read(&mut BitReader::new(&payload)),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn test_ticket_login_wide_string() {
        let login = ClientTicketLogin {
            identity: "tëster@example.com".into(),
            ticket: [0x5A; TICKET_LEN],
        };
        let frame = Frame::from_message(&login).unwrap();
        // 1 flag bit + 7 length bits + 18 UTF-16 units + 16 ticket bytes
        assert_eq!(frame.payload.len(), 1 + 18 * 2 + 16);
        assert_eq!(frame.decode_message::<ClientTicketLogin>().unwrap(), login);
    }

    #[test]
    fn test_denial_is_uniform() {
        let frame = Frame::from_message(&ServerLoginDenied::uniform()).unwrap();
        assert_eq!(frame.payload, 16u32.to_le_bytes().to_vec());
    }

    #[test]
    fn test_truncated_challenge() {
        let frame = Frame::new(Opcode::ServerLoginChallenge, vec![0; SALT_LEN + 10]);
        assert!(matches!(
            frame.decode_message::<ServerLoginChallenge>(),
            Err(ProtocolError::UnexpectedEof { .. })
        ));
    }
}
