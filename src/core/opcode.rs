//! Wire opcodes.
//!
//! Frames carry a raw `u16`; [`Opcode`] is the closed set this server
//! understands. Anything else decodes as an unknown opcode and is skipped.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum Opcode {
    /// Greeting sent by the server on accept.
    ServerHello = 0x0003,
    ClientLoginStart = 0x0004,
    ServerLoginChallenge = 0x0005,
    ClientLoginProof = 0x0006,
    ServerLoginAccepted = 0x0007,
    ServerLoginDenied = 0x0008,
    ClientTicketLogin = 0x0009,
    ServerTicketAccepted = 0x000A,

    /// Outer frame for anything the server encrypts.
    ServerEncrypted = 0x03DC,
    /// Outer frame for anything the client encrypts.
    ClientEncrypted = 0x0244,

    ClientHeartbeat = 0x0241,
    ServerHeartbeat = 0x0242,

    ClientCharacterList = 0x07E0,
    ServerCharacterList = 0x0117,
    ClientChat = 0x01C3,
    ServerChat = 0x01C8,
    ClientLogout = 0x00BF,
    ServerLogout = 0x0594,
}

impl Opcode {
    pub const ALL: [Opcode; 18] = [
        Opcode::ServerHello,
        Opcode::ClientLoginStart,
        Opcode::ServerLoginChallenge,
        Opcode::ClientLoginProof,
        Opcode::ServerLoginAccepted,
        Opcode::ServerLoginDenied,
        Opcode::ClientTicketLogin,
        Opcode::ServerTicketAccepted,
        Opcode::ServerEncrypted,
        Opcode::ClientEncrypted,
        Opcode::ClientHeartbeat,
        Opcode::ServerHeartbeat,
        Opcode::ClientCharacterList,
        Opcode::ServerCharacterList,
        Opcode::ClientChat,
        Opcode::ServerChat,
        Opcode::ClientLogout,
        Opcode::ServerLogout,
    ];

    pub fn from_u16(raw: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| *op as u16 == raw)
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Packets that drive the login handshake.
    ///
    /// These are the only opcodes a connection accepts while authenticating.
    pub fn is_handshake(self) -> bool {
        matches!(
            self,
            Opcode::ClientLoginStart | Opcode::ClientLoginProof | Opcode::ClientTicketLogin
        )
    }

    pub fn is_envelope(self) -> bool {
        matches!(self, Opcode::ServerEncrypted | Opcode::ClientEncrypted)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({:#06x})", self, *self as u16)
    }
}
