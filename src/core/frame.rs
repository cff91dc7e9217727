//! # Frames and Encrypted Envelopes
//!
//! Wire format:
//! ```text
//! [Length u32 LE] [Opcode u16 LE] [Payload (Length - 2)]
//! ```
//!
//! Encrypted envelope, carried as the payload of an outer frame whose opcode
//! is `ServerEncrypted` or `ClientEncrypted`:
//! ```text
//! [InnerLen + 4 (u32 LE)] [cipher(Opcode u16 LE ++ Payload)]
//! ```
//! The whole inner unit (opcode and payload) goes through one cipher call.

use bytes::{BufMut, BytesMut};

use crate::core::bitstream::{BitReader, PacketWriter, Readable, Writable};
use crate::core::opcode::Opcode;
use crate::crypto::packet_cipher::PacketCipher;
use crate::error::{constants, ProtocolError, Result};

/// Size of the length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;
/// Size of the opcode field.
pub const OPCODE_LEN: usize = 2;
/// Length prefix plus opcode.
pub const HEADER_LEN: usize = LENGTH_PREFIX_LEN + OPCODE_LEN;
/// Size of the envelope's inner length header.
pub const ENVELOPE_HEADER_LEN: usize = 4;

/// A typed packet with a fixed opcode.
pub trait Message: Writable + Readable {
    const OPCODE: Opcode;
}

/// One length-prefixed, opcode-tagged unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u16,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(opcode: Opcode, payload: Vec<u8>) -> Self {
        Self {
            opcode: opcode.as_u16(),
            payload,
        }
    }

    /// Frame with an opcode outside the known set.
    pub fn raw(opcode: u16, payload: Vec<u8>) -> Self {
        Self { opcode, payload }
    }

    /// Serialize a typed message as one bit-packed payload.
    pub fn from_message<M: Message>(message: &M) -> Result<Self> {
        let mut writer = PacketWriter::new();
        message.write(&mut writer)?;
        Ok(Self::new(M::OPCODE, writer.finish()))
    }

    /// Decode the payload as `M`.
    ///
    /// # Errors
    /// `UnexpectedMessage` if the opcode is not `M::OPCODE`, decode errors if
    /// the payload is malformed.
    pub fn decode_message<M: Message>(&self) -> Result<M> {
        if self.opcode != M::OPCODE.as_u16() {
            return Err(ProtocolError::UnexpectedMessage);
        }
        M::read(&mut BitReader::new(&self.payload))
    }

    pub fn known_opcode(&self) -> Option<Opcode> {
        Opcode::from_u16(self.opcode)
    }

    /// Bytes this frame occupies on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Append the wire form to `dst`.
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.wire_len());
        dst.put_u32_le((OPCODE_LEN + self.payload.len()) as u32);
        dst.put_u16_le(self.opcode);
        dst.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        self.write_to(&mut buf);
        buf.to_vec()
    }

    /// Decode exactly one frame from `data`.
    ///
    /// # Errors
    /// `UnexpectedEof` when the buffer is shorter than the declared length,
    /// `Decode` when the length cannot hold an opcode or bytes are left over.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(ProtocolError::UnexpectedEof {
                needed: HEADER_LEN * 8,
                available: data.len() * 8,
            });
        }

        let length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if length < OPCODE_LEN {
            return Err(ProtocolError::Decode(constants::ERR_FRAME_TOO_SHORT.into()));
        }

        let total = LENGTH_PREFIX_LEN + length;
        if data.len() < total {
            return Err(ProtocolError::UnexpectedEof {
                needed: total * 8,
                available: data.len() * 8,
            });
        }
        if data.len() > total {
            return Err(ProtocolError::Decode(format!(
                "{} trailing bytes after frame",
                data.len() - total
            )));
        }

        Ok(Self {
            opcode: u16::from_le_bytes([data[4], data[5]]),
            payload: data[HEADER_LEN..total].to_vec(),
        })
    }

    /// Wrap this frame in an encrypted envelope.
    ///
    /// # Errors
    /// Cipher errors abort the seal; nothing partially encrypted escapes.
    pub fn seal(&self, envelope: Opcode, cipher: &mut PacketCipher) -> Result<Frame> {
        let mut inner = Vec::with_capacity(OPCODE_LEN + self.payload.len());
        inner.extend_from_slice(&self.opcode.to_le_bytes());
        inner.extend_from_slice(&self.payload);
        cipher.encrypt(&mut inner)?;

        let mut payload = Vec::with_capacity(ENVELOPE_HEADER_LEN + inner.len());
        payload.extend_from_slice(&((inner.len() + ENVELOPE_HEADER_LEN) as u32).to_le_bytes());
        payload.extend_from_slice(&inner);
        Ok(Frame::new(envelope, payload))
    }

    /// Decrypt an envelope back into its inner frame.
    pub fn open(&self, cipher: &mut PacketCipher) -> Result<Frame> {
        if !self.known_opcode().is_some_and(Opcode::is_envelope) {
            return Err(ProtocolError::UnexpectedMessage);
        }
        if self.payload.len() < ENVELOPE_HEADER_LEN {
            return Err(ProtocolError::UnexpectedEof {
                needed: ENVELOPE_HEADER_LEN * 8,
                available: self.payload.len() * 8,
            });
        }

        let declared = u32::from_le_bytes([
            self.payload[0],
            self.payload[1],
            self.payload[2],
            self.payload[3],
        ]) as usize;
        if declared != self.payload.len() {
            return Err(ProtocolError::Decode(constants::ERR_ENVELOPE_LENGTH.into()));
        }

        let mut inner = self.payload[ENVELOPE_HEADER_LEN..].to_vec();
        cipher.decrypt(&mut inner)?;
        if inner.len() < OPCODE_LEN {
            return Err(ProtocolError::Decode(constants::ERR_FRAME_TOO_SHORT.into()));
        }

        Ok(Frame {
            opcode: u16::from_le_bytes([inner[0], inner[1]]),
            payload: inner.split_off(OPCODE_LEN),
        })
    }
}
