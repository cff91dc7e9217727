//! Tokio codec for the bootstrap channel.
//!
//! Once the RC4 key is enabled every byte in both directions is encrypted,
//! headers included. The decoder decrypts newly arrived bytes in place and
//! remembers how far it got, so a message split across reads is decrypted
//! exactly once.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::crypto::legacy_cipher::LegacyCipher;
use crate::error::{constants, ProtocolError};
use crate::sts::message::{declared_length, StsMessage, HEADER_END};

/// Longest head accepted before the blank line
pub const MAX_HEAD_LEN: usize = 8 * 1024;
/// Largest body accepted
pub const MAX_BODY_LEN: usize = 64 * 1024;

#[derive(Debug, Default)]
pub struct StsCodec {
    cipher: Option<LegacyCipher>,
    /// Bytes at the front of the read buffer that are already plaintext
    decrypted: usize,
}

impl StsCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch both directions to RC4.
    ///
    /// Bytes still buffered and not yet decoded are treated as ciphertext.
    pub fn enable_cipher(&mut self, cipher: LegacyCipher) {
        debug!("Bootstrap channel cipher enabled");
        self.cipher = Some(cipher);
        self.decrypted = 0;
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

impl Decoder for StsCodec {
    type Item = StsMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(cipher) = self.cipher.as_mut() {
            if src.len() > self.decrypted {
                cipher.decrypt(&mut src[self.decrypted..]);
                self.decrypted = src.len();
            }
        }

        let Some(head_len) = find(src, HEADER_END) else {
            if src.len() > MAX_HEAD_LEN {
                return Err(ProtocolError::Sts(constants::ERR_STS_HEADER.into()));
            }
            return Ok(None);
        };
        if head_len > MAX_HEAD_LEN {
            return Err(ProtocolError::Sts(constants::ERR_STS_HEADER.into()));
        }

        let head = std::str::from_utf8(&src[..head_len])
            .map_err(|_| ProtocolError::Sts(constants::ERR_STS_HEADER.into()))?;
        let body_len = declared_length(head)?;
        if body_len > MAX_BODY_LEN {
            return Err(ProtocolError::Sts(format!("body too large: {body_len} bytes")));
        }

        let total = head_len + HEADER_END.len() + body_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let raw = src.split_to(total);
        if self.cipher.is_some() {
            self.decrypted -= total;
        }

        let head = String::from_utf8_lossy(&raw[..head_len]).into_owned();
        let body = String::from_utf8(raw[head_len + HEADER_END.len()..].to_vec())
            .map_err(|_| ProtocolError::Sts("body is not UTF-8".into()))?;
        StsMessage::parse(&head, body).map(Some)
    }
}

impl Encoder<StsMessage> for StsCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: StsMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut bytes = item.encode();
        if let Some(cipher) = self.cipher.as_mut() {
            cipher.encrypt(&mut bytes);
        }
        dst.put_slice(&bytes);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ping(seq: u32) -> StsMessage {
        StsMessage::request("POST", "/Sts/Ping", Some(seq), "<Ping/>")
    }

    #[test]
    fn test_plain_roundtrip_split() {
        let mut writer = StsCodec::new();
        let mut reader = StsCodec::new();
        let mut wire = BytesMut::new();
        writer.encode(ping(1), &mut wire).unwrap();

        let mut buffer = BytesMut::new();
        for byte in wire.iter() {
            assert!(reader.decode(&mut buffer).unwrap().is_none());
            buffer.put_u8(*byte);
        }
        assert_eq!(reader.decode(&mut buffer).unwrap().unwrap(), ping(1));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_encrypted_split_reads() {
        let key = [0x42u8; 64];
        let mut writer = StsCodec::new();
        let mut reader = StsCodec::new();
        writer.enable_cipher(LegacyCipher::new(&key).unwrap());
        reader.enable_cipher(LegacyCipher::new(&key).unwrap());

        let mut wire = BytesMut::new();
        writer.encode(ping(1), &mut wire).unwrap();
        writer.encode(ping(2), &mut wire).unwrap();
        assert!(!wire.starts_with(b"POST"));

        let mut buffer = BytesMut::new();
        let mut decoded = Vec::new();
        for chunk in wire.chunks(7) {
            buffer.extend_from_slice(chunk);
            while let Some(message) = reader.decode(&mut buffer).unwrap() {
                decoded.push(message);
            }
        }
        assert_eq!(decoded, vec![ping(1), ping(2)]);
    }

    #[test]
    fn test_enable_mid_stream() {
        let key = [9u8; 64];
        let mut writer = StsCodec::new();
        let mut reader = StsCodec::new();

        let mut buffer = BytesMut::new();
        writer.encode(ping(1), &mut buffer).unwrap();
        assert_eq!(reader.decode(&mut buffer).unwrap().unwrap(), ping(1));

        writer.enable_cipher(LegacyCipher::new(&key).unwrap());
        reader.enable_cipher(LegacyCipher::new(&key).unwrap());
        writer.encode(ping(2), &mut buffer).unwrap();
        assert_eq!(reader.decode(&mut buffer).unwrap().unwrap(), ping(2));
    }

    #[test]
    fn test_oversized_head_rejected_in_one_read() {
        let mut reader = StsCodec::new();
        let padding = "x".repeat(MAX_HEAD_LEN);
        let raw = format!("POST /Sts/Ping STS/1.0\r\nl:0\r\npad:{padding}\r\n\r\n");
        let mut buffer = BytesMut::from(raw.as_bytes());
        assert!(matches!(
            reader.decode(&mut buffer),
            Err(ProtocolError::Sts(_))
        ));

        // a head right at the limit is still accepted
        let line = "POST /Sts/Ping STS/1.0\r\nl:0\r\npad:";
        let fill = "x".repeat(MAX_HEAD_LEN - line.len());
        let mut buffer = BytesMut::from(format!("{line}{fill}\r\n\r\n").as_bytes());
        assert!(reader.decode(&mut buffer).unwrap().is_some());
    }

    #[test]
    fn test_missing_length_header() {
        let mut reader = StsCodec::new();
        let mut buffer = BytesMut::from(&b"POST /Sts/Ping STS/1.0\r\ns:1\r\n\r\n"[..]);
        assert!(matches!(
            reader.decode(&mut buffer),
            Err(ProtocolError::Sts(_))
        ));
    }
}
