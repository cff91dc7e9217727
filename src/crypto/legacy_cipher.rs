//! RC4 for the legacy text bootstrap channel.
//!
//! Keyed by the 64-byte SRP6 session key once the bootstrap login completes.
//! Unlike the packet cipher, each direction's keystream runs continuously for
//! the lifetime of the connection.

use std::fmt;

use rc4::consts::U64;
use rc4::{KeyInit, Rc4, StreamCipher};

use crate::crypto::srp6::SESSION_KEY_LEN;
use crate::error::{ProtocolError, Result};

pub struct LegacyCipher {
    encrypt: Rc4<U64>,
    decrypt: Rc4<U64>,
    processed: u64,
}

impl fmt::Debug for LegacyCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegacyCipher")
            .field("processed", &self.processed)
            .finish_non_exhaustive()
    }
}

impl LegacyCipher {
    /// # Errors
    /// Returns `ProtocolError::KeyTooShort` unless `key` is exactly 64 bytes.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != SESSION_KEY_LEN {
            return Err(ProtocolError::KeyTooShort(key.len()));
        }
        let encrypt =
            Rc4::<U64>::new_from_slice(key).map_err(|_| ProtocolError::KeyTooShort(key.len()))?;
        let decrypt =
            Rc4::<U64>::new_from_slice(key).map_err(|_| ProtocolError::KeyTooShort(key.len()))?;

        Ok(Self {
            encrypt,
            decrypt,
            processed: 0,
        })
    }

    pub fn encrypt(&mut self, buffer: &mut [u8]) {
        self.encrypt.apply_keystream(buffer);
        self.processed += buffer.len() as u64;
    }

    pub fn decrypt(&mut self, buffer: &mut [u8]) {
        self.decrypt.apply_keystream(buffer);
        self.processed += buffer.len() as u64;
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_peers_share_keystream_across_calls() {
        let key = [0x5Au8; SESSION_KEY_LEN];
        let mut server = LegacyCipher::new(&key).unwrap();
        let mut client = LegacyCipher::new(&key).unwrap();

        let plain = b"STS/1.0 200 OK\r\nl:0\r\ns:1R\r\n\r\n".to_vec();
        let mut wire = plain.clone();
        server.encrypt(&mut wire);
        assert_ne!(wire, plain);

        // Split decryption still lines up because the keystream is continuous
        let (head, tail) = wire.split_at_mut(5);
        client.decrypt(head);
        client.decrypt(tail);
        assert_eq!(wire, plain);
    }

    #[test]
    fn test_wrong_key_length_rejected() {
        assert!(matches!(
            LegacyCipher::new(&[0u8; 16]),
            Err(ProtocolError::KeyTooShort(16))
        ));
    }
}
