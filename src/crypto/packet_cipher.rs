//! # Packet Cipher
//!
//! Stateful XOR stream cipher used on auth and realm connections.
//!
//! A 64-bit seed is expanded into a 128-byte key table plus a final 64-bit
//! key value. Every call to [`PacketCipher::encrypt`] or
//! [`PacketCipher::decrypt`] seeds a fresh 8-byte rolling register from that
//! key value, then walks the buffer byte by byte:
//!
//! ```text
//! out = register[lane] ^ in ^ table[row + lane]
//! ```
//!
//! where `lane = i % 8` and `row` is recomputed at every 8th byte from the
//! total buffer length and the position. Encryption feeds the output byte
//! back into the register, decryption feeds the input byte (both are the
//! ciphertext), and decryption keeps its register in reversed byte order.
//!
//! ## Seeds
//! - auth mode: build number and protocol magic folded into a base value
//! - session mode: the 16 ticket bytes folded into the base value, then
//!   combined with the auth-mode seed
//!
//! Build number and magic always arrive as arguments. Nothing here reads
//! process-wide state.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ProtocolError, Result};

/// Derived key table size in bytes.
pub const KEY_TABLE_LEN: usize = 128;

/// Width of the rolling register in bytes.
pub const REGISTER_LEN: usize = 8;

const ROUNDS: usize = KEY_TABLE_LEN / REGISTER_LEN;

/// Odd multiplier shared by every recurrence in this module.
pub const MULTIPLIER: u64 = 0xAA7F_8EA9;

/// Starting value for seed folding and key expansion.
pub const BASE_VALUE: u64 = 0x718D_A907_4F2D_EB91;

#[inline]
fn fold(accumulator: u64, value: u64) -> u64 {
    (accumulator ^ value)
        .wrapping_mul(MULTIPLIER)
        .wrapping_add(accumulator.rotate_right(32))
}

/// Seed for connections that have not authenticated yet.
pub fn auth_seed(build_number: u32, protocol_magic: u32) -> u64 {
    let seed = fold(BASE_VALUE, u64::from(build_number));
    fold(seed, u64::from(protocol_magic))
}

/// Seed derived from a session ticket.
pub fn ticket_seed(ticket: &[u8; 16], build_number: u32, protocol_magic: u32) -> u64 {
    let folded = ticket
        .iter()
        .fold(BASE_VALUE, |acc, &byte| fold(acc, u64::from(byte)));
    fold(folded, auth_seed(build_number, protocol_magic))
}

/// Output of key expansion.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    pub table: [u8; KEY_TABLE_LEN],
    pub value: u64,
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey").finish_non_exhaustive()
    }
}

/// Expand a seed into the key table and final key value.
///
/// Two interleaved accumulators (low and high halves of the seed) are each
/// multiplied by [`MULTIPLIER`] and combined with the previous round's output.
/// Every round contributes 8 bytes of table.
pub fn derive_key(seed: u64) -> DerivedKey {
    let mut table = [0u8; KEY_TABLE_LEN];
    let mut low = seed & 0xFFFF_FFFF;
    let mut high = seed >> 32;
    let mut previous = BASE_VALUE;

    for round in 0..ROUNDS {
        low = low
            .wrapping_mul(MULTIPLIER)
            .wrapping_add(previous & 0xFFFF_FFFF);
        high = high
            .wrapping_mul(MULTIPLIER)
            .wrapping_add(previous >> 32)
            .wrapping_add(low);
        previous = (high << 32) ^ low ^ previous.rotate_left(17);

        let start = round * REGISTER_LEN;
        table[start..start + REGISTER_LEN].copy_from_slice(&previous.to_le_bytes());
    }

    DerivedKey {
        table,
        value: previous,
    }
}

/// One direction of the packet cipher.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PacketCipher {
    table: Vec<u8>,
    value: u64,
    #[zeroize(skip)]
    processed: u64,
}

impl fmt::Debug for PacketCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketCipher")
            .field("processed", &self.processed)
            .finish_non_exhaustive()
    }
}

impl PacketCipher {
    pub fn from_seed(seed: u64) -> Self {
        let key = derive_key(seed);
        Self {
            table: key.table.to_vec(),
            value: key.value,
            processed: 0,
        }
    }

    /// Build a cipher from an externally supplied key table.
    ///
    /// # Errors
    /// Returns `ProtocolError::KeyTooShort` if the table holds fewer than 128 bytes.
    pub fn from_parts(table: &[u8], value: u64) -> Result<Self> {
        if table.len() < KEY_TABLE_LEN {
            return Err(ProtocolError::KeyTooShort(table.len()));
        }
        Ok(Self {
            table: table.to_vec(),
            value,
            processed: 0,
        })
    }

    /// Total bytes this direction has processed.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Start of the table row used for the 8-byte block at `index`.
    #[inline]
    fn row_offset(&self, total_len: usize, index: usize) -> usize {
        let rolling = (total_len as u64)
            .wrapping_add(index as u64)
            .wrapping_mul(MULTIPLIER)
            ^ self.value;
        ((rolling >> 7) % ROUNDS as u64) as usize * REGISTER_LEN
    }

    #[inline]
    fn table_byte(&self, index: usize) -> Result<u8> {
        self.table
            .get(index)
            .copied()
            .ok_or(ProtocolError::KeyIndexOutOfBounds(index))
    }

    /// Encrypt `buffer` in place.
    ///
    /// On error the buffer contents are unspecified and must be discarded.
    pub fn encrypt(&mut self, buffer: &mut [u8]) -> Result<()> {
        let total_len = buffer.len();
        let mut register = self.value.to_le_bytes();
        let mut row = 0;

        for (index, byte) in buffer.iter_mut().enumerate() {
            let lane = index % REGISTER_LEN;
            if lane == 0 {
                row = self.row_offset(total_len, index);
            }
            let output = register[lane] ^ *byte ^ self.table_byte(row + lane)?;
            register[lane] = output;
            *byte = output;
        }

        self.processed += total_len as u64;
        Ok(())
    }

    /// Decrypt `buffer` in place.
    ///
    /// On error the buffer contents are unspecified and must be discarded.
    pub fn decrypt(&mut self, buffer: &mut [u8]) -> Result<()> {
        let total_len = buffer.len();
        // Register held in reversed byte order.
        let mut register = self.value.to_be_bytes();
        let mut row = 0;

        for (index, byte) in buffer.iter_mut().enumerate() {
            let lane = index % REGISTER_LEN;
            if lane == 0 {
                row = self.row_offset(total_len, index);
            }
            let slot = REGISTER_LEN - 1 - lane;
            let input = *byte;
            *byte = register[slot] ^ input ^ self.table_byte(row + lane)?;
            register[slot] = input;
        }

        self.processed += total_len as u64;
        Ok(())
    }
}

/// Encrypt and decrypt states for one connection.
///
/// Both halves come from the same seed but never share state.
#[derive(Debug, Clone)]
pub struct CipherPair {
    pub encrypt: PacketCipher,
    pub decrypt: PacketCipher,
}

impl CipherPair {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            encrypt: PacketCipher::from_seed(seed),
            decrypt: PacketCipher::from_seed(seed),
        }
    }

    /// Pair used before a connection has authenticated.
    pub fn auth(build_number: u32, protocol_magic: u32) -> Self {
        Self::from_seed(auth_seed(build_number, protocol_magic))
    }

    /// Pair keyed by a session ticket.
    pub fn session(ticket: &[u8; 16], build_number: u32, protocol_magic: u32) -> Self {
        Self::from_seed(ticket_seed(ticket, build_number, protocol_magic))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const BUILD: u32 = 16042;
    const MAGIC: u32 = 0x0979_98A0;

    fn message(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 + 7) as u8).collect()
    }

    #[test]
    fn test_roundtrip_around_register_cycle() {
        let pair = CipherPair::auth(BUILD, MAGIC);
        for len in [0usize, 1, 7, 8, 9, 1024] {
            let mut encrypt = pair.encrypt.clone();
            let mut decrypt = pair.decrypt.clone();
            let plain = message(len);
            let mut buffer = plain.clone();

            encrypt.encrypt(&mut buffer).unwrap();
            if len >= 8 {
                assert_ne!(buffer, plain, "len {len} left unchanged");
            }
            decrypt.decrypt(&mut buffer).unwrap();
            assert_eq!(buffer, plain, "len {len} did not roundtrip");
        }
    }

    #[test]
    fn test_key_derivation_is_pure() {
        let seed = auth_seed(BUILD, MAGIC);
        let first = derive_key(seed);
        let second = derive_key(seed);
        assert_eq!(first, second);
        assert_ne!(derive_key(seed ^ 1), first);
    }

    #[test]
    fn test_seed_modes_differ() {
        let ticket = [0x11u8; 16];
        let mut other = ticket;
        other[15] ^= 0x80;

        assert_ne!(ticket_seed(&ticket, BUILD, MAGIC), auth_seed(BUILD, MAGIC));
        assert_ne!(
            ticket_seed(&ticket, BUILD, MAGIC),
            ticket_seed(&other, BUILD, MAGIC)
        );
        assert_ne!(auth_seed(BUILD, MAGIC), auth_seed(BUILD + 1, MAGIC));
    }

    #[test]
    fn test_register_resets_per_call() {
        let mut cipher = PacketCipher::from_seed(auth_seed(BUILD, MAGIC));
        let mut first = message(40);
        let mut second = message(40);
        cipher.encrypt(&mut first).unwrap();
        cipher.encrypt(&mut second).unwrap();
        assert_eq!(first, second);
        assert_eq!(cipher.processed(), 80);
    }

    #[test]
    fn test_wrong_key_does_not_decrypt() {
        let mut encrypt = CipherPair::session(&[1u8; 16], BUILD, MAGIC).encrypt;
        let mut decrypt = CipherPair::session(&[2u8; 16], BUILD, MAGIC).decrypt;
        let plain = message(64);
        let mut buffer = plain.clone();
        encrypt.encrypt(&mut buffer).unwrap();
        decrypt.decrypt(&mut buffer).unwrap();
        assert_ne!(buffer, plain);
    }

    #[test]
    fn test_short_key_table_rejected() {
        let key = derive_key(42);
        match PacketCipher::from_parts(&key.table[..100], key.value) {
            Err(ProtocolError::KeyTooShort(100)) => {}
            other => panic!("expected KeyTooShort, got {other:?}"),
        }

        let mut cipher = PacketCipher::from_parts(&key.table, key.value).unwrap();
        let mut reference = PacketCipher::from_seed(42);
        let mut a = message(33);
        let mut b = a.clone();
        cipher.encrypt(&mut a).unwrap();
        reference.encrypt(&mut b).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_directions_are_independent() {
        let mut pair = CipherPair::auth(BUILD, MAGIC);
        let mut buffer = message(16);
        pair.encrypt.encrypt(&mut buffer).unwrap();
        assert_eq!(pair.encrypt.processed(), 16);
        assert_eq!(pair.decrypt.processed(), 0);
    }
}
