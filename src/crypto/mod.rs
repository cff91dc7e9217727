//! # Cryptography
//!
//! - **Packet cipher**: custom XOR stream cipher for auth and realm frames
//! - **SRP6**: zero-knowledge login proof producing the shared session key
//! - **Legacy cipher (RC4)**: keystream for the legacy text bootstrap channel
//!
//! Secret material (ephemerals, session keys, key tables) is zeroized on drop.

pub mod legacy_cipher;
pub mod packet_cipher;
pub mod srp6;

pub use packet_cipher::{CipherPair, PacketCipher};
pub use srp6::{HandshakeSession, SrpClient};
