//! # Legacy Bootstrap Channel (STS)
//!
//! HTTP-like text protocol used by the launcher before the binary login:
//! SRP6 over hex-encoded key data, then RC4 keyed with the SRP session key
//! for the rest of the connection.

pub mod codec;
pub mod message;
pub mod session;

pub use codec::StsCodec;
pub use message::StsMessage;
pub use session::{StsAction, StsSession};
