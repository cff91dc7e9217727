//! # Error Types
//!
//! Error handling for the realm wire protocol.
//!
//! Every fallible operation in the crate returns [`Result`], an alias over
//! [`ProtocolError`]. Errors are recovered at the connection-actor boundary:
//! they decide whether a connection keeps running or is moved to
//! `Disconnected`, but they never take down the listener or other connections.
//!
//! ## Error Categories
//! - **Decode**: truncated bit streams, malformed or oversized frames
//! - **Cipher**: short key tables, key-table index overflow
//! - **Handshake**: bad public values, evidence mismatch, stale tickets
//! - **I/O**: socket failures, split into transient closes and everything else
//! - **Dispatch**: opcodes nobody handles
//!
//! ## Example Usage
//! ```rust
//! use realm_protocol::error::{ProtocolError, Result};
//! use tracing::{debug, warn};
//!
//! fn classify(result: Result<()>) {
//!     match result {
//!         Ok(()) => {}
//!         Err(ProtocolError::UnknownOpcode(opcode)) => debug!(opcode, "Skipping frame"),
//!         Err(e) if e.is_fatal() => warn!(error = %e, "Disconnecting"),
//!         Err(e) => warn!(error = %e, "Recovered"),
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Frame and stream decoding
    pub const ERR_FRAME_TOO_SHORT: &str = "Frame length shorter than opcode";
    pub const ERR_ENVELOPE_LENGTH: &str = "Envelope length header does not match payload";
    pub const ERR_ENVELOPE_WITHOUT_CIPHER: &str = "Encrypted envelope received without a cipher";
    pub const ERR_STRING_TOO_LONG: &str = "Wide string exceeds 15-bit length prefix";
    pub const ERR_INVALID_UTF16: &str = "Wide string is not valid UTF-16";

    /// Handshake
    pub const ERR_NO_PENDING_HANDSHAKE: &str = "No handshake in progress";
    pub const ERR_UNKNOWN_ACCOUNT: &str = "Unknown account";
    pub const ERR_TICKET_REJECTED: &str = "Session ticket rejected";
    pub const ERR_REPLAYED_PUBLIC: &str = "Client public value replayed";
    pub const ERR_SERVER_PROOF: &str = "Server evidence mismatch";

    /// Legacy bootstrap
    pub const ERR_STS_HEADER: &str = "Malformed bootstrap header";
    pub const ERR_STS_LENGTH: &str = "Missing or invalid body length header";
    pub const ERR_STS_ELEMENT: &str = "Missing element in bootstrap body";
    pub const ERR_STS_MARKUP: &str = "Markup characters in bootstrap login name";

    /// Shared state
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";
    pub const ERR_RANDOM_SOURCE: &str = "Operating system random source failed";
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Unexpected end of buffer: needed {needed} bits, {available} available")]
    UnexpectedEof { needed: usize, available: usize },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("Cipher key table too short: {0} bytes")]
    KeyTooShort(usize),

    #[error("Cipher key table index out of bounds: {0}")]
    KeyIndexOutOfBounds(usize),

    #[error("Invalid public ephemeral value")]
    InvalidPublicKey,

    #[error("Invalid proof")]
    InvalidProof,

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Unknown opcode: {0:#06x}")]
    UnknownOpcode(u16),

    #[error("Unexpected message type")]
    UnexpectedMessage,

    #[error("Bootstrap protocol error: {0}")]
    Sts(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Connection timed out (no activity)")]
    ConnectionTimeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// I/O failures that mean the peer simply went away.
    ///
    /// These disconnect silently; every other I/O error is logged once.
    pub fn is_transient_disconnect(&self) -> bool {
        match self {
            ProtocolError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::NotConnected
            ),
            ProtocolError::ConnectionClosed => true,
            _ => false,
        }
    }

    /// Whether the connection actor must move to `Disconnected` after this error.
    ///
    /// Cipher, handshake and dispatch errors are recovered in place.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_)
                | ProtocolError::UnexpectedEof { .. }
                | ProtocolError::Decode(_)
                | ProtocolError::OversizedFrame(_)
                | ProtocolError::Sts(_)
                | ProtocolError::ConnectionClosed
                | ProtocolError::Timeout
                | ProtocolError::ConnectionTimeout
        )
    }

    /// Handshake failures, which all collapse into one uniform denial on the wire.
    pub fn is_handshake_failure(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidPublicKey
                | ProtocolError::InvalidProof
                | ProtocolError::HandshakeError(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_io_classification() {
        let reset = ProtocolError::Io(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(reset.is_transient_disconnect());
        assert!(reset.is_fatal());

        let denied = ProtocolError::Io(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!denied.is_transient_disconnect());
        assert!(denied.is_fatal());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(!ProtocolError::KeyTooShort(12).is_fatal());
        assert!(!ProtocolError::UnknownOpcode(0x1234).is_fatal());
        assert!(!ProtocolError::InvalidProof.is_fatal());
        assert!(ProtocolError::InvalidProof.is_handshake_failure());
        assert!(ProtocolError::Decode("bad".into()).is_fatal());
    }

    #[test]
    fn test_invalid_proof_message_has_no_detail() {
        assert_eq!(ProtocolError::InvalidProof.to_string(), "Invalid proof");
    }
}
