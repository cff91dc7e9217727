//! # Core Protocol Components
//!
//! Low-level bit serialization, opcodes, framing and the tokio codec.
//!
//! ## Components
//! - **Bitstream**: little-endian bit cursor with the open-packet writer
//! - **Opcode**: the closed set of known packet types
//! - **Frame**: length-prefixed frames and encrypted envelopes
//! - **Codec**: Tokio codec extracting frames from a byte stream
//!
//! ## Wire Format
//! ```text
//! [Length u32 LE] [Opcode u16 LE] [Payload (Length - 2)]
//! ```
//!
//! ## Security
//! - Maximum frame size enforced before buffering (prevents memory exhaustion)
//! - Length validation before allocation

pub mod bitstream;
pub mod codec;
pub mod frame;
pub mod opcode;

pub use codec::FrameCodec;
pub use frame::{Frame, Message};
pub use opcode::Opcode;
