//! # Protocol Layer
//!
//! Typed messages, the SRP6 login handshake, the opcode dispatcher and the
//! per-connection state machine.

pub mod dispatcher;
pub mod handshake;
pub mod message;
pub mod session;


pub use dispatcher::{Dispatcher, DispatcherBuilder, MessageHandler, Reply};
pub use message::ConnectionRole;
pub use session::{ConnectionState, Session, SessionAction, SessionContext, SessionServices};
