//! # realm-protocol
//!
//! Server-side wire stack for a realm/auth game service: bit-packed packet
//! serialization, a custom XOR packet cipher, SRP6 login, the legacy RC4
//! bootstrap channel, and the per-connection state machine that ties them
//! together on tokio.
//!
//! ## Layers
//! - [`core`]: bitstream, opcodes, frames and the tokio codec
//! - [`crypto`]: packet cipher, SRP6 and the RC4 wrapper
//! - [`protocol`]: typed messages, login handshake, dispatcher, session
//! - [`sts`]: the text bootstrap channel
//! - [`service`]: connection actors, listeners and reference clients
//!
//! Sessions are sans-io: they turn inbound frames into ordered
//! [`protocol::SessionAction`]s, and the connection actor executes them.
//!
//! ```no_run
//! use std::sync::Arc;
//! use realm_protocol::config::NetworkConfig;
//! use realm_protocol::protocol::Dispatcher;
//! use realm_protocol::service::start_server;
//! use realm_protocol::store::MemoryAccountStore;
//!
//! # async fn run() -> realm_protocol::error::Result<()> {
//! let config = NetworkConfig::from_file("realm.toml")?;
//! let store = Arc::new(MemoryAccountStore::new(config.session.ticket_ttl));
//! store.register("player@example.com", "hunter2")?;
//! start_server(config, store, Dispatcher::default()).await
//! # }
//! ```

pub mod config;
pub mod core;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod service;
pub mod store;
pub mod sts;
pub mod utils;

pub use crate::config::NetworkConfig;
pub use crate::error::{ProtocolError, Result};
