//! # Service Layer
//!
//! Async runtime around the sans-io sessions: connection actors, the
//! listener loop and reference clients.
//!
//! ## Components
//! - **Connection**: per-socket actor executing session actions in order
//! - **Server**: listeners, connection limit and graceful shutdown
//! - **Client**: client halves of the binary and bootstrap protocols

pub mod client;
pub mod connection;
pub mod server;

pub use client::{GameClient, StsClient};
pub use server::{start_server, start_server_with_shutdown, BoundAddresses, Server};
