//! # Utility Modules
//!
//! Supporting pieces shared by the protocol and service layers.
//!
//! ## Components
//! - **Logging**: `tracing` subscriber setup
//! - **Metrics**: thread-safe observability counters
//! - **Replay Cache**: TTL-bounded rejection of reused client ephemerals
//! - **Timeout**: async timeout wrappers and connection timer constants

pub mod logging;
pub mod metrics;
pub mod replay_cache;
pub mod timeout;

pub use replay_cache::{CacheKey, ReplayCache};
