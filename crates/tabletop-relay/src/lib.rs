//! # tabletop-relay
//!
//! The peer relay for the tabletop sync protocol.
//!
//! - `GET /ws`: envelope dispatch, login, broadcast fan-out to every other connection
//! - `GET /health`: liveness and connection counters
//! - `GET /metrics`: Prometheus text
//! - the relay ledger mirrors every broadcast and answers reconciliation requests
//! - shutdown drains every session so held pieces are released before exit

#![deny(unsafe_code)]

pub mod accounts;
pub mod context;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use context::RelayContext;
pub use errors::RelayError;
pub use server::RelayServer;
