//! Relay connections: per-connection state, liveness, dispatch, and fan-out.

pub mod broadcast;
pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod session;
