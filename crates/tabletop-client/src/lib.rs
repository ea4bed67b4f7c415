//! # tabletop-client
//!
//! Client side of the tabletop sync protocol.
//!
//! - [`session`]: the single connection, envelope dispatch, login handshake, heartbeat
//! - [`board`]: per-piece ownership state machine, move throttling, reconciliation,
//!   and the trajectory interpolation engine
//! - [`client`]: the single-owner actor that serializes every board mutation

#![deny(unsafe_code)]

pub mod board;
pub mod client;
pub mod session;

pub use board::{Board, BoardConfig, HoldKind, PieceRenderer};
pub use client::{ClientEvent, ClientHandle, GameClient};
pub use session::{Session, SessionConfig, SessionListener};
