//! # tabletop-core
//!
//! Foundation types shared by the tabletop client and relay.
//!
//! - **Envelope**: the `{type, class, conveyor, time, data}` wire unit and its strict parser
//! - **Instructions**: closed [`instruction::Instruction`] / [`instruction::Broadcast`] unions over `(type, class)`
//! - **Ledger**: per-piece ownership records, move history, and reconciliation snapshots
//! - **Geometry**: [`coord::Coord3D`] with linear interpolation
//! - **Time**: the fixed `YYYY-MM-DD HH:mm:ss:SSS` timestamp format
//! - **Errors**: `thiserror` enums for envelope, ownership, and session failures
//! - **Logging**: `tracing` subscriber bootstrap and in-memory capture for tests

#![deny(unsafe_code)]

pub mod constants;
pub mod coord;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod instruction;
pub mod ledger;
pub mod logging;
pub mod time;
