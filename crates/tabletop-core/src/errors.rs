//! Error types for the tabletop protocol.
//!
//! Every failure in this protocol is handled at the boundary where it
//! occurs: envelopes are dropped, sends report `false`, ownership conflicts
//! turn into no-ops. These enums exist so that each boundary can log a
//! precise reason before degrading.

use thiserror::Error;

use crate::ids::SessionId;

/// Why an inbound frame was rejected before dispatch.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The frame was empty or whitespace.
    #[error("empty frame")]
    Empty,
    /// The frame was not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The frame parsed but was not a JSON object.
    #[error("envelope is not a JSON object")]
    NotAnObject,
    /// A required string field was absent or not a string.
    #[error("field `{0}` is missing or not a string")]
    MissingField(&'static str),
    /// The `data` field was absent.
    #[error("field `data` is missing")]
    MissingData,
    /// The `time` field did not match `YYYY-MM-DD HH:mm:ss:SSS`.
    #[error("malformed timestamp `{0}`")]
    BadTimestamp(String),
    /// A known verb carried a payload of the wrong shape.
    #[error("payload for `{verb}` does not decode: {reason}")]
    BadPayload {
        /// `type` or `type:class` of the offending envelope.
        verb: String,
        /// Decoder message.
        reason: String,
    },
}

/// Local refusal of an ownership transition.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OwnershipError {
    /// The last known record shows another session holding the piece.
    #[error("piece `{piece}` is held by `{holder}`")]
    HeldByOther {
        /// Piece name.
        piece: String,
        /// Recorded holder.
        holder: SessionId,
    },
    /// A move or place was attempted without a local hold on the piece.
    #[error("not holding piece `{0}`")]
    NotHolding(String),
    /// A pick was attempted while another piece is already held locally.
    #[error("already holding piece `{0}`")]
    AlreadyHolding(String),
    /// The rendering layer has no object with this name.
    #[error("unknown piece `{0}`")]
    UnknownPiece(String),
}

/// Session-level failures.
#[derive(Debug, Error)]
pub enum SessionError {
    /// `send` was called before the transport opened or after it closed.
    #[error("session is not link-up")]
    NotLinked,
    /// The envelope could not be serialized.
    #[error("failed to serialize envelope: {0}")]
    Serialize(#[from] serde_json::Error),
    /// The outbound queue is closed or full.
    #[error("outbound queue unavailable")]
    QueueUnavailable,
    /// The transport failed to open.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Failure to parse a wire timestamp.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TimeFormatError {
    /// The string does not have the fixed-width shape.
    #[error("timestamp `{0}` does not match YYYY-MM-DD HH:mm:ss:SSS")]
    Pattern(String),
    /// The shape matched but the calendar values are impossible.
    #[error("timestamp `{0}` is out of range")]
    OutOfRange(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
