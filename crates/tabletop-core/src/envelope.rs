//! The envelope: one JSON object per transport frame.
//!
//! ```json
//! {"type": "broadcast", "class": "pick_up_chess", "conveyor": "<session>",
//!  "time": "2024-03-07 09:05:02:007", "data": {"piece_name": "..", "position": {..}}}
//! ```
//!
//! Parsing is all-or-nothing. [`Envelope::parse`] checks every field on the
//! raw JSON value before building the struct, so a frame that fails any
//! check never reaches a handler.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::EnvelopeError;
use crate::time;

/// Required string fields, in the order they are checked.
const STRING_FIELDS: [&str; 4] = ["type", "class", "conveyor", "time"];

/// A validated wire message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Primary discriminator (`ping`, `broadcast`, `get_login`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Sub-discriminator, meaningful when `kind == "broadcast"`.
    pub class: String,
    /// Originating session, empty for relay-originated replies.
    pub conveyor: String,
    /// Send time in the fixed wire layout.
    pub time: String,
    /// Payload whose shape is determined by `(kind, class)`.
    pub data: Value,
}

impl Envelope {
    /// Build an envelope stamped with the current time.
    pub fn new(
        kind: impl Into<String>,
        class: impl Into<String>,
        conveyor: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            kind: kind.into(),
            class: class.into(),
            conveyor: conveyor.into(),
            time: time::now_string(),
            data,
        }
    }

    /// Relay-originated envelope: empty `class` and `conveyor`.
    pub fn reply(kind: impl Into<String>, data: Value) -> Self {
        Self::new(kind, "", "", data)
    }

    /// Parse and validate raw frame text.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        if text.trim().is_empty() {
            return Err(EnvelopeError::Empty);
        }
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Validate an already-decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        let Value::Object(mut map) = value else {
            return Err(EnvelopeError::NotAnObject);
        };
        for field in STRING_FIELDS {
            if !map.get(field).is_some_and(Value::is_string) {
                return Err(EnvelopeError::MissingField(field));
            }
        }
        let data = map.remove("data").ok_or(EnvelopeError::MissingData)?;
        let time = take_string(&mut map, "time");
        if !time::is_valid_time(&time) {
            return Err(EnvelopeError::BadTimestamp(time));
        }
        Ok(Self {
            kind: take_string(&mut map, "type"),
            class: take_string(&mut map, "class"),
            conveyor: take_string(&mut map, "conveyor"),
            time,
            data,
        })
    }

    /// Serialize to a JSON frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Whether this is a peer broadcast.
    pub fn is_broadcast(&self) -> bool {
        self.kind == "broadcast"
    }

    /// `type`, or `type:class` for broadcasts. Used in logs.
    pub fn verb(&self) -> String {
        if self.is_broadcast() {
            format!("{}:{}", self.kind, self.class)
        } else {
            self.kind.clone()
        }
    }

    /// Send time, if the timestamp denotes a real local instant.
    pub fn sent_at(&self) -> Option<DateTime<Local>> {
        time::parse_time(&self.time).ok()
    }
}

fn take_string(map: &mut Map<String, Value>, field: &str) -> String {
    match map.remove(field) {
        Some(Value::String(s)) => s,
        _ => String::new(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
