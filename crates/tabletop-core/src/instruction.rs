//! Typed view of an [`Envelope`]: a closed union over `(type, class)`.
//!
//! [`Instruction::from_envelope`] is the only place where string tags are
//! matched. Unknown `type`s fall through to [`Instruction::Extension`] and
//! unknown broadcast classes to [`Broadcast::Other`]. A known tag whose
//! payload does not decode is an error, never an extension.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::constants::{LOGIN_NO, LOGIN_OK};
use crate::coord::Coord3D;
use crate::envelope::Envelope;
use crate::errors::EnvelopeError;

/// Envelope `type` values.
pub mod kind {
    /// Heartbeat request.
    pub const PING: &str = "ping";
    /// Heartbeat reply.
    pub const PONG: &str = "pong";
    /// Public key request.
    pub const GET_PUBLIC_KEY: &str = "get_publickey";
    /// Public key reply.
    pub const PUBLIC_KEY: &str = "publickey";
    /// Account login request.
    pub const GET_LOGIN: &str = "get_login";
    /// Account login reply.
    pub const LOGIN: &str = "login";
    /// Anonymous login request.
    pub const GET_ANONYMOUS_LOGIN: &str = "get_anonymous_login";
    /// Anonymous login reply.
    pub const ANONYMOUS_LOGIN: &str = "anonymous_login";
    /// Server descriptor request.
    pub const GET_SERVER_CONFIG: &str = "get_server_config";
    /// Server descriptor reply.
    pub const SERVER_CONFIG: &str = "server_config";
    /// Identity refresh request.
    pub const GET_USER_DATA: &str = "get_user_data";
    /// Identity refresh reply.
    pub const USER_DATA: &str = "user_data";
    /// Reconciliation request.
    pub const GET_SYNC_PIECES: &str = "get_sync_chess_pieces";
    /// Reconciliation snapshot.
    pub const SYNC_PIECES: &str = "sync_chess_pieces";
    /// Peer broadcast, discriminated further by `class`.
    pub const BROADCAST: &str = "broadcast";
    /// Relay diagnostic.
    pub const ERROR: &str = "error";
}

/// Broadcast `class` values.
pub mod class {
    /// A session took hold of a piece.
    pub const PICK_UP: &str = "pick_up_chess";
    /// A session released a piece.
    pub const PICK_DOWN: &str = "pick_down_chess";
    /// Trailing path of a held piece.
    pub const MOVING: &str = "moving_chess";
    /// Every piece back to the origin, unheld.
    pub const RESET_ALL: &str = "reset_all_chess_pieces";
    /// A session entered the game.
    pub const USER_JOIN: &str = "user_join_game";
    /// A session left the game.
    pub const USER_LEFT: &str = "user_left_game";
}

// ─────────────────────────────────────────────────────────────────────────────
// Payloads
// ─────────────────────────────────────────────────────────────────────────────

/// `{piece_name, position}` carried by pick up / pick down.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PiecePosition {
    /// Piece name.
    pub piece_name: String,
    /// Position at the moment of the transition.
    pub position: Coord3D,
}

/// `{piece_name, trajectory}` carried by `moving_chess`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PieceTrajectory {
    /// Piece name.
    pub piece_name: String,
    /// Waypoints in sampling order.
    pub trajectory: Vec<Coord3D>,
}

/// One entry of a reconciliation snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PieceSyncData {
    /// Piece name.
    pub piece_name: String,
    /// Last known position.
    pub position: Coord3D,
    /// Whether some session holds the piece.
    pub is_picked: bool,
    /// Holder's session id, empty when free.
    #[serde(default)]
    pub picked_by: String,
}

#[derive(Serialize, Deserialize)]
struct SyncPayload {
    pieces: Vec<PieceSyncData>,
}

/// Account credentials for `get_login`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Account email.
    pub email: String,
    /// Account password.
    pub password: String,
}

/// Payload for `get_anonymous_login`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymousCredentials {
    /// Self-declared email.
    pub email: String,
}

/// Outcome carried by `login` and `anonymous_login`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoginStatus {
    /// The literal success token.
    Accepted,
    /// Any other string.
    Rejected,
}

impl LoginStatus {
    /// Wire token.
    pub fn as_token(self) -> &'static str {
        match self {
            Self::Accepted => LOGIN_OK,
            Self::Rejected => LOGIN_NO,
        }
    }

    fn decode(verb: &str, data: &Value) -> Result<Self, EnvelopeError> {
        match data {
            Value::String(s) if s == LOGIN_OK => Ok(Self::Accepted),
            Value::String(_) => Ok(Self::Rejected),
            other => Err(EnvelopeError::BadPayload {
                verb: verb.to_owned(),
                reason: format!("expected status string, got {other}"),
            }),
        }
    }
}

/// Relay capability descriptor returned by `get_server_config`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerDescriptor {
    /// Relay version.
    pub version: String,
    /// Whether anonymous login is accepted.
    pub anonymous_login: bool,
    /// Relay key.
    pub key: String,
    /// Public URL.
    pub url: String,
    /// Display name.
    pub name: String,
    /// Currently authenticated connections.
    pub online_number: u32,
    /// Capacity.
    pub max_online: u32,
}

/// Identity record returned by `get_user_data`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserData {
    /// Account id, zero for placeholders.
    pub id: u64,
    /// Whether this identity came from an anonymous login.
    pub anonymous_user: bool,
    /// Email.
    pub email: String,
    /// Never populated by the relay.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Display name.
    pub name: String,
    /// QQ number.
    pub qq: u64,
    /// UI theme color.
    pub theme_color: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Broadcast
// ─────────────────────────────────────────────────────────────────────────────

/// Peer-to-peer broadcast, keyed by `class`.
#[derive(Clone, Debug, PartialEq)]
pub enum Broadcast {
    /// `pick_up_chess`.
    PickUp(PiecePosition),
    /// `pick_down_chess`.
    PickDown(PiecePosition),
    /// `moving_chess`.
    Moving(PieceTrajectory),
    /// `reset_all_chess_pieces`.
    ResetAll,
    /// `user_join_game`.
    UserJoined,
    /// `user_left_game`.
    UserLeft,
    /// Any other class, carried opaquely.
    Other {
        /// Broadcast class.
        class: String,
        /// Raw payload.
        data: Value,
    },
}

impl Broadcast {
    /// Wire `class`.
    pub fn class(&self) -> &str {
        match self {
            Self::PickUp(_) => class::PICK_UP,
            Self::PickDown(_) => class::PICK_DOWN,
            Self::Moving(_) => class::MOVING,
            Self::ResetAll => class::RESET_ALL,
            Self::UserJoined => class::USER_JOIN,
            Self::UserLeft => class::USER_LEFT,
            Self::Other { class, .. } => class,
        }
    }

    /// Piece addressed by this broadcast, if any.
    pub fn piece_name(&self) -> Option<&str> {
        match self {
            Self::PickUp(p) | Self::PickDown(p) => Some(&p.piece_name),
            Self::Moving(t) => Some(&t.piece_name),
            _ => None,
        }
    }

    /// Wire payload.
    pub fn data(&self) -> Value {
        match self {
            Self::PickUp(p) | Self::PickDown(p) => json!(p),
            Self::Moving(t) => json!(t),
            Self::ResetAll | Self::UserJoined | Self::UserLeft => json!(""),
            Self::Other { data, .. } => data.clone(),
        }
    }

    /// Decode a broadcast payload by class.
    pub fn decode(name: &str, data: &Value) -> Result<Self, EnvelopeError> {
        let verb = || format!("{}:{name}", kind::BROADCAST);
        Ok(match name {
            class::PICK_UP => Self::PickUp(decode(&verb(), data)?),
            class::PICK_DOWN => Self::PickDown(decode(&verb(), data)?),
            class::MOVING => Self::Moving(decode(&verb(), data)?),
            class::RESET_ALL => Self::ResetAll,
            class::USER_JOIN => Self::UserJoined,
            class::USER_LEFT => Self::UserLeft,
            other => Self::Other {
                class: other.to_owned(),
                data: data.clone(),
            },
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Instruction
// ─────────────────────────────────────────────────────────────────────────────

/// Every envelope `type` the protocol understands.
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    /// Heartbeat request.
    Ping,
    /// Heartbeat reply.
    Pong,
    /// Ask the relay for its public key.
    GetPublicKey,
    /// The relay's public key.
    PublicKey(String),
    /// Account login.
    GetLogin(Credentials),
    /// Account login outcome.
    Login(LoginStatus),
    /// Anonymous login.
    GetAnonymousLogin(AnonymousCredentials),
    /// Anonymous login outcome.
    AnonymousLogin(LoginStatus),
    /// Ask for the relay descriptor.
    GetServerConfig,
    /// Relay descriptor.
    ServerConfig(ServerDescriptor),
    /// Ask for the bound identity.
    GetUserData,
    /// Bound identity.
    UserData(UserData),
    /// Ask for a reconciliation snapshot.
    GetSyncPieces,
    /// Reconciliation snapshot.
    SyncPieces(Vec<PieceSyncData>),
    /// Peer broadcast.
    Broadcast(Broadcast),
    /// Relay diagnostic.
    Error(Value),
    /// Any `type` not listed above.
    Extension {
        /// Envelope `type`.
        kind: String,
        /// Envelope `class`.
        class: String,
        /// Raw payload.
        data: Value,
    },
}

impl Instruction {
    /// Wire `type`.
    pub fn kind(&self) -> &str {
        match self {
            Self::Ping => kind::PING,
            Self::Pong => kind::PONG,
            Self::GetPublicKey => kind::GET_PUBLIC_KEY,
            Self::PublicKey(_) => kind::PUBLIC_KEY,
            Self::GetLogin(_) => kind::GET_LOGIN,
            Self::Login(_) => kind::LOGIN,
            Self::GetAnonymousLogin(_) => kind::GET_ANONYMOUS_LOGIN,
            Self::AnonymousLogin(_) => kind::ANONYMOUS_LOGIN,
            Self::GetServerConfig => kind::GET_SERVER_CONFIG,
            Self::ServerConfig(_) => kind::SERVER_CONFIG,
            Self::GetUserData => kind::GET_USER_DATA,
            Self::UserData(_) => kind::USER_DATA,
            Self::GetSyncPieces => kind::GET_SYNC_PIECES,
            Self::SyncPieces(_) => kind::SYNC_PIECES,
            Self::Broadcast(_) => kind::BROADCAST,
            Self::Error(_) => kind::ERROR,
            Self::Extension { kind, .. } => kind,
        }
    }

    /// Decode a validated envelope.
    pub fn from_envelope(env: &Envelope) -> Result<Self, EnvelopeError> {
        let data = &env.data;
        let verb = env.kind.as_str();
        Ok(match verb {
            kind::PING => Self::Ping,
            kind::PONG => Self::Pong,
            kind::GET_PUBLIC_KEY => Self::GetPublicKey,
            kind::PUBLIC_KEY => Self::PublicKey(decode(verb, data)?),
            kind::GET_LOGIN => Self::GetLogin(decode(verb, data)?),
            kind::LOGIN => Self::Login(LoginStatus::decode(verb, data)?),
            kind::GET_ANONYMOUS_LOGIN => Self::GetAnonymousLogin(decode(verb, data)?),
            kind::ANONYMOUS_LOGIN => Self::AnonymousLogin(LoginStatus::decode(verb, data)?),
            kind::GET_SERVER_CONFIG => Self::GetServerConfig,
            kind::SERVER_CONFIG => Self::ServerConfig(decode(verb, data)?),
            kind::GET_USER_DATA => Self::GetUserData,
            kind::USER_DATA => Self::UserData(decode(verb, data)?),
            kind::GET_SYNC_PIECES => Self::GetSyncPieces,
            kind::SYNC_PIECES => Self::SyncPieces(decode::<SyncPayload>(verb, data)?.pieces),
            kind::BROADCAST => Self::Broadcast(Broadcast::decode(&env.class, data)?),
            kind::ERROR => Self::Error(data.clone()),
            _ => Self::Extension {
                kind: env.kind.clone(),
                class: env.class.clone(),
                data: data.clone(),
            },
        })
    }

    /// Wire payload.
    pub fn data(&self) -> Value {
        match self {
            Self::Ping
            | Self::Pong
            | Self::GetPublicKey
            | Self::GetServerConfig
            | Self::GetUserData
            | Self::GetSyncPieces => json!(""),
            Self::PublicKey(key) => json!(key),
            Self::GetLogin(c) => json!(c),
            Self::GetAnonymousLogin(c) => json!(c),
            Self::Login(s) | Self::AnonymousLogin(s) => json!(s.as_token()),
            Self::ServerConfig(d) => json!(d),
            Self::UserData(u) => json!(u),
            Self::SyncPieces(pieces) => json!({ "pieces": pieces }),
            Self::Broadcast(b) => b.data(),
            Self::Error(data) | Self::Extension { data, .. } => data.clone(),
        }
    }

    /// Build an envelope stamped with `conveyor` and the current time.
    pub fn to_envelope(&self, conveyor: &str) -> Envelope {
        let class = match self {
            Self::Broadcast(b) => b.class(),
            Self::Extension { class, .. } => class,
            _ => "",
        };
        Envelope::new(self.kind(), class, conveyor, self.data())
    }
}

impl From<Broadcast> for Instruction {
    fn from(b: Broadcast) -> Self {
        Self::Broadcast(b)
    }
}

fn decode<T: DeserializeOwned>(verb: &str, data: &Value) -> Result<T, EnvelopeError> {
    T::deserialize(data).map_err(|e| EnvelopeError::BadPayload {
        verb: verb.to_owned(),
        reason: e.to_string(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
