//! The client session: one connection, its lifecycle flags, and dispatch.
//!
//! Lifecycle:
//! - `link_up` turns on when the transport reports open and off on close or error
//! - `authenticated` turns on only after a `login` / `anonymous_login` carrying `"ok"`
//! - authentication starts the heartbeat and requests `user_data`
//! - logout or close stops the heartbeat and clears the cached identity
//!
//! No reconnection happens here. Callers decide whether and when to
//! [`Session::connect`] again.

mod dispatch;
pub mod heartbeat;
mod transport;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use tabletop_core::constants::HEARTBEAT_INTERVAL;
use tabletop_core::envelope::Envelope;
use tabletop_core::errors::SessionError;
use tabletop_core::ids::SessionId;
use tabletop_core::instruction::{
    AnonymousCredentials, Broadcast, Credentials, Instruction, ServerDescriptor, UserData,
};
use tabletop_settings::{ClientSettings, CredentialSettings};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Session parameters.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Identity stamped as `conveyor` on outbound envelopes.
    pub identity: SessionId,
    /// Heartbeat ping period.
    pub heartbeat_interval: Duration,
    /// Outbound queue depth.
    pub send_queue: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            identity: SessionId::new(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
            send_queue: 256,
        }
    }
}

impl SessionConfig {
    /// Derive from loaded settings; an empty identity generates a fresh one.
    pub fn from_settings(settings: &ClientSettings) -> Self {
        let identity = if settings.identity.is_empty() {
            SessionId::new()
        } else {
            SessionId::from(settings.identity.as_str())
        };
        Self {
            identity,
            heartbeat_interval: settings.heartbeat_interval(),
            ..Self::default()
        }
    }
}

/// Capabilities a session consumer may implement. Every method defaults to
/// a no-op.
#[cfg_attr(test, mockall::automock)]
pub trait SessionListener: Send + Sync {
    /// The transport opened.
    fn on_open(&self) {}
    /// The transport closed or failed.
    fn on_close(&self) {}
    /// A login was acknowledged.
    fn on_authenticated(&self) {}
    /// The session left the authenticated state.
    fn on_logged_out(&self) {}
    /// A peer broadcast arrived.
    fn on_broadcast(&self, _conveyor: &SessionId, _broadcast: &Broadcast) {}
    /// A valid envelope that is neither built-in nor a broadcast.
    fn on_extension(&self, _envelope: &Envelope, _instruction: &Instruction) {}
    /// Every valid envelope, before routing.
    fn on_message_observed(&self, _envelope: &Envelope) {}
}

/// Listener that ignores everything.
pub struct NoopListener;

impl SessionListener for NoopListener {}

/// Local connection state.
pub struct Session {
    config: SessionConfig,
    listener: Arc<dyn SessionListener>,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    link_up: AtomicBool,
    authenticated: AtomicBool,
    last_ping: Mutex<Option<DateTime<Local>>>,
    last_pong: Mutex<Option<DateTime<Local>>>,
    heartbeat: Mutex<Option<CancellationToken>>,
    public_key: Mutex<Option<String>>,
    server: Mutex<Option<ServerDescriptor>>,
    user: Mutex<Option<UserData>>,
}

impl Session {
    /// Create a session that is not yet connected.
    pub fn new(config: SessionConfig, listener: Arc<dyn SessionListener>) -> Arc<Self> {
        Arc::new(Self {
            config,
            listener,
            outbound: Mutex::new(None),
            link_up: AtomicBool::new(false),
            authenticated: AtomicBool::new(false),
            last_ping: Mutex::new(None),
            last_pong: Mutex::new(None),
            heartbeat: Mutex::new(None),
            public_key: Mutex::new(None),
            server: Mutex::new(None),
            user: Mutex::new(None),
        })
    }

    /// This session's `conveyor`.
    pub fn identity(&self) -> &SessionId {
        &self.config.identity
    }

    /// Whether the transport is open.
    pub fn is_link_up(&self) -> bool {
        self.link_up.load(Ordering::Acquire)
    }

    /// Whether a login has been acknowledged.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    /// Whether the heartbeat task is running.
    pub fn is_heartbeat_running(&self) -> bool {
        self.heartbeat.lock().is_some()
    }

    /// Key announced by the relay.
    pub fn public_key(&self) -> Option<String> {
        self.public_key.lock().clone()
    }

    /// Last relay descriptor received.
    pub fn server_config(&self) -> Option<ServerDescriptor> {
        self.server.lock().clone()
    }

    /// Cached identity record.
    pub fn user(&self) -> Option<UserData> {
        self.user.lock().clone()
    }

    /// Send time of the last heartbeat ping.
    pub fn last_ping(&self) -> Option<DateTime<Local>> {
        *self.last_ping.lock()
    }

    /// Timestamp carried by the last pong.
    pub fn last_pong(&self) -> Option<DateTime<Local>> {
        *self.last_pong.lock()
    }

    /// Last pong minus last ping, when both are known and ordered.
    pub fn round_trip(&self) -> Option<Duration> {
        let (ping, pong) = (self.last_ping()?, self.last_pong()?);
        (pong - ping).to_std().ok()
    }

    // ── Transport events ────────────────────────────────────────────

    /// Mark the transport open and install its outbound queue.
    pub fn on_transport_open(&self, outbound: mpsc::Sender<String>) {
        *self.outbound.lock() = Some(outbound);
        self.link_up.store(true, Ordering::Release);
        info!(identity = %self.config.identity, "session link up");
        self.listener.on_open();
    }

    /// Transport closed or failed: drop every live flag and stop the heartbeat.
    pub fn handle_close(&self) {
        let was_linked = self.link_up.swap(false, Ordering::AcqRel);
        let _ = self.outbound.lock().take();
        self.leave_authenticated();
        if was_linked {
            info!(identity = %self.config.identity, "session link down");
            self.listener.on_close();
        }
    }

    // ── Outbound ────────────────────────────────────────────────────

    /// Serialize and enqueue an envelope.
    ///
    /// Returns `false`, with nothing transmitted, when the session is not
    /// link-up, serialization fails, or the outbound queue is unavailable.
    pub fn send(&self, envelope: &Envelope) -> bool {
        match self.try_send(envelope) {
            Ok(()) => true,
            Err(SessionError::NotLinked) => {
                debug!(verb = %envelope.verb(), "send skipped: session not link-up");
                false
            }
            Err(e @ SessionError::Serialize(_)) => {
                error!(verb = %envelope.verb(), error = %e, "send failed");
                false
            }
            Err(e) => {
                warn!(verb = %envelope.verb(), error = %e, "send failed");
                false
            }
        }
    }

    fn try_send(&self, envelope: &Envelope) -> Result<(), SessionError> {
        if !self.is_link_up() {
            return Err(SessionError::NotLinked);
        }
        let text = envelope.to_json()?;
        let guard = self.outbound.lock();
        let tx = guard.as_ref().ok_or(SessionError::NotLinked)?;
        tx.try_send(text)
            .map_err(|_| SessionError::QueueUnavailable)
    }

    /// Stamp an instruction with this session's identity and send it.
    pub fn send_instruction(&self, instruction: &Instruction) -> bool {
        self.send(&instruction.to_envelope(self.identity()))
    }

    /// Send a broadcast.
    pub fn broadcast(&self, broadcast: Broadcast) -> bool {
        self.send_instruction(&Instruction::Broadcast(broadcast))
    }

    /// Send a heartbeat ping. The send time is recorded only if it was queued.
    pub fn ping(&self) -> bool {
        let sent_at = Local::now();
        let sent = self.send_instruction(&Instruction::Ping);
        if sent {
            *self.last_ping.lock() = Some(sent_at);
        }
        sent
    }

    // ── Handshake ───────────────────────────────────────────────────

    /// Account login.
    pub fn login(&self, email: &str, password: &str) -> bool {
        self.send_instruction(&Instruction::GetLogin(Credentials {
            email: email.to_owned(),
            password: password.to_owned(),
        }))
    }

    /// Anonymous login.
    pub fn anonymous_login(&self, email: &str) -> bool {
        self.send_instruction(&Instruction::GetAnonymousLogin(AnonymousCredentials {
            email: email.to_owned(),
        }))
    }

    /// Log in with configured credentials.
    pub fn login_with(&self, credentials: &CredentialSettings) -> bool {
        match credentials {
            CredentialSettings::Anonymous { email } => self.anonymous_login(email),
            CredentialSettings::Account { email, password } => self.login(email, password),
        }
    }

    /// Leave the authenticated state locally.
    pub fn logout(self: &Arc<Self>) {
        self.set_authenticated(false);
    }

    /// Ask the relay for its public key.
    pub fn request_public_key(&self) -> bool {
        self.send_instruction(&Instruction::GetPublicKey)
    }

    /// Ask the relay for its descriptor.
    pub fn request_server_config(&self) -> bool {
        self.send_instruction(&Instruction::GetServerConfig)
    }

    /// Ask for the bound identity record.
    pub fn request_user_data(&self) -> bool {
        self.send_instruction(&Instruction::GetUserData)
    }

    /// Ask for a reconciliation snapshot.
    pub fn request_sync(&self) -> bool {
        self.send_instruction(&Instruction::GetSyncPieces)
    }

    // ── Authentication state ────────────────────────────────────────

    fn set_authenticated(self: &Arc<Self>, authenticated: bool) {
        if authenticated {
            let _ = self.authenticated.swap(true, Ordering::AcqRel);
            self.start_heartbeat();
            let _ = self.request_user_data();
            info!(identity = %self.config.identity, "session authenticated");
            self.listener.on_authenticated();
        } else {
            self.leave_authenticated();
        }
    }

    fn leave_authenticated(&self) {
        let was = self.authenticated.swap(false, Ordering::AcqRel);
        self.stop_heartbeat();
        let _ = self.user.lock().take();
        if was {
            info!(identity = %self.config.identity, "session logged out");
            self.listener.on_logged_out();
        }
    }

    fn start_heartbeat(self: &Arc<Self>) {
        let token = CancellationToken::new();
        if let Some(previous) = self.heartbeat.lock().replace(token.clone()) {
            previous.cancel();
        }
        let _ = tokio::spawn(heartbeat::run_heartbeat(
            Arc::downgrade(self),
            self.config.heartbeat_interval,
            token,
        ));
        debug!(interval_ms = self.config.heartbeat_interval.as_millis(), "heartbeat started");
    }

    fn stop_heartbeat(&self) {
        if let Some(token) = self.heartbeat.lock().take() {
            token.cancel();
            debug!("heartbeat stopped");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(token) = self.heartbeat.get_mut().take() {
            token.cancel();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
