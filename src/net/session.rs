//! Session management module
//!
//! Manages client sessions including:
//! - Session lifecycle (creation, tracking, cleanup)
//! - Session state machine (accepted -> reading -> dispatching -> writing -> closed)
//! - Thread-safe session registry
//! - The per-connection read/dispatch/write loop

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::error::{LinewireError, Result};
use crate::net::handler::{FrameHandler, FrameOutcome};
use crate::net::transport::Transport;
use crate::AppState;

/// Unique session identifier
pub type SessionId = u64;

/// Session state in the connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Connection accepted, loop not started yet
    Accepted,
    /// Waiting for the next frame
    Reading,
    /// Handing a frame to the router
    Dispatching,
    /// Writing a response
    Writing,
    /// Loop has exited
    Closed,
}

impl SessionState {
    /// Check if the session is still active
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Closed)
    }

    /// Get a human-readable name for the state
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Accepted => "Accepted",
            SessionState::Reading => "Reading",
            SessionState::Dispatching => "Dispatching",
            SessionState::Writing => "Writing",
            SessionState::Closed => "Closed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A connected client session
pub struct Session {
    /// Unique session identifier
    pub id: SessionId,
    /// Remote address of the client
    pub address: SocketAddr,
    /// Current session state
    state: RwLock<SessionState>,
    /// Time of session creation
    pub created_at: Instant,
    /// Time of last activity
    last_activity: RwLock<Instant>,
    /// Responses written
    frames_handled: AtomicU64,
}

impl Session {
    /// Create a new session
    pub fn new(id: SessionId, address: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            id,
            address,
            state: RwLock::new(SessionState::Accepted),
            created_at: now,
            last_activity: RwLock::new(now),
            frames_handled: AtomicU64::new(0),
        }
    }

    /// Get the IP address as a string (without port)
    pub fn ip(&self) -> String {
        self.address.ip().to_string()
    }

    /// Get the current session state
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Set the session state
    pub fn set_state(&self, new_state: SessionState) {
        let old_state = std::mem::replace(&mut *self.state.write(), new_state);
        trace!(
            session_id = self.id,
            old_state = %old_state,
            new_state = %new_state,
            "Session state changed"
        );
    }

    /// Check if session is active
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Update the last activity timestamp
    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    /// Get the last activity time
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.read()
    }

    /// Get the duration since last activity
    pub fn idle_duration(&self) -> Duration {
        self.last_activity().elapsed()
    }

    /// Number of responses written so far
    pub fn frames_handled(&self) -> u64 {
        self.frames_handled.load(Ordering::Relaxed)
    }

    fn record_frame(&self) {
        self.frames_handled.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("state", &self.state())
            .field("frames_handled", &self.frames_handled())
            .field("created_at", &self.created_at)
            .field("idle_duration", &self.idle_duration())
            .finish()
    }
}

/// Thread-safe session registry
pub struct SessionManager {
    /// Map of session ID to session
    sessions: DashMap<SessionId, Arc<Session>>,
    /// Next session ID to assign
    next_id: AtomicU64,
    /// Responses written by sessions that have since closed
    closed_frames: AtomicU64,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            closed_frames: AtomicU64::new(0),
        }
    }

    /// Create a new session and register it
    pub fn create_session(&self, address: SocketAddr) -> Arc<Session> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(Session::new(id, address));
        self.sessions.insert(id, session.clone());

        debug!(session_id = id, address = %address, "Session created");
        session
    }

    /// Remove a session
    pub fn remove(&self, id: SessionId) {
        if let Some((_, session)) = self.sessions.remove(&id) {
            self.closed_frames
                .fetch_add(session.frames_handled(), Ordering::Relaxed);
            debug!(
                session_id = id,
                frames = session.frames_handled(),
                "Session removed"
            );
        }
    }

    /// Get the count of active sessions
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Get the count of sessions per state
    pub fn count_by_state(&self) -> HashMap<SessionState, usize> {
        let mut counts = HashMap::new();
        for session in self.sessions.iter() {
            *counts.entry(session.state()).or_insert(0) += 1;
        }
        counts
    }

    /// Sessions created since startup
    pub fn total_created(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst) - 1
    }

    /// Responses written across live and closed sessions
    pub fn total_frames(&self) -> u64 {
        let live: u64 = self.sessions.iter().map(|s| s.frames_handled()).sum();
        live + self.closed_frames.load(Ordering::Relaxed)
    }

    /// Get sessions from a specific IP
    pub fn sessions_from_ip(&self, ip: &str) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|s| s.ip() == ip)
            .map(|s| s.clone())
            .collect()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes a session from the registry when the loop exits, however it exits
struct SessionGuard {
    state: Arc<AppState>,
    session: Arc<Session>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.session.set_state(SessionState::Closed);
        self.state.session_manager.remove(self.session.id);
    }
}

/// The read/dispatch/write loop for one connection
pub struct NetworkSession<S> {
    session: Arc<Session>,
    transport: Transport<S>,
    handler: FrameHandler,
    shutdown_rx: broadcast::Receiver<()>,
    running: Arc<AtomicBool>,
    guard: SessionGuard,
}

impl<S> NetworkSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Build a session loop for an already registered session
    pub fn new(
        state: Arc<AppState>,
        session: Arc<Session>,
        stream: S,
        shutdown_rx: broadcast::Receiver<()>,
        running: Arc<AtomicBool>,
    ) -> Self {
        let network = &state.config.network;
        let transport = Transport::new(
            stream,
            network.wire_mode,
            network.read_buffer_size,
            network.max_frame_size,
        );

        Self {
            session: session.clone(),
            transport,
            handler: FrameHandler::new(state.clone()),
            shutdown_rx,
            running,
            guard: SessionGuard { state, session },
        }
    }

    /// Run until EOF, an I/O error, an admission denial or shutdown.
    ///
    /// The stream is shut down and the session unregistered on every exit path.
    pub async fn run(mut self) -> Result<()> {
        info!(
            session_id = self.session.id,
            address = %self.session.address,
            "Connection accepted"
        );

        let result = self.process().await;

        if let Err(e) = self.transport.shutdown().await {
            trace!(session_id = self.session.id, error = %e, "Stream shutdown failed");
        }

        match &result {
            Ok(()) => info!(
                session_id = self.session.id,
                address = %self.session.address,
                frames = self.session.frames_handled(),
                "Connection closed"
            ),
            Err(e) => debug!(
                session_id = self.session.id,
                address = %self.session.address,
                error = %e,
                "Connection closed with error"
            ),
        }

        drop(self.guard);
        result
    }

    async fn process(&mut self) -> Result<()> {
        let ip = self.session.ip();

        loop {
            if !self.running.load(Ordering::SeqCst) {
                debug!(session_id = self.session.id, "Engine stopping, ending session");
                return Ok(());
            }

            self.session.set_state(SessionState::Reading);

            let frame = tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    debug!(session_id = self.session.id, "Shutdown signal received");
                    return Ok(());
                }
                frame = self.transport.read_frame() => frame?,
            };

            let Some(frame) = frame else {
                debug!(session_id = self.session.id, "Peer closed connection");
                return Ok(());
            };

            self.session.touch();
            self.session.set_state(SessionState::Dispatching);

            match self.handler.process(&ip, frame) {
                FrameOutcome::Ignored => continue,
                FrameOutcome::Denied => {
                    let err = LinewireError::AdmissionDenied(ip);
                    warn!(
                        session_id = self.session.id,
                        error = %err,
                        "Closing connection"
                    );
                    return Ok(());
                }
                FrameOutcome::Reply(reply) => {
                    self.session.set_state(SessionState::Writing);
                    self.transport.write_frame(reply.tag, &reply.bytes).await?;
                    self.session.record_frame();
                }
            }
        }
    }
}
