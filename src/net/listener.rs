//! TCP listener
//!
//! Owns the listening socket and the background loops of one service. Each
//! accepted connection passes the admission gate and the connection cap before
//! it gets a session task; either rejection closes the socket immediately.
//!
//! One broadcast channel carries the shutdown signal to the accept loop, the
//! admission cleanup loop, the status loop and every session. A shared running
//! flag covers sessions that subscribe after the signal was sent.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::MAX_CONNECTIONS;
use crate::error::{NetworkError, Result, StartupError};
use crate::net::session::NetworkSession;
use crate::AppState;

/// Tasks owned by a started listener
struct RunningListener {
    local_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

/// Accepts connections and runs a session for each
pub struct Listener {
    state: Arc<AppState>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    connections: Arc<Semaphore>,
    max_connections: usize,
    inner: Mutex<Option<RunningListener>>,
}

impl Listener {
    pub fn new(state: Arc<AppState>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let max_connections = state.config.network.max_connections.min(MAX_CONNECTIONS);

        Self {
            state,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            connections: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            inner: Mutex::new(None),
        }
    }

    /// Shared engine state
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Bind `port` on the configured address and start accepting.
    ///
    /// Returns the bound address, which differs from the request when `port` is 0.
    pub async fn start(&self, port: u16) -> Result<SocketAddr> {
        let mut inner = self.inner.lock().await;
        if inner.is_some() {
            return Err(StartupError::AlreadyRunning.into());
        }

        let addr = format!("{}:{}", self.state.config.bind_address, port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| StartupError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        self.running.store(true, Ordering::SeqCst);

        // Subscribe before spawning so a stop issued right away is not missed
        let mut tasks = Vec::with_capacity(3);
        tasks.push(tokio::spawn(accept_loop(
            listener,
            self.state.clone(),
            self.connections.clone(),
            self.running.clone(),
            self.shutdown_tx.clone(),
            self.shutdown_tx.subscribe(),
        )));
        tasks.push(
            self.state
                .admission
                .clone()
                .spawn_cleanup_task(self.shutdown_tx.subscribe()),
        );

        let status_interval = self.state.config.network.status_interval_secs;
        if status_interval > 0 {
            tasks.push(spawn_status_task(
                self.state.clone(),
                Duration::from_secs(status_interval),
                self.shutdown_tx.subscribe(),
            ));
        }

        info!(
            service = %self.state.config.service,
            address = %local_addr,
            max_connections = self.max_connections,
            "Listening"
        );

        *inner = Some(RunningListener { local_addr, tasks });
        Ok(local_addr)
    }

    /// Stop accepting, signal every session and wait for them within the grace period.
    ///
    /// Does nothing when the listener is not running.
    pub async fn stop(&self) -> Result<()> {
        // Held until the end so a concurrent start waits for the teardown
        let mut inner = self.inner.lock().await;
        let Some(running) = inner.take() else {
            return Ok(());
        };

        info!(address = %running.local_addr, "Stopping listener");
        self.running.store(false, Ordering::SeqCst);
        // No receivers just means nothing is left to signal
        let _ = self.shutdown_tx.send(());

        for task in running.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Background task failed");
            }
        }

        // Sessions hold one permit each; all permits back means all sessions ended
        let grace = Duration::from_secs(self.state.config.network.shutdown_grace_secs);
        let permits = u32::try_from(self.max_connections).unwrap_or(u32::MAX);
        match tokio::time::timeout(grace, self.connections.acquire_many(permits)).await {
            Ok(Ok(_all)) => debug!("All sessions finished"),
            Ok(Err(e)) => warn!(error = %e, "Connection semaphore closed"),
            Err(_) => warn!(
                remaining = self.state.session_manager.count(),
                "Sessions still running after shutdown grace period"
            ),
        }

        info!("Listener stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Bound address while running
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Number of live sessions
    pub fn active_sessions(&self) -> usize {
        self.state.session_manager.count()
    }
}

/// Accept incoming connections until shutdown
async fn accept_loop(
    listener: TcpListener,
    state: Arc<AppState>,
    connections: Arc<Semaphore>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    while running.load(Ordering::SeqCst) {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        admit(stream, addr, &state, &connections, &running, &shutdown_tx);
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Connection acceptor shutting down");
                break;
            }
        }
    }
}

/// Gate one connection and spawn its session
fn admit(
    stream: TcpStream,
    addr: SocketAddr,
    state: &Arc<AppState>,
    connections: &Arc<Semaphore>,
    running: &Arc<AtomicBool>,
    shutdown_tx: &broadcast::Sender<()>,
) {
    let ip = addr.ip().to_string();

    if !state.admission.allow(&ip) {
        warn!(address = %addr, "Connection rejected by admission control");
        return;
    }

    let permit = match connections.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            let err = NetworkError::TooManyConnections(ip);
            warn!(address = %addr, error = %err, "Connection rejected");
            return;
        }
    };

    if state.config.network.nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(address = %addr, error = %e, "Failed to set TCP_NODELAY");
        }
    }

    let session = state.session_manager.create_session(addr);
    let network_session = NetworkSession::new(
        state.clone(),
        session,
        stream,
        shutdown_tx.subscribe(),
        running.clone(),
    );

    tokio::spawn(async move {
        let _permit = permit;
        if let Err(e) = network_session.run().await {
            warn!(address = %addr, error = %e, "Connection error");
        }
    });
}

/// Periodically log engine counters until shutdown
fn spawn_status_task(
    state: Arc<AppState>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    info!(
                        service = %state.config.service,
                        active_sessions = state.session_manager.count(),
                        tracked_addresses = state.admission.tracked_addresses(),
                        total_sessions = state.session_manager.total_created(),
                        total_frames = state.session_manager.total_frames(),
                        "Engine status"
                    );
                }
                _ = shutdown_rx.recv() => {
                    debug!("Status task shutting down");
                    break;
                }
            }
        }
    })
}
