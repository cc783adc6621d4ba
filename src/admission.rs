//! Per-address admission control
//!
//! A fixed-window request counter keyed by source address. Each address gets
//! its own window guarded by its own lock, so traffic from unrelated addresses
//! never contends on a shared mutex. The table itself is a `DashMap`.
//!
//! Windows reset lazily: the first request after `window` has elapsed starts a
//! new window with a count of one. Idle windows are dropped once they are older
//! than twice the window duration, either opportunistically from `allow` (at
//! most once per cleanup interval) or by the background cleanup task.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::AdmissionConfig;

/// Default interval between opportunistic cleanups (5 minutes)
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Windows older than this multiple of the window duration are dropped
const CLEANUP_MULTIPLIER: u32 = 2;

/// Shortest period the background cleanup loop ticks at
const MIN_CLEANUP_PERIOD: Duration = Duration::from_secs(1);

/// Request counter for one source address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressWindow {
    /// Requests admitted in the current window
    pub count: u32,
    /// Start of the current window
    pub window_start: Instant,
}

impl AddressWindow {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }
}

/// Fixed-window admission controller
pub struct AdmissionController {
    /// Maximum admitted requests per window
    max_requests: u32,
    /// Window duration
    window: Duration,
    /// Minimum time between opportunistic cleanups
    cleanup_interval: Duration,
    /// Address -> window
    windows: DashMap<String, Arc<Mutex<AddressWindow>>>,
    /// Time of the last cleanup pass
    last_cleanup: Mutex<Instant>,
}

impl AdmissionController {
    /// Create a controller admitting `max_requests` per `window`
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self::with_cleanup_interval(max_requests, window, DEFAULT_CLEANUP_INTERVAL)
    }

    /// Create a controller with a custom cleanup interval
    pub fn with_cleanup_interval(
        max_requests: u32,
        window: Duration,
        cleanup_interval: Duration,
    ) -> Self {
        Self {
            max_requests,
            window,
            cleanup_interval,
            windows: DashMap::new(),
            last_cleanup: Mutex::new(Instant::now()),
        }
    }

    /// Create a controller from configuration
    pub fn from_config(config: &AdmissionConfig, max_requests: u32) -> Self {
        Self::with_cleanup_interval(
            max_requests,
            Duration::from_secs(config.window_secs),
            Duration::from_secs(config.cleanup_interval_secs),
        )
    }

    /// Maximum admitted requests per window
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Window duration
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Decide whether a request from `address` may proceed.
    ///
    /// Empty or blank addresses are always denied.
    pub fn allow(&self, address: &str) -> bool {
        self.allow_at(address, Instant::now())
    }

    pub(crate) fn allow_at(&self, address: &str, now: Instant) -> bool {
        if address.trim().is_empty() {
            warn!("Admission check with empty address denied");
            return false;
        }

        self.maybe_cleanup(now);

        // Clone the entry out so the shard lock is released before the
        // per-address lock is taken.
        let entry = Arc::clone(
            &self
                .windows
                .entry(address.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(AddressWindow::new(now)))),
        );

        let mut window = entry.lock();

        if now.saturating_duration_since(window.window_start) >= self.window {
            window.count = 1;
            window.window_start = now;
            return true;
        }

        if window.count >= self.max_requests {
            warn!(
                address = %address,
                requests = window.count,
                max = self.max_requests,
                "Admission limit exceeded"
            );
            return false;
        }

        window.count += 1;
        true
    }

    /// Forget everything known about `address`
    pub fn reset(&self, address: &str) {
        if self.windows.remove(address).is_some() {
            debug!(address = %address, "Admission window reset");
        }
    }

    /// Forget every address
    pub fn clear_all(&self) {
        self.windows.clear();
    }

    /// Requests admitted for `address` in its current window (0 if unknown)
    pub fn count(&self, address: &str) -> u32 {
        if address.trim().is_empty() {
            return 0;
        }
        self.windows
            .get(address)
            .map(|entry| entry.lock().count)
            .unwrap_or(0)
    }

    /// Number of addresses currently tracked
    pub fn tracked_addresses(&self) -> usize {
        self.windows.len()
    }

    /// Drop windows idle for at least twice the window duration.
    ///
    /// Returns the number of addresses removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        *self.last_cleanup.lock() = now;
        self.cleanup_expired_at(now)
    }

    fn cleanup_expired_at(&self, now: Instant) -> usize {
        let horizon = self.window.saturating_mul(CLEANUP_MULTIPLIER);
        let before = self.windows.len();

        self.windows
            .retain(|_, entry| now.saturating_duration_since(entry.lock().window_start) < horizon);

        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!(
                removed = removed,
                remaining = self.windows.len(),
                "Expired admission windows removed"
            );
        }
        removed
    }

    fn maybe_cleanup(&self, now: Instant) {
        // Another caller already running the check is good enough
        let Some(mut last) = self.last_cleanup.try_lock() else {
            return;
        };
        if now.saturating_duration_since(*last) < self.cleanup_interval {
            return;
        }
        *last = now;
        drop(last);

        self.cleanup_expired_at(now);
    }

    /// Spawn the periodic cleanup loop; it exits on the shutdown signal
    pub fn spawn_cleanup_task(
        self: Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.cleanup_interval.max(MIN_CLEANUP_PERIOD));
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.cleanup_expired();
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Admission cleanup task shutting down");
                        break;
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("max_requests", &self.max_requests)
            .field("window", &self.window)
            .field("tracked_addresses", &self.windows.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "192.168.1.10";

    fn controller(max: u32, window_secs: u64) -> AdmissionController {
        AdmissionController::new(max, Duration::from_secs(window_secs))
    }

    #[test]
    fn test_window_boundary() {
        let admission = controller(100, 60);
        let start = Instant::now();

        for i in 0..100 {
            let now = start + Duration::from_millis(i * 10);
            assert!(admission.allow_at(ADDR, now), "request {} should pass", i + 1);
        }
        assert_eq!(admission.count(ADDR), 100);

        // 101st request inside the window
        assert!(!admission.allow_at(ADDR, start + Duration::from_secs(59)));
        assert_eq!(admission.count(ADDR), 100);

        // Window elapsed: allowed again with a fresh count
        assert!(admission.allow_at(ADDR, start + Duration::from_secs(60)));
        assert_eq!(admission.count(ADDR), 1);
    }

    #[test]
    fn test_denial_does_not_advance_window() {
        let admission = controller(1, 10);
        let start = Instant::now();

        assert!(admission.allow_at(ADDR, start));
        assert!(!admission.allow_at(ADDR, start + Duration::from_secs(5)));
        assert!(!admission.allow_at(ADDR, start + Duration::from_secs(9)));
        // Window still measured from the first request
        assert!(admission.allow_at(ADDR, start + Duration::from_secs(10)));
    }

    #[test]
    fn test_reset_behaves_like_new_address() {
        let admission = controller(2, 60);

        assert!(admission.allow(ADDR));
        assert!(admission.allow(ADDR));
        assert!(!admission.allow(ADDR));

        admission.reset(ADDR);
        assert_eq!(admission.count(ADDR), 0);

        assert!(admission.allow(ADDR));
        assert_eq!(admission.count(ADDR), 1);
    }

    #[test]
    fn test_empty_address_fails_closed() {
        let admission = controller(100, 60);

        assert!(!admission.allow(""));
        assert!(!admission.allow("   "));
        assert_eq!(admission.count(""), 0);
        assert_eq!(admission.tracked_addresses(), 0);
    }

    #[test]
    fn test_addresses_are_isolated() {
        let admission = controller(1, 60);

        assert!(admission.allow("10.0.0.1"));
        assert!(!admission.allow("10.0.0.1"));
        assert!(admission.allow("10.0.0.2"));
        assert_eq!(admission.tracked_addresses(), 2);
    }

    #[test]
    fn test_clear_all() {
        let admission = controller(1, 60);

        admission.allow("10.0.0.1");
        admission.allow("10.0.0.2");
        admission.clear_all();

        assert_eq!(admission.tracked_addresses(), 0);
        assert!(admission.allow("10.0.0.1"));
    }

    #[test]
    fn test_cleanup_drops_idle_windows() {
        let admission = controller(10, 60);
        let start = Instant::now();

        assert!(admission.allow_at("10.0.0.1", start));
        assert!(admission.allow_at("10.0.0.2", start + Duration::from_secs(90)));

        // 120s after the first window started: only the first is past 2x window
        let removed = admission.cleanup_expired_at(start + Duration::from_secs(120));
        assert_eq!(removed, 1);
        assert_eq!(admission.count("10.0.0.1"), 0);
        assert_eq!(admission.count("10.0.0.2"), 1);
    }

    #[test]
    fn test_opportunistic_cleanup_runs_once_per_interval() {
        let admission = AdmissionController::with_cleanup_interval(
            10,
            Duration::from_secs(1),
            Duration::from_secs(30),
        );
        let start = Instant::now();

        assert!(admission.allow_at("10.0.0.1", start));

        // Before the cleanup interval elapses the idle entry survives
        assert!(admission.allow_at("10.0.0.2", start + Duration::from_secs(10)));
        assert_eq!(admission.tracked_addresses(), 2);

        // Past the interval, the next allow sweeps both idle windows and then
        // creates its own
        assert!(admission.allow_at("10.0.0.3", start + Duration::from_secs(40)));
        assert_eq!(admission.tracked_addresses(), 1);
        assert_eq!(admission.count("10.0.0.3"), 1);
    }

    #[test]
    fn test_concurrent_allow_admits_exactly_max() {
        let admission = Arc::new(controller(500, 60));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let admission = admission.clone();
            handles.push(std::thread::spawn(move || {
                (0..100).filter(|_| admission.allow(ADDR)).count()
            }));
        }

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 500);
        assert_eq!(admission.count(ADDR), 500);
    }

    #[tokio::test]
    async fn test_cleanup_task_stops_on_shutdown() {
        let admission = Arc::new(controller(10, 60));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = admission.clone().spawn_cleanup_task(shutdown_rx);
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("cleanup task should stop")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_removes_idle_windows() {
        let admission = Arc::new(AdmissionController::with_cleanup_interval(
            10,
            Duration::from_secs(1),
            Duration::from_secs(5),
        ));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        assert!(admission.allow(ADDR));
        let handle = admission.clone().spawn_cleanup_task(shutdown_rx);

        // Past twice the window, but the first sweep is not due yet
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(admission.tracked_addresses(), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(admission.tracked_addresses(), 0);
        assert_eq!(admission.count(ADDR), 0);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_survives_zero_interval() {
        let admission = Arc::new(AdmissionController::with_cleanup_interval(
            10,
            Duration::from_secs(1),
            Duration::ZERO,
        ));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        assert!(admission.allow(ADDR));
        let handle = admission.clone().spawn_cleanup_task(shutdown_rx);
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(admission.tracked_addresses(), 0);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn test_huge_window_does_not_overflow_cleanup() {
        let admission = controller(1, u64::MAX);

        assert!(admission.allow(ADDR));
        assert_eq!(admission.cleanup_expired(), 0);
        assert!(!admission.allow(ADDR));
        assert_eq!(admission.tracked_addresses(), 1);
    }
}
