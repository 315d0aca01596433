//! Stall detection for blocked channel operations
//!
//! Each port records when its current blocking `recv`/`send` started in an
//! atomic. A monitor thread scans those timestamps and reports any operation
//! blocked longer than the stall threshold. A sender stuck on a full queue is
//! the visible symptom of a slow consumer further down its branch.
//!
//! Observability only: nothing here interrupts or times out an operation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Default time an operation may block before it is reported
pub const DEFAULT_STALL_THRESHOLD: Duration = Duration::from_secs(5);

const SCAN_INTERVAL: Duration = Duration::from_secs(1);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shared state for a single port's operation tracking
struct PortState {
    /// Milliseconds since the watchdog origin (offset by one) when the
    /// current operation started, or 0 if idle
    op_started: AtomicU64,
    /// Whether the current operation has already been reported
    reported: AtomicBool,
    origin: Instant,
    stage: String,
    port: String,
    operation: &'static str,
}

impl PortState {
    #[inline(always)]
    fn now(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64 + 1
    }
}

/// Handle to a port's watchdog state, held by senders and receivers
#[derive(Clone)]
pub struct WatchdogHandle {
    state: Arc<PortState>,
}

impl WatchdogHandle {
    #[inline(always)]
    pub fn start_operation(&self) {
        self.state.op_started.store(self.state.now(), Ordering::Relaxed);
        self.state.reported.store(false, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn finish_operation(&self) {
        if self.state.reported.swap(false, Ordering::Relaxed) {
            info!(
                "[{}] {} on port '{}' resumed",
                self.state.stage, self.state.operation, self.state.port
            );
        }
        self.state.op_started.store(0, Ordering::Relaxed);
    }
}

/// Registry of monitored ports
#[derive(Clone)]
pub struct Watchdog {
    ports: Arc<Mutex<Vec<Weak<PortState>>>>,
    enabled: Arc<AtomicBool>,
    origin: Instant,
    threshold: Duration,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_STALL_THRESHOLD)
    }

    pub fn with_threshold(threshold: Duration) -> Self {
        Self {
            ports: Arc::new(Mutex::new(Vec::new())),
            enabled: Arc::new(AtomicBool::new(true)),
            origin: Instant::now(),
            threshold,
        }
    }

    /// Register a port for monitoring
    pub fn register_port(&self, stage: &str, operation: &'static str, port: &str) -> WatchdogHandle {
        let state = Arc::new(PortState {
            op_started: AtomicU64::new(0),
            reported: AtomicBool::new(false),
            origin: self.origin,
            stage: stage.to_string(),
            port: port.to_string(),
            operation,
        });

        if let Ok(mut ports) = self.ports.lock() {
            ports.push(Arc::downgrade(&state));
        }

        WatchdogHandle { state }
    }

    /// Report operations blocked longer than the threshold
    ///
    /// Returns how many ports are currently stalled.
    pub fn check_for_stalls(&self) -> usize {
        let threshold_ms = self.threshold.as_millis() as u64;
        let Ok(mut ports) = self.ports.lock() else {
            return 0;
        };

        let mut stalled = 0;
        ports.retain(|weak| {
            let Some(state) = weak.upgrade() else {
                return false;
            };
            let start = state.op_started.load(Ordering::Relaxed);
            if start > 0 {
                let blocked_ms = state.now().saturating_sub(start);
                if blocked_ms > threshold_ms {
                    stalled += 1;
                    if !state.reported.swap(true, Ordering::Relaxed) {
                        warn!(
                            "[{}] {} on port '{}' blocked for {:.1}s",
                            state.stage,
                            state.operation,
                            state.port,
                            blocked_ms as f64 / 1000.0
                        );
                    }
                }
            }
            true
        });
        stalled
    }

    /// Start the monitor thread; it exits after [`Watchdog::stop`]
    pub fn start_monitoring_thread(&self) -> std::io::Result<JoinHandle<()>> {
        let watchdog = self.clone();
        std::thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || {
                let mut last_scan = Instant::now();
                while watchdog.enabled.load(Ordering::Relaxed) {
                    std::thread::sleep(STOP_POLL_INTERVAL);
                    if last_scan.elapsed() >= SCAN_INTERVAL {
                        watchdog.check_for_stalls();
                        last_scan = Instant::now();
                    }
                }
            })
    }

    pub fn stop(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard marking a blocking operation on a port
pub struct OperationGuard<'a> {
    handle: &'a WatchdogHandle,
}

impl<'a> OperationGuard<'a> {
    #[inline(always)]
    pub fn new(handle: &'a WatchdogHandle) -> Self {
        handle.start_operation();
        Self { handle }
    }
}

impl Drop for OperationGuard<'_> {
    #[inline(always)]
    fn drop(&mut self) {
        self.handle.finish_operation();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_idle_ports_are_not_stalled() {
        let watchdog = Watchdog::with_threshold(Duration::from_millis(10));
        let _handle = watchdog.register_port("tee0", "send", "a");
        thread::sleep(Duration::from_millis(30));
        assert_eq!(watchdog.check_for_stalls(), 0);
    }

    #[test]
    fn test_blocked_operation_is_reported_until_finished() {
        let watchdog = Watchdog::with_threshold(Duration::from_millis(10));
        let handle = watchdog.register_port("shift0", "send", "out");

        {
            let _guard = OperationGuard::new(&handle);
            thread::sleep(Duration::from_millis(40));
            assert_eq!(watchdog.check_for_stalls(), 1);
            // Reported once, still counted as stalled
            assert_eq!(watchdog.check_for_stalls(), 1);
        }

        assert_eq!(watchdog.check_for_stalls(), 0);
    }

    #[test]
    fn test_dropped_ports_are_forgotten() {
        let watchdog = Watchdog::with_threshold(Duration::from_millis(10));
        let handle = watchdog.register_port("sink0", "recv", "in");
        handle.start_operation();
        drop(handle);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(watchdog.check_for_stalls(), 0);
        assert!(watchdog.ports.lock().unwrap().is_empty());
    }
}
