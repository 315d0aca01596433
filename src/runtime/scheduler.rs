//! Thread-per-node scheduler for pipeline graphs
//!
//! Spawns a dedicated thread for each node, which calls `work()` until the
//! node shuts down. Every worker acknowledges its exit on a completion
//! channel, including when it panics.
//!
//! ## Close cascade
//!
//! When a worker's acknowledgment arrives, `wait()` requests a close on every
//! stage directly downstream of it. A stage that exited normally has already
//! queued its sentinel, so the request lands behind it and changes nothing.
//! A stage that failed or panicked never sent one; the request (or the queue
//! disconnecting) is then what lets its downstream drain and exit.

use super::errors::ConnectionError;
use super::node::{ProcessNode, WorkError};
use super::ports::{InputPort, OutputPort};
use super::sender::CloseHandle;
use super::watchdog::Watchdog;
use std::collections::HashMap;
use std::sync::mpsc::{Receiver as StdReceiver, Sender as StdSender, channel};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Sends the completion acknowledgment when dropped, so that a panicking
/// worker is acknowledged during unwinding.
struct CompletionGuard {
    name: String,
    completion_tx: StdSender<String>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let _ = self.completion_tx.send(self.name.clone());
    }
}

/// Outcome of [`Scheduler::wait`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitReport {
    /// Workers that acknowledged completion
    pub completed: usize,
    /// Workers whose thread panicked
    pub panicked: Vec<String>,
}

/// Runtime scheduler that executes a pipeline graph
pub struct Scheduler {
    threads: Vec<(String, JoinHandle<()>)>,
    completion_tx: StdSender<String>,
    completion_rx: StdReceiver<String>,
    downstream: HashMap<String, Vec<CloseHandle>>,
    watchdog: Watchdog,
    watchdog_handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Create a new scheduler with watchdog monitoring
    pub fn new() -> Self {
        Self::with_watchdog(Watchdog::new())
    }

    pub fn with_watchdog(watchdog: Watchdog) -> Self {
        let (completion_tx, completion_rx) = channel();
        let watchdog_handle = match watchdog.start_monitoring_thread() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Watchdog disabled, failed to start monitor thread: {}", e);
                None
            }
        };
        Self {
            threads: Vec::new(),
            completion_tx,
            completion_rx,
            downstream: HashMap::new(),
            watchdog,
            watchdog_handle,
        }
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    /// Register a close handle fired when `upstream` acknowledges its exit
    pub fn cascade_close(&mut self, upstream: impl Into<String>, handle: CloseHandle) {
        self.downstream.entry(upstream.into()).or_default().push(handle);
    }

    /// Start a process node in its own thread, named `name`
    pub fn start_process(
        &mut self,
        name: impl Into<String>,
        node: Box<dyn ProcessNode>,
        inputs: Vec<InputPort>,
        outputs: Vec<OutputPort>,
    ) -> Result<(), ConnectionError> {
        let name = name.into();
        let guard = CompletionGuard {
            name: name.clone(),
            completion_tx: self.completion_tx.clone(),
        };

        debug!("Starting process node: {} ({})", name, node.name());

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                // Locals drop in reverse order: ports and node first, so
                // queues are released before the acknowledgment goes out.
                let guard = guard;
                let mut node = node;
                let inputs = inputs;
                let outputs = outputs;

                let mut samples = 0usize;
                loop {
                    match node.work(&inputs, &outputs) {
                        Ok(n) => samples += n,
                        Err(WorkError::Shutdown) => break,
                        Err(e) => {
                            error!("[{}] Work error: {}", guard.name, e);
                            break;
                        }
                    }
                }

                info!("[{}] Shutdown. Handled {} samples.", guard.name, samples);
            })
            .map_err(|source| ConnectionError::Spawn {
                node: name.clone(),
                source,
            })?;

        self.threads.push((name, handle));
        Ok(())
    }

    /// Wait for all node threads to complete
    ///
    /// Blocks on completion acknowledgments, cascading close requests
    /// downstream as each one arrives, and joins every thread.
    pub fn wait(self) -> WaitReport {
        let Scheduler {
            threads,
            completion_tx,
            completion_rx,
            mut downstream,
            watchdog,
            watchdog_handle,
        } = self;

        // The channel closes once every worker's guard is gone
        drop(completion_tx);

        let total_threads = threads.len();
        let mut report = WaitReport::default();
        let mut threads_by_name: HashMap<String, JoinHandle<()>> = threads.into_iter().collect();

        info!("Waiting for {} threads to complete...", total_threads);

        while report.completed < total_threads {
            let Ok(thread_name) = completion_rx.recv() else {
                break;
            };
            report.completed += 1;

            for handle in downstream.remove(&thread_name).unwrap_or_default() {
                handle.request_close();
            }

            if let Some(handle) = threads_by_name.remove(&thread_name) {
                match handle.join() {
                    Ok(()) => info!(
                        "[{}] Thread completed ({}/{})",
                        thread_name, report.completed, total_threads
                    ),
                    Err(e) => {
                        error!(
                            "[{}] Thread panicked ({}/{}): {:?}",
                            thread_name, report.completed, total_threads, e
                        );
                        report.panicked.push(thread_name);
                    }
                }
            }
        }

        info!("All {} threads completed", report.completed);

        watchdog.stop();
        if let Some(handle) = watchdog_handle {
            let _ = handle.join();
        }

        report
    }

    /// Get the number of running threads
    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    /// Get the names of all running threads
    pub fn thread_names(&self) -> Vec<String> {
        self.threads.iter().map(|(name, _)| name.clone()).collect()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::node::{StageState, WorkResult};
    use crate::runtime::sample::{Chunk, Sample};
    use crate::runtime::sender::Message;
    use crossbeam_channel::bounded;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    struct TestSource {
        count: usize,
        max: usize,
        fail_at_end: bool,
    }

    impl ProcessNode for TestSource {
        fn name(&self) -> &str {
            "test_source"
        }

        fn num_inputs(&self) -> usize {
            0
        }

        fn num_outputs(&self) -> usize {
            1
        }

        fn work(&mut self, _inputs: &[InputPort], outputs: &[OutputPort]) -> WorkResult<usize> {
            let output = outputs[0].get();
            if self.count < self.max {
                output.send(Chunk::new(vec![Sample::new(self.count as i8, 0)]))?;
                self.count += 1;
                Ok(1)
            } else if self.fail_at_end {
                // Exit without a sentinel
                Err(WorkError::NodeError("source failed".to_string()))
            } else {
                output.close();
                Err(WorkError::Shutdown)
            }
        }
    }

    struct TestSink {
        state: StageState,
        received: Arc<Mutex<Vec<i8>>>,
    }

    impl ProcessNode for TestSink {
        fn name(&self) -> &str {
            "test_sink"
        }

        fn num_inputs(&self) -> usize {
            1
        }

        fn num_outputs(&self) -> usize {
            0
        }

        fn work(&mut self, inputs: &[InputPort], _outputs: &[OutputPort]) -> WorkResult<usize> {
            let chunk = inputs[0].get(&mut self.state).recv()?;
            self.received.lock().unwrap().push(chunk.samples()[0].i);
            Ok(chunk.len())
        }
    }

    struct PanickingNode;

    impl ProcessNode for PanickingNode {
        fn name(&self) -> &str {
            "panicking"
        }

        fn num_inputs(&self) -> usize {
            0
        }

        fn num_outputs(&self) -> usize {
            0
        }

        fn work(&mut self, _inputs: &[InputPort], _outputs: &[OutputPort]) -> WorkResult<usize> {
            panic!("boom");
        }
    }

    fn run_source_into_sink(fail_at_end: bool) -> (WaitReport, Vec<i8>) {
        let mut scheduler = Scheduler::new();
        let (tx, rx) = bounded::<Message>(2);
        let received = Arc::new(Mutex::new(Vec::new()));

        scheduler.cascade_close("test_source", CloseHandle::new("test_sink", tx.clone()));
        scheduler
            .start_process(
                "test_source",
                Box::new(TestSource {
                    count: 0,
                    max: 5,
                    fail_at_end,
                }),
                vec![],
                vec![OutputPort::new(tx)],
            )
            .unwrap();
        scheduler
            .start_process(
                "test_sink",
                Box::new(TestSink {
                    state: StageState::Open,
                    received: Arc::clone(&received),
                }),
                vec![InputPort::new(rx)],
                vec![],
            )
            .unwrap();

        assert_eq!(scheduler.num_threads(), 2);
        let report = scheduler.wait();
        let values = received.lock().unwrap().clone();
        (report, values)
    }

    #[test]
    fn test_scheduler_basic() {
        let (report, values) = run_source_into_sink(false);
        assert_eq!(report.completed, 2);
        assert!(report.panicked.is_empty());
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_failed_upstream_still_releases_downstream() {
        let start = Instant::now();
        let (report, values) = run_source_into_sink(true);
        assert_eq!(report.completed, 2);
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_panicking_worker_is_acknowledged() {
        let mut scheduler = Scheduler::new();
        scheduler
            .start_process("panicking", Box::new(PanickingNode), vec![], vec![])
            .unwrap();
        assert_eq!(scheduler.thread_names(), vec!["panicking".to_string()]);

        let report = scheduler.wait();
        assert_eq!(report.completed, 1);
        assert_eq!(report.panicked, vec!["panicking".to_string()]);
    }
}
