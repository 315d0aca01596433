//! Stage messages and the sending half of a stage queue

use crossbeam_channel::{SendError, Sender as CrossbeamSender, TrySendError};
use tracing::debug;

use super::sample::Chunk;
use super::watchdog::{OperationGuard, WatchdogHandle};

/// What travels on every stage queue
///
/// Data and shutdown share one FIFO queue, so a close request can never
/// overtake chunks that were enqueued before it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// A data chunk, or the zero-length sentinel when upstream has finished
    Data(Chunk),
    /// Out-of-band request to finish once the queue is drained
    CloseRequested,
}

/// Sending half of one stage queue
///
/// `send` blocks while the queue is full; that blocking is the pipeline's
/// backpressure.
pub struct Sender {
    destination: CrossbeamSender<Message>,
    watchdog_handle: Option<WatchdogHandle>,
}

impl Sender {
    pub fn new(destination: CrossbeamSender<Message>) -> Self {
        Self {
            destination,
            watchdog_handle: None,
        }
    }

    /// Attach a watchdog handle to monitor send operations
    pub fn with_watchdog(&self, watchdog_handle: WatchdogHandle) -> Self {
        Self {
            destination: self.destination.clone(),
            watchdog_handle: Some(watchdog_handle),
        }
    }

    /// Send a data chunk downstream
    ///
    /// On a disconnected queue the chunk is handed back in the error.
    pub fn send(&self, chunk: Chunk) -> Result<(), SendError<Chunk>> {
        debug_assert!(!chunk.is_sentinel(), "sentinel must go through close()");

        let _guard = self.watchdog_handle.as_ref().map(OperationGuard::new);
        self.destination
            .send(Message::Data(chunk))
            .map_err(|SendError(msg)| match msg {
                Message::Data(chunk) => SendError(chunk),
                Message::CloseRequested => unreachable!("only data is sent here"),
            })
    }

    /// Emit the shutdown sentinel
    ///
    /// Returns false if the receiving stage is already gone.
    pub fn close(&self) -> bool {
        let _guard = self.watchdog_handle.as_ref().map(OperationGuard::new);
        self.destination.send(Message::Data(Chunk::sentinel())).is_ok()
    }
}

impl Clone for Sender {
    fn clone(&self) -> Self {
        Self {
            destination: self.destination.clone(),
            watchdog_handle: self.watchdog_handle.clone(),
        }
    }
}

/// Controller-side handle that can ask a stage to finish
///
/// Holds a clone of the sending half of the stage's input queue. Requesting
/// a close consumes the handle: the request is queued if there is room, and
/// dropping the handle means that once every upstream sender is gone the
/// queue disconnects, which the stage also treats as a close.
pub struct CloseHandle {
    stage: String,
    destination: CrossbeamSender<Message>,
}

impl CloseHandle {
    pub fn new(stage: impl Into<String>, destination: CrossbeamSender<Message>) -> Self {
        Self {
            stage: stage.into(),
            destination,
        }
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Ask the stage to stop after draining what is already queued
    ///
    /// Never blocks. Returns true if the request was queued.
    pub fn request_close(self) -> bool {
        match self.destination.try_send(Message::CloseRequested) {
            Ok(()) => {
                debug!("[{}] close requested", self.stage);
                true
            }
            Err(TrySendError::Full(_)) => {
                debug!("[{}] queue full, close will follow disconnection", self.stage);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::sample::Sample;
    use crossbeam_channel::bounded;

    #[test]
    fn test_send_and_close() {
        let (tx, rx) = bounded(4);
        let sender = Sender::new(tx);

        sender.send(Chunk::new(vec![Sample::new(1, 2)])).unwrap();
        assert!(sender.close());

        assert_eq!(
            rx.recv().unwrap(),
            Message::Data(Chunk::new(vec![Sample::new(1, 2)]))
        );
        assert_eq!(rx.recv().unwrap(), Message::Data(Chunk::sentinel()));
    }

    #[test]
    fn test_send_to_dropped_receiver_returns_chunk() {
        let (tx, rx) = bounded(4);
        let sender = Sender::new(tx);
        drop(rx);

        let chunk = Chunk::new(vec![Sample::new(3, 4)]);
        let err = sender.send(chunk.clone()).unwrap_err();
        assert_eq!(err.0, chunk);
        assert!(!sender.close());
    }

    #[test]
    fn test_close_request_queues_behind_data() {
        let (tx, rx) = bounded(4);
        let sender = Sender::new(tx.clone());
        let handle = CloseHandle::new("tee0", tx);

        sender.send(Chunk::new(vec![Sample::new(1, 1)])).unwrap();
        assert!(handle.request_close());

        assert!(matches!(rx.recv().unwrap(), Message::Data(_)));
        assert_eq!(rx.recv().unwrap(), Message::CloseRequested);
    }

    #[test]
    fn test_close_request_on_full_queue_does_not_block() {
        let (tx, rx) = bounded(1);
        let sender = Sender::new(tx.clone());
        let handle = CloseHandle::new("sink0", tx);

        sender.send(Chunk::new(vec![Sample::new(1, 1)])).unwrap();
        assert!(!handle.request_close());

        drop(sender);
        assert!(matches!(rx.recv().unwrap(), Message::Data(_)));
        // Every sender is gone now
        assert!(rx.recv().is_err());
    }
}
