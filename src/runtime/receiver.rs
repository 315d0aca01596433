//! Receiving half of a stage queue and the per-stage drain state machine
//!
//! Every consuming stage walks the same three states:
//!
//! - `Open`: block on the queue. A data chunk is delivered; the sentinel means
//!   upstream is finished and moves straight to `Drained`; a close request
//!   moves to `CloseRequested`.
//! - `CloseRequested`: keep delivering whatever is already queued, without
//!   blocking. Only an empty (or disconnected) queue, or the sentinel, moves
//!   to `Drained`. A close request alone never stops delivery.
//! - `Drained`: nothing more is delivered.
//!
//! The state is owned by the node and lent to the [`Receiver`] for each
//! `work()` call, so it survives across calls.

use crossbeam_channel::{Receiver as CrossbeamReceiver, TryRecvError};
use tracing::{debug, trace};

use super::errors::{WorkError, WorkResult};
use super::sample::Chunk;
use super::sender::Message;
use super::watchdog::{OperationGuard, WatchdogHandle};

/// Drain progress of one consuming stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StageState {
    #[default]
    Open,
    CloseRequested,
    Drained,
}

/// A stage queue receiver bound to its owner's [`StageState`]
pub struct Receiver<'a> {
    receiver: &'a CrossbeamReceiver<Message>,
    state: &'a mut StageState,
    watchdog_handle: Option<WatchdogHandle>,
}

impl<'a> Receiver<'a> {
    pub fn new(receiver: &'a CrossbeamReceiver<Message>, state: &'a mut StageState) -> Self {
        Self {
            receiver,
            state,
            watchdog_handle: None,
        }
    }

    pub fn with_watchdog(
        receiver: &'a CrossbeamReceiver<Message>,
        state: &'a mut StageState,
        watchdog_handle: Option<WatchdogHandle>,
    ) -> Self {
        Self {
            receiver,
            state,
            watchdog_handle,
        }
    }

    pub fn state(&self) -> StageState {
        *self.state
    }

    /// Next data chunk, or `None` once the stage is drained
    pub fn next_chunk(&mut self) -> Option<Chunk> {
        loop {
            match *self.state {
                StageState::Drained => return None,
                StageState::Open => {
                    let received = {
                        let _guard = self.watchdog_handle.as_ref().map(OperationGuard::new);
                        self.receiver.recv()
                    };
                    match received {
                        Ok(Message::Data(chunk)) if chunk.is_sentinel() => {
                            debug!("Receiver - sentinel received");
                            *self.state = StageState::Drained;
                        }
                        Ok(Message::Data(chunk)) => return Some(chunk),
                        Ok(Message::CloseRequested) => {
                            debug!(
                                "Receiver - close requested with {} message(s) queued",
                                self.receiver.len()
                            );
                            *self.state = StageState::CloseRequested;
                        }
                        Err(_) => {
                            debug!("Receiver - queue disconnected, treating as drained");
                            *self.state = StageState::Drained;
                        }
                    }
                }
                StageState::CloseRequested => match self.receiver.try_recv() {
                    Ok(Message::Data(chunk)) if chunk.is_sentinel() => {
                        *self.state = StageState::Drained;
                    }
                    Ok(Message::Data(chunk)) => return Some(chunk),
                    Ok(Message::CloseRequested) => {
                        trace!("Receiver - duplicate close request ignored");
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                        debug!("Receiver - queue drained after close request");
                        *self.state = StageState::Drained;
                    }
                },
            }
        }
    }

    /// Like [`Receiver::next_chunk`], with `Err(WorkError::Shutdown)` once drained
    pub fn recv(&mut self) -> WorkResult<Chunk> {
        self.next_chunk().ok_or(WorkError::Shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::sample::Sample;
    use crossbeam_channel::bounded;

    fn data(n: i8) -> Message {
        Message::Data(Chunk::new(vec![Sample::new(n, -n)]))
    }

    #[test]
    fn test_sentinel_drains_immediately() {
        let (tx, rx) = bounded(8);
        tx.send(data(1)).unwrap();
        tx.send(Message::Data(Chunk::sentinel())).unwrap();
        // Anything after the sentinel is never delivered
        tx.send(data(2)).unwrap();

        let mut state = StageState::Open;
        let mut receiver = Receiver::new(&rx, &mut state);
        assert_eq!(receiver.recv().unwrap().samples()[0], Sample::new(1, -1));
        assert!(matches!(receiver.recv(), Err(WorkError::Shutdown)));
        assert!(receiver.next_chunk().is_none());
        assert_eq!(state, StageState::Drained);
    }

    #[test]
    fn test_close_request_keeps_draining_queued_data() {
        let (tx, rx) = bounded(8);
        tx.send(Message::CloseRequested).unwrap();
        tx.send(data(1)).unwrap();
        tx.send(data(2)).unwrap();

        let mut state = StageState::Open;
        {
            let mut receiver = Receiver::new(&rx, &mut state);
            assert_eq!(receiver.recv().unwrap().samples()[0].i, 1);
            assert_eq!(receiver.state(), StageState::CloseRequested);
        }

        // State persists across receivers, as it does across work() calls
        let mut receiver = Receiver::new(&rx, &mut state);
        assert_eq!(receiver.recv().unwrap().samples()[0].i, 2);
        assert!(receiver.next_chunk().is_none());
        assert_eq!(receiver.state(), StageState::Drained);

        // Data arriving after the drain is not picked up
        tx.send(data(3)).unwrap();
        assert!(receiver.next_chunk().is_none());
    }

    #[test]
    fn test_duplicate_close_requests_are_ignored() {
        let (tx, rx) = bounded(8);
        tx.send(Message::CloseRequested).unwrap();
        tx.send(Message::CloseRequested).unwrap();
        tx.send(data(7)).unwrap();

        let mut state = StageState::Open;
        let mut receiver = Receiver::new(&rx, &mut state);
        assert_eq!(receiver.recv().unwrap().samples()[0].i, 7);
        assert!(receiver.next_chunk().is_none());
    }

    #[test]
    fn test_disconnection_drains() {
        let (tx, rx) = bounded(8);
        tx.send(data(4)).unwrap();
        drop(tx);

        let mut state = StageState::Open;
        let mut receiver = Receiver::new(&rx, &mut state);
        assert_eq!(receiver.recv().unwrap().samples()[0].i, 4);
        assert!(receiver.next_chunk().is_none());
        assert_eq!(receiver.state(), StageState::Drained);
    }
}
