//! Port wrappers handed to nodes by the scheduler
//!
//! Every port carries [`Message`]s, so unlike a general dataflow graph there
//! is no per-port type to check: ports are matched by name only.

use std::fmt;

use crossbeam_channel::{Receiver as CrossbeamReceiver, Sender as CrossbeamSender};

pub use super::errors::ConnectionError;
pub use super::pipeline::Pipeline;
pub use super::receiver::{Receiver, StageState};
pub use super::sender::{Message, Sender};
pub use super::watchdog::{Watchdog, WatchdogHandle};

/// Direction of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

/// Schema describing a port's metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSchema {
    pub name: String,
    pub index: usize,
    pub direction: PortDirection,
}

impl PortSchema {
    pub fn new(name: impl Into<String>, index: usize, direction: PortDirection) -> Self {
        Self {
            name: name.into(),
            index,
            direction,
        }
    }

    pub fn input(name: impl Into<String>, index: usize) -> Self {
        Self::new(name, index, PortDirection::Input)
    }

    pub fn output(name: impl Into<String>, index: usize) -> Self {
        Self::new(name, index, PortDirection::Output)
    }
}

/// Input port owning the receiving half of a stage queue
pub struct InputPort {
    receiver: CrossbeamReceiver<Message>,
    watchdog_handle: Option<WatchdogHandle>,
}

impl InputPort {
    pub fn new(receiver: CrossbeamReceiver<Message>) -> Self {
        Self {
            receiver,
            watchdog_handle: None,
        }
    }

    pub fn new_with_watchdog(
        receiver: CrossbeamReceiver<Message>,
        watchdog: &Watchdog,
        node_name: &str,
        port_name: &str,
    ) -> Self {
        Self {
            receiver,
            watchdog_handle: Some(watchdog.register_port(node_name, "recv", port_name)),
        }
    }

    /// Get a [`Receiver`] driving the caller's drain state
    pub fn get<'a>(&'a self, state: &'a mut StageState) -> Receiver<'a> {
        Receiver::with_watchdog(&self.receiver, state, self.watchdog_handle.clone())
    }

    /// Messages currently queued
    pub fn queued(&self) -> usize {
        self.receiver.len()
    }
}

impl fmt::Debug for InputPort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InputPort[queued={}]", self.receiver.len())
    }
}

/// Output port owning the sending half of a downstream stage queue
pub struct OutputPort {
    sender: Sender,
}

impl OutputPort {
    pub fn new(sender: CrossbeamSender<Message>) -> Self {
        Self {
            sender: Sender::new(sender),
        }
    }

    pub fn new_with_watchdog(
        sender: CrossbeamSender<Message>,
        watchdog: &Watchdog,
        node_name: &str,
        port_name: &str,
    ) -> Self {
        let sender = Sender::new(sender);
        Self {
            sender: sender.with_watchdog(watchdog.register_port(node_name, "send", port_name)),
        }
    }

    /// Get the [`Sender`] for this port
    pub fn get(&self) -> &Sender {
        &self.sender
    }
}

impl fmt::Debug for OutputPort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "OutputPort")
    }
}
