//! Runtime support for thread-per-stage streaming pipelines

pub mod errors;
pub mod node;
pub mod pipeline;
pub mod ports;
pub mod receiver;
pub mod sample;
pub mod scheduler;
pub mod sender;
pub mod watchdog;

pub use errors::{ConnectionError, WorkError, WorkResult};
pub use node::ProcessNode;
pub use pipeline::DEFAULT_QUEUE_DEPTH;
pub use ports::{InputPort, OutputPort, Pipeline, PortDirection, PortSchema};
pub use receiver::{Receiver, StageState};
pub use sample::{Chunk, Sample};
pub use scheduler::{Scheduler, WaitReport};
pub use sender::{CloseHandle, Message, Sender};
pub use watchdog::Watchdog;
