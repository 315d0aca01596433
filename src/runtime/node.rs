//! Node trait for pipeline stages
//!
//! Each node runs on its own worker thread, which calls `work()` until the
//! node reports `WorkError::Shutdown` (or fails).

pub use super::errors::{WorkError, WorkResult};
pub use super::ports::{InputPort, OutputPort, PortSchema};
pub use super::receiver::{Receiver, StageState};
pub use super::sender::Sender;

/// A pipeline stage
/// - Sources have 0 inputs and N outputs
/// - Sinks have N inputs and 0 outputs
/// - Processors have N inputs and M outputs
pub trait ProcessNode: Send {
    /// Get a debug name for this node
    fn name(&self) -> &str;

    /// Number of input ports this node requires
    fn num_inputs(&self) -> usize;

    /// Number of output ports this node provides
    fn num_outputs(&self) -> usize;

    /// Input port names, in index order
    fn input_schema(&self) -> Vec<PortSchema> {
        (0..self.num_inputs())
            .map(|i| PortSchema::input(format!("in{}", i), i))
            .collect()
    }

    /// Output port names, in index order
    fn output_schema(&self) -> Vec<PortSchema> {
        (0..self.num_outputs())
            .map(|i| PortSchema::output(format!("out{}", i), i))
            .collect()
    }

    /// Do work: read from inputs, process, write to outputs
    ///
    /// Returns the number of samples handled by this call. A node that has
    /// finished (after emitting its sentinels) returns `Err(WorkError::Shutdown)`.
    fn work(&mut self, inputs: &[InputPort], outputs: &[OutputPort]) -> WorkResult<usize>;
}
