//! Two-way stream duplication
//!
//! The only place a chunk is copied. Each branch gets its own queue, so a
//! slow branch only stalls the Tee once that branch's queue is full.

use crate::runtime::node::{
    InputPort, OutputPort, PortSchema, ProcessNode, StageState, WorkError, WorkResult,
};
use crate::runtime::sample::Chunk;
use tracing::{debug, warn};

const OUT_A: usize = 0;
const OUT_B: usize = 1;

/// Duplicates one chunk stream onto outputs `a` and `b`
pub struct Tee {
    name: String,
    state: StageState,
    alive: [bool; 2],
    chunks: u64,
}

impl Tee {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: StageState::Open,
            alive: [true; 2],
            chunks: 0,
        }
    }

    fn forward(&mut self, outputs: &[OutputPort], port: usize, chunk: Chunk) {
        if outputs[port].get().send(chunk).is_err() {
            warn!(
                "[{}] Output '{}' disconnected, continuing on the other branch",
                self.name,
                port_name(port)
            );
            self.alive[port] = false;
        }
    }
}

fn port_name(port: usize) -> &'static str {
    if port == OUT_A { "a" } else { "b" }
}

impl ProcessNode for Tee {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn num_outputs(&self) -> usize {
        2
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::input("in", 0)]
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        vec![
            PortSchema::output(port_name(OUT_A), OUT_A),
            PortSchema::output(port_name(OUT_B), OUT_B),
        ]
    }

    fn work(&mut self, inputs: &[InputPort], outputs: &[OutputPort]) -> WorkResult<usize> {
        let Some(chunk) = inputs[0].get(&mut self.state).next_chunk() else {
            for port in [OUT_A, OUT_B] {
                if self.alive[port] {
                    outputs[port].get().close();
                }
            }
            debug!("[{}] Drained after {} chunks", self.name, self.chunks);
            return Err(WorkError::Shutdown);
        };

        let n = chunk.len();
        match self.alive {
            [true, true] => {
                self.forward(outputs, OUT_A, chunk.clone());
                self.forward(outputs, OUT_B, chunk);
            }
            [true, false] => self.forward(outputs, OUT_A, chunk),
            [false, true] => self.forward(outputs, OUT_B, chunk),
            [false, false] => {}
        }

        if self.alive == [false, false] {
            return Err(WorkError::SendError(format!(
                "[{}] both outputs disconnected",
                self.name
            )));
        }

        self.chunks += 1;
        Ok(n)
    }
}
