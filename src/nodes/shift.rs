//! Frequency translation stage

use crate::dsp::{Narrowing, OscillatorTable, Rotator};
use crate::runtime::node::{
    InputPort, OutputPort, PortSchema, ProcessNode, StageState, WorkError, WorkResult,
};
use tracing::debug;

/// Mixes every sample with the next entry of a private oscillator table
///
/// Chunk boundaries and lengths pass through unchanged. The phase cursor
/// carries over from one chunk to the next for the lifetime of the stage.
pub struct Shift {
    name: String,
    state: StageState,
    rotator: Rotator,
    samples: u64,
}

impl Shift {
    pub fn new(name: impl Into<String>, table: OscillatorTable, narrowing: Narrowing) -> Self {
        Self {
            name: name.into(),
            state: StageState::Open,
            rotator: Rotator::new(table, narrowing),
            samples: 0,
        }
    }

    pub fn rotator(&self) -> &Rotator {
        &self.rotator
    }
}

impl ProcessNode for Shift {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn num_outputs(&self) -> usize {
        1
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::input("in", 0)]
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::output("out", 0)]
    }

    fn work(&mut self, inputs: &[InputPort], outputs: &[OutputPort]) -> WorkResult<usize> {
        let output = outputs[0].get();

        let Some(mut chunk) = inputs[0].get(&mut self.state).next_chunk() else {
            output.close();
            debug!(
                "[{}] Drained after {} samples, cursor at {}/{}",
                self.name,
                self.samples,
                self.rotator.cursor(),
                self.rotator.table().len()
            );
            return Err(WorkError::Shutdown);
        };

        self.rotator.process(chunk.samples_mut());
        let n = chunk.len();
        output.send(chunk)?;

        self.samples += n as u64;
        Ok(n)
    }
}
