//! Signal processing blocks
//!
//! Only complex mixing is done here: a precomputed oscillator table and the
//! rotator that walks it. No filtering, decimation or demodulation.

pub mod oscillator;

pub use oscillator::{
    MAX_TABLE_LEN, NOMINAL_GAIN, Narrowing, OscillatorError, OscillatorTable, Rotator, mix,
};
