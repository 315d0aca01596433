//! Lookup-table oscillator for integer complex mixing
//!
//! A frequency shift of `r` Hz at a sample rate of `s` Hz rotates sample `k`
//! by `-2π·r·k/s`. The rotation repeats exactly after
//! `T = lcm(s, |r|) / |r| = s / gcd(s, |r|)` samples, so one period of unit
//! rotations is precomputed once and indexed cyclically. Phase is reduced in
//! integers (`r·k mod s`) before the trigonometry, so every entry is exact to
//! rounding and there is no drift at the wrap point.
//!
//! # Example
//!
//! ```
//! use iq2pcap::dsp::{Narrowing, OscillatorTable, Rotator};
//! use iq2pcap::Sample;
//!
//! // Shift by a quarter of the sample rate: period of 4 samples
//! let table = OscillatorTable::new(5_000_000, 20_000_000).unwrap();
//! assert_eq!(table.len(), 4);
//!
//! let mut rotator = Rotator::new(table, Narrowing::Wrap);
//! let mut samples = vec![Sample::new(10, 0); 4];
//! rotator.process(&mut samples);
//! assert_eq!(samples[1], Sample::new(0, -10));
//! ```

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use crate::runtime::Sample;

/// Amplitude of every table entry
///
/// Leaves headroom below the 8-bit limit; products are divided back by this
/// value so a zero shift is an exact identity.
pub const NOMINAL_GAIN: i8 = 126;

/// Largest table accepted (entries), 128 MiB of samples
pub const MAX_TABLE_LEN: usize = 1 << 26;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OscillatorError {
    #[error("Sample rate must be positive, got {0} Hz")]
    InvalidSampleRate(i64),

    #[error(
        "Shift of {shift_rate} Hz at {sample_rate} Hz needs a {len}-entry table (limit {limit})",
        limit = MAX_TABLE_LEN
    )]
    TableTooLarge {
        shift_rate: i64,
        sample_rate: i64,
        len: u64,
    },
}

/// How a widened product is brought back to 8 bits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Narrowing {
    /// Keep the low 8 bits (large products wrap around)
    #[default]
    Wrap,
    /// Clamp to `[-128, 127]`
    Saturate,
}

impl Narrowing {
    #[inline(always)]
    pub fn narrow(self, value: i32) -> i8 {
        match self {
            Narrowing::Wrap => value as i8,
            Narrowing::Saturate => value.clamp(i8::MIN as i32, i8::MAX as i32) as i8,
        }
    }
}

impl FromStr for Narrowing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wrap" => Ok(Narrowing::Wrap),
            "saturate" => Ok(Narrowing::Saturate),
            other => Err(format!("unknown narrowing '{}', expected 'wrap' or 'saturate'", other)),
        }
    }
}

impl fmt::Display for Narrowing {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Narrowing::Wrap => write!(f, "wrap"),
            Narrowing::Saturate => write!(f, "saturate"),
        }
    }
}

/// Complex multiply of `sample` by oscillator entry `lo`
///
/// `re = i·ti - q·tq`, `im = i·tq + q·ti`, computed in `i32`, divided by
/// [`NOMINAL_GAIN`] (truncating toward zero) and narrowed per `narrowing`.
#[inline(always)]
pub fn mix(sample: Sample, lo: Sample, narrowing: Narrowing) -> Sample {
    let (i, q) = (sample.i as i32, sample.q as i32);
    let (ti, tq) = (lo.i as i32, lo.q as i32);
    let gain = NOMINAL_GAIN as i32;

    let re = (i * ti - q * tq) / gain;
    let im = (i * tq + q * ti) / gain;

    Sample::new(narrowing.narrow(re), narrowing.narrow(im))
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// One full beat period of a shift frequency, as 8-bit unit rotations
///
/// Built once per detector and owned by its shift stage.
#[derive(Debug, Clone)]
pub struct OscillatorTable {
    entries: Vec<Sample>,
    shift_rate: i64,
    sample_rate: i64,
}

impl OscillatorTable {
    /// Build the table for shifting by `shift_rate` Hz at `sample_rate` Hz
    ///
    /// A negative shift moves the spectrum up, a positive one moves the
    /// component at `+shift_rate` down to baseband. A zero shift yields the
    /// single identity entry.
    pub fn new(shift_rate: i64, sample_rate: i64) -> Result<Self, OscillatorError> {
        if sample_rate <= 0 {
            return Err(OscillatorError::InvalidSampleRate(sample_rate));
        }

        let len = Self::period(shift_rate, sample_rate);
        if len > MAX_TABLE_LEN as u64 {
            return Err(OscillatorError::TableTooLarge {
                shift_rate,
                sample_rate,
                len,
            });
        }

        let gain = NOMINAL_GAIN as f64;
        let entries = (0..len)
            .map(|k| {
                let step = Self::phase_step(shift_rate, sample_rate, k);
                let angle = -2.0 * PI * step as f64 / sample_rate as f64;
                Sample::new(
                    (gain * angle.cos()).round() as i8,
                    (gain * angle.sin()).round() as i8,
                )
            })
            .collect();

        Ok(Self {
            entries,
            shift_rate,
            sample_rate,
        })
    }

    /// Samples after which the rotation repeats exactly
    ///
    /// `lcm(sample_rate, |shift_rate|) / |shift_rate|`, or 1 for no shift.
    pub fn period(shift_rate: i64, sample_rate: i64) -> u64 {
        let shift = shift_rate.unsigned_abs();
        let rate = sample_rate.unsigned_abs();
        if shift == 0 || rate == 0 {
            return 1;
        }
        rate / gcd(rate, shift)
    }

    /// Phase numerator of entry `k`: `shift_rate·k mod sample_rate`
    pub fn phase_step(shift_rate: i64, sample_rate: i64, k: u64) -> i64 {
        let product = shift_rate as i128 * k as i128;
        product.rem_euclid(sample_rate as i128) as i64
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Never true: every table has at least one entry
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn entries(&self) -> &[Sample] {
        &self.entries
    }

    pub fn shift_rate(&self) -> i64 {
        self.shift_rate
    }

    pub fn sample_rate(&self) -> i64 {
        self.sample_rate
    }
}

/// A table plus the phase cursor walking it
///
/// The cursor persists across calls to [`Rotator::process`] and only resets
/// when a new rotator is built.
#[derive(Debug, Clone)]
pub struct Rotator {
    table: OscillatorTable,
    cursor: usize,
    narrowing: Narrowing,
}

impl Rotator {
    pub fn new(table: OscillatorTable, narrowing: Narrowing) -> Self {
        Self {
            table,
            cursor: 0,
            narrowing,
        }
    }

    /// Rotate `samples` in place, advancing the cursor one entry per sample
    pub fn process(&mut self, samples: &mut [Sample]) {
        let entries = self.table.entries();
        let len = entries.len();
        let mut cursor = self.cursor;

        for sample in samples.iter_mut() {
            *sample = mix(*sample, entries[cursor], self.narrowing);
            cursor += 1;
            if cursor == len {
                cursor = 0;
            }
        }

        self.cursor = cursor;
    }

    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn table(&self) -> &OscillatorTable {
        &self.table
    }

    pub fn narrowing(&self) -> Narrowing {
        self.narrowing
    }
}
