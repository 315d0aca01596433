//! Run configuration: rates, detector specs and pipeline tuning

use crate::capture::{CaptureError, PcapWriter};
use crate::dsp::{MAX_TABLE_LEN, Narrowing, OscillatorError, OscillatorTable};
use crate::nodes::{DEFAULT_CHUNK_SIZE, DEFAULT_REPORT_INTERVAL, SinkMode};
use crate::runtime::DEFAULT_QUEUE_DEPTH;
use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Largest chunk whose interleaved bytes still fit one pcap record
pub const MAX_CHUNK_SIZE: usize = 32767;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid rate '{input}': {reason}")]
    InvalidRate { input: String, reason: String },

    #[error("Invalid detector '{input}': {reason}")]
    InvalidDetector { input: String, reason: String },

    #[error("Sample rate must be positive, got {0}")]
    InvalidSampleRate(i64),

    #[error("At least one detector is required")]
    NoDetectors,

    #[error("Chunk size must be between 1 and {max}, got {0}", max = MAX_CHUNK_SIZE)]
    InvalidChunkSize(usize),

    #[error("Queue depth must be at least 1, got {0}")]
    InvalidQueueDepth(usize),

    #[error(transparent)]
    Oscillator(#[from] OscillatorError),

    #[error("Cannot open output '{}': {source}", path.display())]
    OpenOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot start capture '{}': {source}", path.display())]
    Capture {
        path: PathBuf,
        #[source]
        source: CaptureError,
    },
}

fn rate_error(input: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidRate {
        input: input.to_string(),
        reason: reason.into(),
    }
}

/// Parse a frequency such as `20M`, `-5M`, `12.5k`, `2.4e6`, `1 GHz` or `100`
/// into whole Hz
///
/// Suffixes are `k`/`K`, `M` and `G`, optionally followed by `Hz`. The value
/// is evaluated exactly in decimal, so it must come out to a whole number
/// of Hz that fits an `i64`.
pub fn parse_rate(input: &str) -> Result<i64, ConfigError> {
    let mut s = input.trim();
    if let Some(stripped) = s.strip_suffix("Hz").or_else(|| s.strip_suffix("hz")) {
        s = stripped.trim_end();
    }

    let (number, scale) = match s.chars().last() {
        Some('k') | Some('K') => (&s[..s.len() - 1], 3),
        Some('M') => (&s[..s.len() - 1], 6),
        Some('G') => (&s[..s.len() - 1], 9),
        _ => (s, 0),
    };
    let number = number.trim_end();
    if number.is_empty() {
        return Err(rate_error(input, "missing number"));
    }

    let (digits, exponent) = parse_decimal(number).ok_or_else(|| rate_error(input, "not a number"))?;
    let exponent = exponent
        .checked_add(scale)
        .ok_or_else(|| rate_error(input, "out of range"))?;

    let value = if exponent >= 0 {
        10i128
            .checked_pow(exponent as u32)
            .and_then(|p| digits.checked_mul(p))
    } else {
        let divisor = 10i128
            .checked_pow(exponent.unsigned_abs())
            .ok_or_else(|| rate_error(input, "not a whole number of Hz"))?;
        if digits % divisor != 0 {
            return Err(rate_error(input, "not a whole number of Hz"));
        }
        Some(digits / divisor)
    };

    value
        .and_then(|v| i64::try_from(v).ok())
        .ok_or_else(|| rate_error(input, "out of range"))
}

/// Split a decimal literal into `(digits, power of ten)`
fn parse_decimal(s: &str) -> Option<(i128, i32)> {
    let (mantissa, exp) = match s.find(['e', 'E']) {
        Some(at) => (&s[..at], s[at + 1..].parse::<i32>().ok()?),
        None => (s, 0),
    };

    let (negative, mantissa) = match mantissa.as_bytes().first()? {
        b'-' => (true, &mantissa[1..]),
        b'+' => (false, &mantissa[1..]),
        _ => (false, mantissa),
    };

    let (whole, frac) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if whole.is_empty() && frac.is_empty() {
        return None;
    }

    let mut digits: i128 = 0;
    for c in whole.chars().chain(frac.chars()) {
        let d = c.to_digit(10)? as i128;
        digits = digits.checked_mul(10)?.checked_add(d)?;
    }
    if negative {
        digits = -digits;
    }

    let exp = exp.checked_sub(i32::try_from(frac.len()).ok()?)?;
    Some((digits, exp))
}

/// One detector: a frequency offset and where its branch goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorSpec {
    /// Shift frequency in Hz
    pub offset: i64,
    /// Capture file, or `None` to count and discard
    pub output: Option<PathBuf>,
}

impl DetectorSpec {
    pub fn new(offset: i64, output: Option<PathBuf>) -> Self {
        Self { offset, output }
    }

    /// Create the sink mode for this detector, opening its capture file
    pub fn open(&self, sample_rate: i64) -> Result<SinkMode, ConfigError> {
        let Some(path) = &self.output else {
            return Ok(SinkMode::Count);
        };

        let file = File::create(path).map_err(|source| ConfigError::OpenOutput {
            path: path.clone(),
            source,
        })?;
        let writer = PcapWriter::new(BufWriter::new(file), sample_rate.unsigned_abs())
            .map_err(|source| ConfigError::Capture {
                path: path.clone(),
                source,
            })?;
        Ok(SinkMode::Capture(Box::new(writer)))
    }
}

impl FromStr for DetectorSpec {
    type Err = ConfigError;

    /// `OFFSET[:PATH]`, e.g. `5M:up.pcap`, `-5M:down.pcap` or `0`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (offset, path) = match s.split_once(':') {
            Some((offset, path)) => (offset, Some(path)),
            None => (s, None),
        };

        let offset = parse_rate(offset).map_err(|e| ConfigError::InvalidDetector {
            input: s.to_string(),
            reason: e.to_string(),
        })?;

        let output = match path {
            Some("") => {
                return Err(ConfigError::InvalidDetector {
                    input: s.to_string(),
                    reason: "empty output path".to_string(),
                });
            }
            Some(path) => Some(PathBuf::from(path)),
            None => None,
        };

        Ok(Self { offset, output })
    }
}

impl fmt::Display for DetectorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.output {
            Some(path) => write!(f, "{:+} Hz -> {}", self.offset, path.display()),
            None => write!(f, "{:+} Hz -> (count only)", self.offset),
        }
    }
}

/// Everything needed to assemble one channelizer run
#[derive(Debug, Clone)]
pub struct ChannelizerConfig {
    /// Input sample rate in Hz
    pub sample_rate: i64,
    pub detectors: Vec<DetectorSpec>,
    /// Maximum samples per chunk
    pub chunk_size: usize,
    /// Stage queue depth, in chunks
    pub queue_depth: usize,
    pub narrowing: Narrowing,
    /// Chunks between source progress reports
    pub report_interval: u64,
}

impl ChannelizerConfig {
    pub fn new(sample_rate: i64, detectors: Vec<DetectorSpec>) -> Self {
        Self {
            sample_rate,
            detectors,
            chunk_size: DEFAULT_CHUNK_SIZE,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            narrowing: Narrowing::default(),
            report_interval: DEFAULT_REPORT_INTERVAL,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate <= 0 {
            return Err(ConfigError::InvalidSampleRate(self.sample_rate));
        }
        if self.detectors.is_empty() {
            return Err(ConfigError::NoDetectors);
        }
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::InvalidChunkSize(self.chunk_size));
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::InvalidQueueDepth(self.queue_depth));
        }
        for detector in &self.detectors {
            let len = OscillatorTable::period(detector.offset, self.sample_rate);
            if len > MAX_TABLE_LEN as u64 {
                return Err(OscillatorError::TableTooLarge {
                    shift_rate: detector.offset,
                    sample_rate: self.sample_rate,
                    len,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Open every detector's output, in detector order
    pub fn open_outputs(&self) -> Result<Vec<SinkMode>, ConfigError> {
        self.detectors
            .iter()
            .map(|d| d.open(self.sample_rate))
            .collect()
    }
}
