//! Raw I/Q stream channelizer with pcap output
//!
//! Reads interleaved signed 8-bit I/Q samples, splits them into one branch
//! per detector, frequency-shifts each branch by the detector's offset and
//! writes it out as a timestamped pcap capture.
//!
//! # Architecture
//!
//! - **IqSource**: decodes the byte stream into chunks of samples
//! - **Tee**: cascaded two-way fan-out, one per extra detector
//! - **Shift**: lookup-table complex mixer, one per detector
//! - **CaptureSink**: pcap writer (or plain counter), one per detector
//! - **Scheduler**: one thread per stage, bounded queues between them
//!
//! Shutdown is a two-phase close: a stage asked to close keeps forwarding
//! everything already queued and only then passes the sentinel on.
//!
//! # Example
//!
//! ```no_run
//! use iq2pcap::{Channelizer, ChannelizerConfig, DetectorSpec};
//!
//! let config = ChannelizerConfig::new(
//!     20_000_000,
//!     vec!["5M:up.pcap".parse()?, "-5M:down.pcap".parse()?],
//! );
//! let input = std::fs::File::open("capture.iq")?;
//! let channelizer = Channelizer::assemble(&config, input)?;
//! let summary = channelizer.run(&crossbeam_channel::never());
//! println!("stopped on {}", summary.trigger);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use thiserror::Error;

pub mod capture;
pub mod channelizer;
pub mod config;
pub mod dsp;
pub mod nodes;
pub mod runtime;

pub use capture::{
    CaptureError, CaptureWriter, MergeSummary, PcapReader, PcapRecordWriter, PcapWriter, merge,
};
pub use channelizer::{Channelizer, DetectorSummary, RunState, RunSummary, StopTrigger};
pub use config::{ChannelizerConfig, ConfigError, DetectorSpec, parse_rate};
pub use dsp::{Narrowing, OscillatorError, OscillatorTable};
pub use nodes::{CaptureSink, InputCloser, IqSource, Shift, SinkMode, SinkStats, SourceEvent, Tee};
pub use runtime::{
    Chunk, ConnectionError, InputPort, OutputPort, Pipeline, PortDirection, PortSchema,
    ProcessNode, Sample, Scheduler, WorkError, WorkResult,
};

#[derive(Error, Debug)]
pub enum Iq2PcapError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Oscillator error: {0}")]
    Oscillator(#[from] OscillatorError),

    #[error("Pipeline error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("{detectors} detectors but {sinks} sinks")]
    SinkCount { detectors: usize, sinks: usize },
}

pub type Result<T> = std::result::Result<T, Iq2PcapError>;
