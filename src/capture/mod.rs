//! Capture-file output for detector branches, and merging of captures

pub mod merge;
pub mod pcap;

use crate::runtime::sample::Chunk;

pub use merge::{Direction, MergeSummary, merge};
pub use pcap::{PcapHeader, PcapReader, PcapRecord, PcapRecordWriter, PcapWriter};

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a little-endian pcap file (magic {0:#010x})")]
    BadMagic(u32),

    #[error("Record of {len} bytes exceeds snaplen {snaplen}")]
    RecordTooLarge { len: usize, snaplen: u32 },

    #[error("Capture file ends in the middle of a record")]
    Truncated,

    #[error("Sample rate must be positive")]
    InvalidSampleRate,

    #[error("Timestamp {0} µs is outside the pcap range")]
    TimestampOutOfRange(i64),
}

/// Destination for the chunks reaching a sink
///
/// One call per data chunk, in stream order. `finish` is called once after
/// the last chunk and must flush anything buffered.
pub trait CaptureWriter: Send {
    fn write_chunk(&mut self, chunk: &Chunk) -> Result<(), CaptureError>;

    fn finish(&mut self) -> Result<(), CaptureError>;
}
