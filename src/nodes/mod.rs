//! Pipeline stages
//!
//! - **IqSource**: decodes raw interleaved I/Q bytes into chunks
//! - **Tee**: duplicates one chunk stream into two
//! - **Shift**: frequency-translates a chunk stream
//! - **CaptureSink**: counts a stream or writes it to a capture file
//!
//! Every stage owns its [`StageState`](crate::runtime::StageState), so a
//! close request is honoured only after everything queued ahead of it has
//! been forwarded.

mod shift;
mod sink;
mod source;
mod tee;

pub use shift::Shift;
pub use sink::{CaptureSink, SinkMode, SinkSnapshot, SinkStats};
pub use source::{DEFAULT_CHUNK_SIZE, DEFAULT_REPORT_INTERVAL, InputCloser, IqSource, SourceEvent};
pub use tee::Tee;
