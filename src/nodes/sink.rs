//! Terminal stage of a detector branch

use crate::capture::CaptureWriter;
use crate::runtime::node::{
    InputPort, OutputPort, PortSchema, ProcessNode, StageState, WorkError, WorkResult,
};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{error, info};

/// What a sink does with the chunks it receives
pub enum SinkMode {
    /// Count and discard
    Count,
    /// Hand every chunk to a capture writer
    Capture(Box<dyn CaptureWriter>),
}

impl fmt::Debug for SinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkMode::Count => write!(f, "Count"),
            SinkMode::Capture(_) => write!(f, "Capture"),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    chunks: AtomicU64,
    samples: AtomicU64,
    records: AtomicU64,
    write_failed: AtomicBool,
}

/// Live counters of one sink, shared with whoever wants to observe it
#[derive(Debug, Clone, Default)]
pub struct SinkStats {
    counters: Arc<Counters>,
}

/// Point-in-time copy of [`SinkStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkSnapshot {
    pub chunks: u64,
    pub samples: u64,
    pub records: u64,
    pub write_failed: bool,
}

impl SinkStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks(&self) -> u64 {
        self.counters.chunks.load(Ordering::Relaxed)
    }

    pub fn samples(&self) -> u64 {
        self.counters.samples.load(Ordering::Relaxed)
    }

    /// Records handed to the capture writer successfully
    pub fn records(&self) -> u64 {
        self.counters.records.load(Ordering::Relaxed)
    }

    pub fn write_failed(&self) -> bool {
        self.counters.write_failed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> SinkSnapshot {
        SinkSnapshot {
            chunks: self.chunks(),
            samples: self.samples(),
            records: self.records(),
            write_failed: self.write_failed(),
        }
    }
}

/// Consumes a branch until it is drained, optionally persisting it
///
/// A write failure is logged once; the writer is dropped and the sink keeps
/// draining as a counter so that upstream never blocks on it.
pub struct CaptureSink {
    name: String,
    state: StageState,
    mode: SinkMode,
    stats: SinkStats,
}

impl CaptureSink {
    pub fn new(name: impl Into<String>, mode: SinkMode) -> Self {
        Self {
            name: name.into(),
            state: StageState::Open,
            mode,
            stats: SinkStats::new(),
        }
    }

    pub fn counting(name: impl Into<String>) -> Self {
        Self::new(name, SinkMode::Count)
    }

    pub fn stats(&self) -> SinkStats {
        self.stats.clone()
    }

    fn fail_writer(&mut self, what: &str, e: impl fmt::Display) {
        error!(
            "[{}] Capture {} failed, discarding the rest of the stream: {}",
            self.name, what, e
        );
        self.stats.counters.write_failed.store(true, Ordering::Relaxed);
        self.mode = SinkMode::Count;
    }
}

impl ProcessNode for CaptureSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn num_outputs(&self) -> usize {
        0
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::input("in", 0)]
    }

    fn work(&mut self, inputs: &[InputPort], _outputs: &[OutputPort]) -> WorkResult<usize> {
        let Some(chunk) = inputs[0].get(&mut self.state).next_chunk() else {
            let flushed = match &mut self.mode {
                SinkMode::Capture(writer) => writer.finish(),
                SinkMode::Count => Ok(()),
            };
            if let Err(e) = flushed {
                self.fail_writer("flush", e);
            }
            info!(
                "[{}] Drained: {} samples in {} chunks, {} records written",
                self.name,
                self.stats.samples(),
                self.stats.chunks(),
                self.stats.records()
            );
            return Err(WorkError::Shutdown);
        };

        let n = chunk.len();
        let counters = &self.stats.counters;
        counters.chunks.fetch_add(1, Ordering::Relaxed);
        counters.samples.fetch_add(n as u64, Ordering::Relaxed);

        let written = match &mut self.mode {
            SinkMode::Capture(writer) => Some(writer.write_chunk(&chunk)),
            SinkMode::Count => None,
        };
        match written {
            Some(Ok(())) => {
                self.stats.counters.records.fetch_add(1, Ordering::Relaxed);
            }
            Some(Err(e)) => self.fail_writer("write", e),
            None => {}
        }

        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureError, PcapReader, PcapWriter};
    use crate::runtime::sample::{Chunk, Sample};
    use crate::runtime::sender::{CloseHandle, Message};
    use crossbeam_channel::bounded;
    use std::io::{self, Cursor, Write};
    use std::sync::Mutex;
    use std::time::Duration;

    fn chunk(len: usize) -> Chunk {
        Chunk::new(vec![Sample::new(len as i8, -1); len])
    }

    fn drain(sink: &mut CaptureSink, messages: Vec<Message>) {
        let (tx, rx) = bounded(messages.len().max(1));
        for m in messages {
            tx.send(m).unwrap();
        }
        let inputs = [InputPort::new(rx)];
        while sink.work(&inputs, &[]).is_ok() {}
    }

    #[test]
    fn test_counting_sink_drains_after_close_request() {
        let mut sink = CaptureSink::counting("sink");
        let stats = sink.stats();

        let (tx, rx) = bounded(8);
        tx.send(Message::Data(chunk(3))).unwrap();
        tx.send(Message::Data(chunk(5))).unwrap();
        assert!(CloseHandle::new("sink", tx.clone()).request_close());
        tx.send(Message::Data(chunk(2))).unwrap();

        let inputs = [InputPort::new(rx)];
        while sink.work(&inputs, &[]).is_ok() {}

        assert_eq!(
            stats.snapshot(),
            SinkSnapshot {
                chunks: 3,
                samples: 10,
                records: 0,
                write_failed: false,
            }
        );
    }

    /// Vec writer that stays inspectable after the sink drops it
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_capture_sink_writes_one_record_per_chunk() {
        let buf = SharedBuf::default();
        let writer = PcapWriter::with_start_time(buf.clone(), 1000, Duration::ZERO).unwrap();
        let mut sink = CaptureSink::new("sink", SinkMode::Capture(Box::new(writer)));
        let stats = sink.stats();

        drain(
            &mut sink,
            vec![
                Message::Data(chunk(2)),
                Message::Data(chunk(4)),
                Message::Data(Chunk::sentinel()),
            ],
        );

        assert_eq!(stats.records(), 2);
        let bytes = buf.0.lock().unwrap().clone();
        let lengths: Vec<usize> = PcapReader::new(Cursor::new(bytes))
            .unwrap()
            .map(|r| r.unwrap().samples().len())
            .collect();
        assert_eq!(lengths, vec![2, 4]);
    }

    struct FailingWriter {
        remaining: usize,
    }

    impl CaptureWriter for FailingWriter {
        fn write_chunk(&mut self, _chunk: &Chunk) -> Result<(), CaptureError> {
            if self.remaining == 0 {
                return Err(CaptureError::Io(io::Error::other("disk full")));
            }
            self.remaining -= 1;
            Ok(())
        }

        fn finish(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_keeps_draining() {
        let mut sink = CaptureSink::new(
            "sink",
            SinkMode::Capture(Box::new(FailingWriter { remaining: 1 })),
        );
        let stats = sink.stats();

        drain(
            &mut sink,
            vec![
                Message::Data(chunk(1)),
                Message::Data(chunk(1)),
                Message::Data(chunk(1)),
                Message::Data(Chunk::sentinel()),
            ],
        );

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.chunks, 3);
        assert_eq!(snapshot.records, 1);
        assert!(snapshot.write_failed);
        assert!(matches!(sink.mode, SinkMode::Count));
    }
}
