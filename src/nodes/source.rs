//! Raw interleaved I/Q byte source
//!
//! A reader thread pulls slices of up to `2 * chunk_size` bytes from the
//! input and hands them over on a channel. The source decodes byte pairs into
//! samples and emits one chunk per slice. A slice that ends on an odd byte
//! carries it over to pair with the next one; at the end of the stream a
//! dangling byte is dropped.
//!
//! The source finishes in one of four ways, reported on its event channel:
//! the input runs out, a read fails, the downstream queue goes away, or the
//! [`InputCloser`] is triggered. Every one of them ends with the sentinel on
//! the output queue (when there is still someone to receive it). A close
//! never waits for the input: a reader blocked in `read` is left behind.

use crate::runtime::node::{InputPort, OutputPort, PortSchema, ProcessNode, WorkError, WorkResult};
use crate::runtime::sample::{Chunk, Sample};
use crossbeam_channel::{Receiver as CrossbeamReceiver, Sender as CrossbeamSender, bounded, select};
use std::fmt;
use std::io::{self, ErrorKind, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{debug, info, trace, warn};

/// Default number of samples per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Default number of chunks between sample count reports
pub const DEFAULT_REPORT_INTERVAL: u64 = 4096;

/// How the source finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// The input reported end of stream
    EndOfStream,
    /// A read failed with something other than an interruption
    ReadFailed(String),
    /// The output queue was disconnected
    DownstreamClosed,
    /// The input was closed through its [`InputCloser`]
    Closed,
}

impl fmt::Display for SourceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceEvent::EndOfStream => write!(f, "end of stream"),
            SourceEvent::ReadFailed(e) => write!(f, "read failed: {}", e),
            SourceEvent::DownstreamClosed => write!(f, "downstream closed"),
            SourceEvent::Closed => write!(f, "input closed"),
        }
    }
}

/// Orderly external close of a source's input
///
/// Wakes a source waiting on its input, so the close takes effect even while
/// a read is blocked.
#[derive(Debug, Clone)]
pub struct InputCloser {
    closed: Arc<AtomicBool>,
    wake: CrossbeamSender<()>,
}

impl InputCloser {
    fn pair() -> (Self, CrossbeamReceiver<()>) {
        let (wake, woken) = bounded(1);
        let closer = Self {
            closed: Arc::new(AtomicBool::new(false)),
            wake,
        };
        (closer, woken)
    }

    /// Close the input. Returns true on the first call only.
    pub fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        if first {
            let _ = self.wake.try_send(());
        }
        first
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// One result of the reader thread
#[derive(Debug)]
enum ReadOutcome {
    Data(Vec<u8>),
    End,
    Failed(String),
}

fn read_input<R: Read>(name: &str, mut input: R, capacity: usize, tx: CrossbeamSender<ReadOutcome>) {
    loop {
        let mut buf = vec![0u8; capacity];
        let outcome = match input.read(&mut buf) {
            Ok(0) => ReadOutcome::End,
            Ok(n) => {
                buf.truncate(n);
                ReadOutcome::Data(buf)
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => ReadOutcome::Failed(e.to_string()),
        };

        let last = !matches!(outcome, ReadOutcome::Data(_));
        if tx.send(outcome).is_err() {
            trace!("[{}] Source gone, reader exiting", name);
            return;
        }
        if last {
            return;
        }
    }
}

/// Source stage decoding interleaved signed 8-bit I/Q pairs
pub struct IqSource<R: Read + Send + 'static> {
    name: String,
    input: Option<R>,
    reads: Option<CrossbeamReceiver<ReadOutcome>>,
    chunk_size: usize,
    carry: Option<u8>,
    closer: InputCloser,
    woken: CrossbeamReceiver<()>,
    events_tx: CrossbeamSender<SourceEvent>,
    events_rx: CrossbeamReceiver<SourceEvent>,
    report_interval: u64,
    chunks: u64,
    samples: u64,
}

impl<R: Read + Send + 'static> IqSource<R> {
    /// Create a source emitting chunks of at most `chunk_size` samples
    pub fn new(name: impl Into<String>, input: R, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        // One terminal event per run; room for a few so try_send never fails
        let (events_tx, events_rx) = bounded(4);
        let (closer, woken) = InputCloser::pair();
        Self {
            name: name.into(),
            input: Some(input),
            reads: None,
            chunk_size,
            carry: None,
            closer,
            woken,
            events_tx,
            events_rx,
            report_interval: DEFAULT_REPORT_INTERVAL,
            chunks: 0,
            samples: 0,
        }
    }

    /// Set how many chunks pass between sample count reports
    pub fn with_report_interval(mut self, chunks: u64) -> Self {
        self.report_interval = chunks.max(1);
        self
    }

    /// Handle for closing the input from another thread
    pub fn closer(&self) -> InputCloser {
        self.closer.clone()
    }

    /// Receiver for the terminal [`SourceEvent`]
    pub fn events(&self) -> CrossbeamReceiver<SourceEvent> {
        self.events_rx.clone()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Samples emitted so far
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Start the reader thread on first use
    fn reads(&mut self) -> io::Result<Option<CrossbeamReceiver<ReadOutcome>>> {
        if let Some(input) = self.input.take() {
            let (tx, rx) = bounded(1);
            let name = self.name.clone();
            let capacity = self.chunk_size * 2;
            thread::Builder::new()
                .name(format!("{}-reader", self.name))
                .spawn(move || read_input(&name, input, capacity, tx))?;
            self.reads = Some(rx);
        }
        Ok(self.reads.clone())
    }

    fn finish(&mut self, output: &OutputPort, event: SourceEvent) -> WorkError {
        if self.reads.take().is_some() && event == SourceEvent::Closed {
            debug!("[{}] Leaving the reader behind", self.name);
        }
        if let Some(byte) = self.carry.take() {
            trace!("[{}] Dropping trailing odd byte {:#04x}", self.name, byte);
        }

        if event != SourceEvent::DownstreamClosed && !output.get().close() {
            debug!("[{}] Sentinel not delivered, downstream already gone", self.name);
        }

        info!(
            "[{}] Finished ({}): {} samples in {} chunks",
            self.name, event, self.samples, self.chunks
        );

        if self.events_tx.try_send(event).is_err() {
            warn!("[{}] Source event dropped", self.name);
        }
        WorkError::Shutdown
    }

    fn decode(&mut self, data: &[u8]) -> Chunk {
        let mut bytes = Vec::with_capacity(data.len() + 1);
        bytes.extend(self.carry.take());
        bytes.extend_from_slice(data);

        self.carry = (bytes.len() % 2 == 1).then(|| bytes[bytes.len() - 1]);
        bytes
            .chunks_exact(2)
            .map(|pair| Sample::from_bytes(pair[0], pair[1]))
            .collect::<Vec<_>>()
            .into()
    }
}

impl<R: Read + Send + 'static> ProcessNode for IqSource<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_inputs(&self) -> usize {
        0
    }

    fn num_outputs(&self) -> usize {
        1
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::output("out", 0)]
    }

    fn work(&mut self, _inputs: &[InputPort], outputs: &[OutputPort]) -> WorkResult<usize> {
        let output = &outputs[0];

        if self.closer.is_closed() {
            return Err(self.finish(output, SourceEvent::Closed));
        }

        let reads = match self.reads() {
            Ok(Some(reads)) => reads,
            Ok(None) => return Err(WorkError::Shutdown),
            Err(e) => {
                warn!("[{}] Cannot start reader: {}", self.name, e);
                return Err(self.finish(output, SourceEvent::ReadFailed(e.to_string())));
            }
        };

        let woken = self.woken.clone();
        let outcome = select! {
            recv(woken) -> _ => None,
            recv(reads) -> outcome => Some(outcome),
        };

        let data = match outcome {
            None => return Err(self.finish(output, SourceEvent::Closed)),
            Some(Ok(ReadOutcome::Data(data))) => data,
            Some(Ok(ReadOutcome::End)) => {
                return Err(self.finish(output, SourceEvent::EndOfStream));
            }
            Some(Ok(ReadOutcome::Failed(e))) => {
                warn!("[{}] Read failed: {}", self.name, e);
                return Err(self.finish(output, SourceEvent::ReadFailed(e)));
            }
            Some(Err(_)) => {
                warn!("[{}] Reader thread exited", self.name);
                let reason = "reader thread exited".to_string();
                return Err(self.finish(output, SourceEvent::ReadFailed(reason)));
            }
        };

        let chunk = self.decode(&data);
        if chunk.is_empty() {
            // A single byte so far, waiting for its partner
            return Ok(0);
        }

        let n = chunk.len();
        if output.get().send(chunk).is_err() {
            warn!("[{}] Output queue disconnected", self.name);
            return Err(self.finish(output, SourceEvent::DownstreamClosed));
        }

        self.chunks += 1;
        self.samples += n as u64;
        if self.chunks % self.report_interval == 0 {
            debug!("[{}] {} samples read", self.name, self.samples);
        }

        Ok(n)
    }
}
