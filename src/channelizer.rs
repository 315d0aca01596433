//! Pipeline assembly and shutdown orchestration
//!
//! For N detectors the graph is
//!
//! ```text
//! source ─► tee0 ─a─► shift0 ─► sink0
//!            └─b─► tee1 ─a─► shift1 ─► sink1
//!                   └─b─► ...
//!                          └─b─► shift{N-1} ─► sink{N-1}
//! ```
//!
//! i.e. `1 + (N-1) + N + N` workers. The controller waits for either an
//! interrupt or the source finishing on its own, closes the input and then
//! waits for every worker. Close requests travel down the graph as each
//! stage exits.

use crate::Iq2PcapError;
use crate::config::{ChannelizerConfig, DetectorSpec};
use crate::dsp::OscillatorTable;
use crate::nodes::{
    CaptureSink, InputCloser, IqSource, Shift, SinkMode, SinkSnapshot, SinkStats, SourceEvent, Tee,
};
use crate::runtime::{Pipeline, Scheduler};
use crossbeam_channel::{Receiver as CrossbeamReceiver, select};
use std::fmt;
use std::io::Read;
use tracing::{debug, info, warn};

/// Lifecycle of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Building,
    Running,
    Draining,
    Stopped,
}

/// What moved the run from `Running` to `Draining`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopTrigger {
    /// SIGINT or SIGTERM
    Interrupt,
    /// The input ran out
    EndOfStream,
    /// Reading the input failed
    ReadFailed(String),
    /// The first stage after the source went away
    DownstreamClosed,
    /// The input was closed from outside the controller
    InputClosed,
    /// Nothing can deliver an interrupt any more
    InterruptChannelClosed,
    /// The source exited without reporting why
    SourceExited,
}

impl From<SourceEvent> for StopTrigger {
    fn from(event: SourceEvent) -> Self {
        match event {
            SourceEvent::EndOfStream => StopTrigger::EndOfStream,
            SourceEvent::ReadFailed(e) => StopTrigger::ReadFailed(e),
            SourceEvent::DownstreamClosed => StopTrigger::DownstreamClosed,
            SourceEvent::Closed => StopTrigger::InputClosed,
        }
    }
}

impl fmt::Display for StopTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopTrigger::Interrupt => write!(f, "interrupt"),
            StopTrigger::EndOfStream => write!(f, "end of stream"),
            StopTrigger::ReadFailed(e) => write!(f, "read failed: {}", e),
            StopTrigger::DownstreamClosed => write!(f, "downstream closed"),
            StopTrigger::InputClosed => write!(f, "input closed"),
            StopTrigger::InterruptChannelClosed => write!(f, "interrupt channel closed"),
            StopTrigger::SourceExited => write!(f, "source exited"),
        }
    }
}

/// Final counters of one detector branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorSummary {
    pub detector: DetectorSpec,
    pub stats: SinkSnapshot,
}

/// Outcome of [`Channelizer::run`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub trigger: StopTrigger,
    /// How the source itself finished, if it said so
    pub source_event: Option<SourceEvent>,
    pub detectors: Vec<DetectorSummary>,
    /// Workers that panicked
    pub panicked: Vec<String>,
}

impl RunSummary {
    /// True when every worker exited normally and every capture was written
    pub fn is_clean(&self) -> bool {
        self.panicked.is_empty() && self.detectors.iter().all(|d| !d.stats.write_failed)
    }
}

/// A running channelizer graph and its controller
pub struct Channelizer {
    state: RunState,
    scheduler: Scheduler,
    closer: InputCloser,
    events: CrossbeamReceiver<SourceEvent>,
    detectors: Vec<(DetectorSpec, SinkStats)>,
}

impl Channelizer {
    /// Validate `config`, open every output and start the graph on `input`
    pub fn assemble<R: Read + Send + 'static>(
        config: &ChannelizerConfig,
        input: R,
    ) -> Result<Self, Iq2PcapError> {
        config.validate()?;
        let sinks = config.open_outputs()?;
        Self::start(config, input, sinks)
    }

    /// Like [`Channelizer::assemble`], with one caller-supplied sink mode per
    /// detector instead of opening the configured outputs
    pub fn assemble_with_sinks<R: Read + Send + 'static>(
        config: &ChannelizerConfig,
        input: R,
        sinks: Vec<SinkMode>,
    ) -> Result<Self, Iq2PcapError> {
        config.validate()?;
        Self::start(config, input, sinks)
    }

    /// Build and start the graph from an already validated `config`
    fn start<R: Read + Send + 'static>(
        config: &ChannelizerConfig,
        input: R,
        sinks: Vec<SinkMode>,
    ) -> Result<Self, Iq2PcapError> {
        info!("Channelizer: {:?}", RunState::Building);
        if sinks.len() != config.detectors.len() {
            return Err(Iq2PcapError::SinkCount {
                detectors: config.detectors.len(),
                sinks: sinks.len(),
            });
        }

        // Tables first: nothing is spawned if one cannot be built
        let tables = config
            .detectors
            .iter()
            .map(|d| OscillatorTable::new(d.offset, config.sample_rate))
            .collect::<Result<Vec<_>, _>>()?;

        let source = IqSource::new("source", input, config.chunk_size)
            .with_report_interval(config.report_interval);
        let closer = source.closer();
        let events = source.events();

        let mut pipeline = Pipeline::new().with_default_buffer_size(config.queue_depth);
        pipeline.add_process("source", source)?;

        let last = config.detectors.len() - 1;
        let mut upstream = ("source".to_string(), "out");
        let mut detectors = Vec::with_capacity(config.detectors.len());

        for (i, ((detector, table), mode)) in config
            .detectors
            .iter()
            .zip(tables)
            .zip(sinks)
            .enumerate()
        {
            let branch = if i < last {
                let tee = format!("tee{}", i);
                pipeline.add_process(tee.clone(), Tee::new(tee.clone()))?;
                pipeline.connect(&upstream.0, upstream.1, &tee, "in")?;
                upstream = (tee.clone(), "b");
                (tee, "a")
            } else {
                upstream.clone()
            };

            let shift = format!("shift{}", i);
            let sink = format!("sink{}", i);
            debug!(
                "Detector {}: {} ({}-entry table)",
                i,
                detector,
                table.len()
            );

            pipeline.add_process(shift.clone(), Shift::new(shift.clone(), table, config.narrowing))?;
            let capture = CaptureSink::new(sink.clone(), mode);
            detectors.push((detector.clone(), capture.stats()));
            pipeline.add_process(sink.clone(), capture)?;

            pipeline.connect(&branch.0, branch.1, &shift, "in")?;
            pipeline.connect(&shift, "out", &sink, "in")?;
        }

        let scheduler = pipeline.build()?;
        info!(
            "Channelizer: {} detectors at {} Hz on {} workers",
            detectors.len(),
            config.sample_rate,
            scheduler.num_threads()
        );

        let mut channelizer = Self {
            state: RunState::Building,
            scheduler,
            closer,
            events,
            detectors,
        };
        channelizer.transition(RunState::Running);
        Ok(channelizer)
    }

    fn transition(&mut self, to: RunState) {
        info!("Channelizer: {:?} -> {:?}", self.state, to);
        self.state = to;
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Number of worker threads in the graph
    pub fn num_workers(&self) -> usize {
        self.scheduler.num_threads()
    }

    pub fn worker_names(&self) -> Vec<String> {
        self.scheduler.thread_names()
    }

    /// Handle for closing the input from elsewhere
    pub fn closer(&self) -> InputCloser {
        self.closer.clone()
    }

    /// Live counters per detector, in detector order
    pub fn stats(&self) -> Vec<SinkStats> {
        self.detectors.iter().map(|(_, s)| s.clone()).collect()
    }

    /// Run until an interrupt arrives or the source finishes, then drain
    ///
    /// Returns only after every worker has exited.
    pub fn run(mut self, interrupt: &CrossbeamReceiver<()>) -> RunSummary {
        let mut source_event = None;

        let trigger = select! {
            recv(interrupt) -> msg => match msg {
                Ok(()) => StopTrigger::Interrupt,
                Err(_) => {
                    warn!("Channelizer: interrupt channel closed");
                    StopTrigger::InterruptChannelClosed
                }
            },
            recv(self.events) -> event => match event {
                Ok(event) => {
                    source_event = Some(event.clone());
                    event.into()
                }
                Err(_) => StopTrigger::SourceExited,
            },
        };
        info!("Channelizer: stopping on {}", trigger);

        self.transition(RunState::Draining);
        if self.closer.close() {
            debug!("Channelizer: input closed");
        }

        let Channelizer {
            scheduler,
            events,
            detectors,
            ..
        } = self;
        let report = scheduler.wait();

        if source_event.is_none() {
            source_event = events.try_recv().ok();
        }

        info!("Channelizer: {:?} -> {:?}", RunState::Draining, RunState::Stopped);

        let detectors = detectors
            .into_iter()
            .map(|(detector, stats)| {
                let stats = stats.snapshot();
                info!(
                    "Detector {}: {} samples in {} chunks, {} records",
                    detector, stats.samples, stats.chunks, stats.records
                );
                DetectorSummary { detector, stats }
            })
            .collect();

        RunSummary {
            trigger,
            source_event,
            detectors,
            panicked: report.panicked,
        }
    }
}
