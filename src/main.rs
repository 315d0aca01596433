//! iq2pcap: split a raw 8-bit I/Q stream into frequency-shifted pcap captures
//!
//! ```text
//! rtl_sdr -s 2.4M -f 433.9M - | iq2pcap -r 2.4M -d 100k:a.pcap -d -250k:b.pcap
//! ```

use clap::Parser;
use iq2pcap::{Channelizer, ChannelizerConfig, DetectorSpec, Narrowing, parse_rate};
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input sample rate, e.g. 20M or 2.4e6
    #[arg(short = 'r', long, value_parser = parse_rate_arg)]
    sample_rate: i64,

    /// Detector as OFFSET[:PATH], e.g. 5M:up.pcap or -5M:down.pcap (repeatable;
    /// without a path the branch is only counted)
    #[arg(short, long = "detector", required = true, allow_hyphen_values = true)]
    detectors: Vec<DetectorSpec>,

    /// Raw interleaved I/Q input file (stdin if omitted)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Maximum samples per chunk
    #[arg(long, default_value_t = iq2pcap::nodes::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Stage queue depth, in chunks
    #[arg(long, default_value_t = iq2pcap::runtime::DEFAULT_QUEUE_DEPTH)]
    queue_depth: usize,

    /// How mixer products are narrowed to 8 bits: wrap or saturate
    #[arg(long, default_value_t = Narrowing::Wrap)]
    narrowing: Narrowing,
}

fn parse_rate_arg(s: &str) -> Result<i64, String> {
    parse_rate(s).map_err(|e| e.to_string())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    info!("=== iq2pcap ===");
    info!("Sample rate: {} Hz", args.sample_rate);
    for detector in &args.detectors {
        info!("Detector: {}", detector);
    }

    let mut config = ChannelizerConfig::new(args.sample_rate, args.detectors);
    config.chunk_size = args.chunk_size;
    config.queue_depth = args.queue_depth;
    config.narrowing = args.narrowing;

    let input: Box<dyn Read + Send> = match &args.input {
        Some(path) => {
            info!("Input: {}", path.display());
            Box::new(File::open(path)?)
        }
        None => {
            info!("Input: stdin");
            Box::new(io::stdin())
        }
    };

    let (interrupt_tx, interrupt_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(());
    })?;

    // Outputs are opened here, before any worker starts
    let channelizer = Channelizer::assemble(&config, input)?;

    let summary = channelizer.run(&interrupt_rx);

    info!("Stopped on {}", summary.trigger);
    for name in &summary.panicked {
        warn!("Worker '{}' panicked", name);
    }
    for detector in &summary.detectors {
        if detector.stats.write_failed {
            warn!("Capture for {} is incomplete", detector.detector);
        }
    }

    Ok(())
}
