//! ofsmerge: merge a downlink and an uplink capture into one, time-ordered
//!
//! ```text
//! ofsmerge -o 1500 down.pcap up.pcap merged.pcap
//! ```

use clap::Parser;
use iq2pcap::{PcapReader, merge};
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Uplink capture offset from the downlink capture, in microseconds
    #[arg(short = 'o', long = "offset", default_value_t = 0, allow_hyphen_values = true)]
    offset: i64,

    /// Downlink capture
    downlink: PathBuf,

    /// Uplink capture
    uplink: PathBuf,

    /// Merged capture to create
    output: PathBuf,
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

    info!("=== ofsmerge ===");
    info!(
        "{} from {} and {} (uplink offset {} µs)",
        args.output.display(),
        args.downlink.display(),
        args.uplink.display(),
        args.offset
    );

    let downlink = PcapReader::new(BufReader::new(File::open(&args.downlink)?))?;
    let uplink = PcapReader::new(BufReader::new(File::open(&args.uplink)?))?;
    let output = BufWriter::new(File::create(&args.output)?);

    let summary = merge(downlink, uplink, output, args.offset)?;
    info!("Wrote {} records", summary.total());

    Ok(())
}
