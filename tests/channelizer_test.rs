//! End-to-end runs: raw bytes in, pcap files out

use crossbeam_channel::never;
use iq2pcap::{
    Channelizer, ChannelizerConfig, DetectorSpec, PcapReader, Sample, SourceEvent, StopTrigger,
};
use std::fs::File;
use std::io::Cursor;
use std::path::Path;

fn read_capture(path: &Path) -> Vec<Vec<Sample>> {
    PcapReader::new(File::open(path).unwrap())
        .unwrap()
        .map(|record| record.unwrap().samples())
        .collect()
}

#[test]
fn zero_shift_at_unit_rate_is_identity() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identity.pcap");

    let config = ChannelizerConfig::new(
        1,
        vec![format!("0:{}", path.display()).parse().unwrap()],
    );
    let input = Cursor::new(vec![0x01, 0x02, 0x7F, 0x80]);
    let summary = Channelizer::assemble(&config, input).unwrap().run(&never());

    assert_eq!(summary.trigger, StopTrigger::EndOfStream);
    assert!(summary.is_clean());

    let samples: Vec<Sample> = read_capture(&path).into_iter().flatten().collect();
    assert_eq!(samples, vec![Sample::new(1, 2), Sample::new(127, -128)]);
}

#[test]
fn opposite_quarter_rate_shifts_see_same_stream() {
    let dir = tempfile::tempdir().unwrap();
    let up = dir.path().join("up.pcap");
    let down = dir.path().join("down.pcap");

    let mut config = ChannelizerConfig::new(
        20_000_000,
        vec![
            DetectorSpec::new(5_000_000, Some(up.clone())),
            DetectorSpec::new(-5_000_000, Some(down.clone())),
        ],
    );
    config.chunk_size = 7;

    // Constant (10, 0) carrier
    let input: Vec<u8> = [10u8, 0].repeat(50);
    let summary = Channelizer::assemble(&config, Cursor::new(input))
        .unwrap()
        .run(&never());
    assert!(summary.is_clean());

    let up_records = read_capture(&up);
    let down_records = read_capture(&down);

    // Same chunking on both branches
    let lengths = |records: &[Vec<Sample>]| records.iter().map(Vec::len).collect::<Vec<_>>();
    assert_eq!(lengths(&up_records), lengths(&down_records));
    assert_eq!(lengths(&up_records).iter().sum::<usize>(), 50);

    let up: Vec<Sample> = up_records.into_iter().flatten().collect();
    let down: Vec<Sample> = down_records.into_iter().flatten().collect();

    let s = Sample::new;
    // Period 4, phase continuous across the 7-sample chunks
    for k in 0..50 {
        let expected_up = [s(10, 0), s(0, -10), s(-10, 0), s(0, 10)][k % 4];
        let expected_down = [s(10, 0), s(0, 10), s(-10, 0), s(0, -10)][k % 4];
        assert_eq!(up[k], expected_up, "up sample {}", k);
        assert_eq!(down[k], expected_down, "down sample {}", k);
    }
}

#[test]
fn every_branch_conserves_samples_and_timestamps_increase() {
    let dir = tempfile::tempdir().unwrap();
    let paths: Vec<_> = (0..3)
        .map(|i| dir.path().join(format!("d{}.pcap", i)))
        .collect();

    let mut config = ChannelizerConfig::new(
        48_000,
        vec![
            DetectorSpec::new(12_000, Some(paths[0].clone())),
            DetectorSpec::new(-7_000, Some(paths[1].clone())),
            DetectorSpec::new(0, None),
            DetectorSpec::new(1_000, Some(paths[2].clone())),
        ],
    );
    config.chunk_size = 100;
    config.queue_depth = 1;

    // Odd length: the final byte is dropped
    let input: Vec<u8> = (0..=255u8).cycle().take(20_001).collect();
    let summary = Channelizer::assemble(&config, Cursor::new(input))
        .unwrap()
        .run(&never());

    assert_eq!(summary.source_event, Some(SourceEvent::EndOfStream));
    assert_eq!(summary.detectors.len(), 4);
    for detector in &summary.detectors {
        assert_eq!(detector.stats.samples, 10_000);
        assert!(!detector.stats.write_failed);
    }
    assert_eq!(summary.detectors[2].stats.records, 0);

    for path in &paths {
        let reader = PcapReader::new(File::open(path).unwrap()).unwrap();
        let records: Vec<_> = reader.map(|r| r.unwrap()).collect();
        assert_eq!(records.iter().map(|r| r.data.len()).sum::<usize>(), 20_000);
        assert!(records.iter().all(|r| r.data.len() <= 200));
        assert!(
            records
                .windows(2)
                .all(|w| w[0].timestamp_micros() <= w[1].timestamp_micros())
        );
    }
}
