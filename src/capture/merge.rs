//! Time-ordered merge of a downlink and an uplink capture
//!
//! The uplink capture is shifted by a fixed offset and interleaved with the
//! downlink one, earliest record first. Output timestamps are cut to a 10 µs
//! grid; uplink records sit 5 µs into their grid cell so the two directions
//! can be told apart and never share a timestamp.

use super::CaptureError;
use super::pcap::{PcapReader, PcapRecord, PcapRecordWriter};
use std::fmt;
use std::io::{Read, Write};
use tracing::{debug, info};

/// Grid the merged timestamps are truncated to
pub const MERGE_RESOLUTION_MICROS: i64 = 10;

/// Position of uplink records within a grid cell
pub const UPLINK_NUDGE_MICROS: i64 = 5;

const MICROS_PER_SEC: i64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Downlink,
    Uplink,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Downlink => write!(f, "downlink"),
            Direction::Uplink => write!(f, "uplink"),
        }
    }
}

/// Record counts of a finished merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub downlink: u64,
    pub uplink: u64,
}

impl MergeSummary {
    pub fn total(&self) -> u64 {
        self.downlink + self.uplink
    }
}

fn grid(micros: i64) -> i64 {
    micros.div_euclid(MERGE_RESOLUTION_MICROS) * MERGE_RESOLUTION_MICROS
}

fn restamp(mut record: PcapRecord, micros: i64) -> Result<PcapRecord, CaptureError> {
    let secs = micros.div_euclid(MICROS_PER_SEC);
    let ts_sec = u32::try_from(secs).map_err(|_| CaptureError::TimestampOutOfRange(micros))?;
    record.ts_sec = ts_sec;
    record.ts_usec = micros.rem_euclid(MICROS_PER_SEC) as u32;
    Ok(record)
}

/// Merge `downlink` and `uplink` into `out`, uplink shifted by
/// `uplink_offset_micros`
///
/// A downlink record goes first only when it is strictly earlier than the
/// shifted uplink record; ties go to the uplink.
pub fn merge<D: Read, U: Read, W: Write>(
    mut downlink: PcapReader<D>,
    mut uplink: PcapReader<U>,
    out: W,
    uplink_offset_micros: i64,
) -> Result<MergeSummary, CaptureError> {
    let mut writer = PcapRecordWriter::new(out)?;
    let mut summary = MergeSummary::default();

    let shifted = |record: &PcapRecord| {
        (record.timestamp_micros() as i64)
            .checked_add(uplink_offset_micros)
            .ok_or(CaptureError::TimestampOutOfRange(i64::MAX))
    };

    let mut next_down = downlink.next_record()?;
    let mut next_up = uplink.next_record()?;

    loop {
        let direction = match (&next_down, &next_up) {
            (None, None) => break,
            (Some(_), None) => Direction::Downlink,
            (None, Some(_)) => Direction::Uplink,
            (Some(d), Some(u)) => {
                if (d.timestamp_micros() as i64) < shifted(u)? {
                    Direction::Downlink
                } else {
                    Direction::Uplink
                }
            }
        };

        let record = match direction {
            Direction::Downlink => {
                let Some(record) = next_down.take() else { break };
                next_down = downlink.next_record()?;
                let micros = grid(record.timestamp_micros() as i64);
                summary.downlink += 1;
                restamp(record, micros)?
            }
            Direction::Uplink => {
                let Some(record) = next_up.take() else { break };
                next_up = uplink.next_record()?;
                let micros = grid(shifted(&record)?) + UPLINK_NUDGE_MICROS;
                summary.uplink += 1;
                restamp(record, micros)?
            }
        };

        debug!(
            "#{} record (len={}, time={}.{:06}, {})",
            summary.total(),
            record.data.len(),
            record.ts_sec,
            record.ts_usec,
            direction
        );
        writer.write_record(&record)?;
    }

    writer.finish()?;
    info!(
        "Merged {} downlink and {} uplink records",
        summary.downlink, summary.uplink
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn capture_bytes(records: &[(u64, &str)]) -> Vec<u8> {
        let mut writer = PcapRecordWriter::new(Vec::new()).unwrap();
        for &(micros, data) in records {
            writer
                .write_record(&PcapRecord {
                    ts_sec: (micros / 1_000_000) as u32,
                    ts_usec: (micros % 1_000_000) as u32,
                    orig_len: data.len() as u32,
                    data: data.as_bytes().to_vec(),
                })
                .unwrap();
        }
        writer.finish().unwrap()
    }

    fn capture(records: &[(u64, &str)]) -> PcapReader<Cursor<Vec<u8>>> {
        PcapReader::new(Cursor::new(capture_bytes(records))).unwrap()
    }

    fn merged(out: Vec<u8>) -> Vec<(u64, Vec<u8>)> {
        PcapReader::new(Cursor::new(out))
            .unwrap()
            .map(|r| {
                let r = r.unwrap();
                (r.timestamp_micros(), r.data)
            })
            .collect()
    }

    #[test]
    fn test_interleaves_by_shifted_timestamp() {
        let down = capture(&[(100, "d1"), (200, "d2"), (300, "d3")]);
        let up = capture(&[(50, "u1"), (150, "u2")]);

        let mut out = Vec::new();
        let summary = merge(down, up, &mut out, 100).unwrap();
        assert_eq!(summary, MergeSummary { downlink: 3, uplink: 2 });

        assert_eq!(
            merged(out),
            vec![
                (100, b"d1".to_vec()),
                (155, b"u1".to_vec()),
                (200, b"d2".to_vec()),
                (255, b"u2".to_vec()),
                (300, b"d3".to_vec()),
            ]
        );
    }

    #[test]
    fn test_timestamps_cut_to_grid_and_ties_go_uplink() {
        let down = capture(&[(1_000_017, "d")]);
        let up = capture(&[(1_000_017, "u")]);

        let mut out = Vec::new();
        merge(down, up, &mut out, 0).unwrap();

        assert_eq!(
            merged(out),
            vec![(1_000_015, b"u".to_vec()), (1_000_010, b"d".to_vec())]
        );
    }

    #[test]
    fn test_one_side_empty_passes_the_other_through() {
        let down = capture(&[]);
        let up = capture(&[(999_999, "abc"), (2_000_003, "de")]);

        let mut out = Vec::new();
        let summary = merge(down, up, &mut out, 1).unwrap();
        assert_eq!(summary, MergeSummary { downlink: 0, uplink: 2 });

        let records = PcapReader::new(Cursor::new(out))
            .unwrap()
            .map(|r| r.unwrap())
            .collect::<Vec<_>>();
        assert_eq!((records[0].ts_sec, records[0].ts_usec), (1, 5));
        assert_eq!((records[1].ts_sec, records[1].ts_usec), (2, 5));
        assert_eq!(records[0].orig_len, 3);
    }

    #[test]
    fn test_both_empty_writes_header_only() {
        let mut out = Vec::new();
        let summary = merge(capture(&[]), capture(&[]), &mut out, 0).unwrap();
        assert_eq!(summary.total(), 0);
        assert_eq!(out.len(), 24);
    }

    #[test]
    fn test_offset_before_epoch_is_rejected() {
        let up = capture(&[(20, "u")]);
        let mut out = Vec::new();
        assert!(matches!(
            merge(capture(&[]), up, &mut out, -100),
            Err(CaptureError::TimestampOutOfRange(-75))
        ));
    }

    #[test]
    fn test_truncated_input_is_an_error() {
        let mut bytes = capture_bytes(&[(10, "abcd")]);
        bytes.truncate(bytes.len() - 1);
        let down = PcapReader::new(Cursor::new(bytes)).unwrap();

        let mut out = Vec::new();
        assert!(matches!(
            merge(down, capture(&[]), &mut out, 0),
            Err(CaptureError::Truncated)
        ));
    }
}
