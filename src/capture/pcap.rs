//! Classic libpcap framing, little-endian
//!
//! Global header followed by one record per chunk. Record payloads are the
//! chunk's samples as interleaved `i q` bytes; the link type is NULL, so no
//! tool will try to dissect them.

use super::{CaptureError, CaptureWriter};
use crate::runtime::sample::{Chunk, Sample};
use std::io::{self, ErrorKind, Read, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const PCAP_MAGIC: u32 = 0xa1b2_c3d4;
pub const PCAP_VERSION_MAJOR: u16 = 2;
pub const PCAP_VERSION_MINOR: u16 = 4;
/// Largest record payload, in bytes
pub const PCAP_SNAPLEN: u32 = 65536;
pub const LINKTYPE_NULL: u32 = 0;

const GLOBAL_HEADER_LEN: usize = 24;
const RECORD_HEADER_LEN: usize = 16;
const MICROS_PER_SEC: u128 = 1_000_000;

/// Decoded global header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcapHeader {
    pub version_major: u16,
    pub version_minor: u16,
    pub thiszone: i32,
    pub sigfigs: u32,
    pub snaplen: u32,
    pub linktype: u32,
}

impl Default for PcapHeader {
    fn default() -> Self {
        Self {
            version_major: PCAP_VERSION_MAJOR,
            version_minor: PCAP_VERSION_MINOR,
            thiszone: 0,
            sigfigs: 0,
            snaplen: PCAP_SNAPLEN,
            linktype: LINKTYPE_NULL,
        }
    }
}

impl PcapHeader {
    fn to_bytes(self) -> [u8; GLOBAL_HEADER_LEN] {
        let mut out = [0u8; GLOBAL_HEADER_LEN];
        out[0..4].copy_from_slice(&PCAP_MAGIC.to_le_bytes());
        out[4..6].copy_from_slice(&self.version_major.to_le_bytes());
        out[6..8].copy_from_slice(&self.version_minor.to_le_bytes());
        out[8..12].copy_from_slice(&self.thiszone.to_le_bytes());
        out[12..16].copy_from_slice(&self.sigfigs.to_le_bytes());
        out[16..20].copy_from_slice(&self.snaplen.to_le_bytes());
        out[20..24].copy_from_slice(&self.linktype.to_le_bytes());
        out
    }

    fn from_bytes(b: &[u8; GLOBAL_HEADER_LEN]) -> Result<Self, CaptureError> {
        let magic = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        if magic != PCAP_MAGIC {
            return Err(CaptureError::BadMagic(magic));
        }
        Ok(Self {
            version_major: u16::from_le_bytes([b[4], b[5]]),
            version_minor: u16::from_le_bytes([b[6], b[7]]),
            thiszone: i32::from_le_bytes([b[8], b[9], b[10], b[11]]),
            sigfigs: u32::from_le_bytes([b[12], b[13], b[14], b[15]]),
            snaplen: u32::from_le_bytes([b[16], b[17], b[18], b[19]]),
            linktype: u32::from_le_bytes([b[20], b[21], b[22], b[23]]),
        })
    }
}

/// One record read back from a capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcapRecord {
    pub ts_sec: u32,
    pub ts_usec: u32,
    pub orig_len: u32,
    pub data: Vec<u8>,
}

impl PcapRecord {
    /// Record timestamp in microseconds since the epoch
    pub fn timestamp_micros(&self) -> u64 {
        self.ts_sec as u64 * 1_000_000 + self.ts_usec as u64
    }

    /// Payload decoded as interleaved I/Q pairs
    pub fn samples(&self) -> Vec<Sample> {
        self.data
            .chunks_exact(2)
            .map(|pair| Sample::from_bytes(pair[0], pair[1]))
            .collect()
    }
}

/// Writes chunks as pcap records with synthesized timestamps
///
/// Record `n` is stamped `start + samples_before_n / sample_rate`, so
/// timestamps never decrease.
pub struct PcapWriter<W: Write + Send> {
    out: W,
    sample_rate: u64,
    start_micros: u128,
    samples_written: u64,
    records_written: u64,
}

impl<W: Write + Send> PcapWriter<W> {
    /// Write the global header, stamping records from the current wall time
    pub fn new(out: W, sample_rate: u64) -> Result<Self, CaptureError> {
        let start = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self::with_start_time(out, sample_rate, start)
    }

    /// Write the global header, stamping records from `start` (since the epoch)
    pub fn with_start_time(
        mut out: W,
        sample_rate: u64,
        start: Duration,
    ) -> Result<Self, CaptureError> {
        if sample_rate == 0 {
            return Err(CaptureError::InvalidSampleRate);
        }
        out.write_all(&PcapHeader::default().to_bytes())?;
        Ok(Self {
            out,
            sample_rate,
            start_micros: start.as_micros(),
            samples_written: 0,
            records_written: 0,
        })
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Give back the underlying writer
    pub fn into_inner(self) -> W {
        self.out
    }

    fn timestamp(&self) -> (u32, u32) {
        let offset = self.samples_written as u128 * MICROS_PER_SEC / self.sample_rate as u128;
        let micros = self.start_micros + offset;
        (
            (micros / MICROS_PER_SEC) as u32,
            (micros % MICROS_PER_SEC) as u32,
        )
    }
}

impl<W: Write + Send> CaptureWriter for PcapWriter<W> {
    fn write_chunk(&mut self, chunk: &Chunk) -> Result<(), CaptureError> {
        let len = chunk.len() * 2;
        if len > PCAP_SNAPLEN as usize {
            return Err(CaptureError::RecordTooLarge {
                len,
                snaplen: PCAP_SNAPLEN,
            });
        }

        let (ts_sec, ts_usec) = self.timestamp();
        write_record(&mut self.out, ts_sec, ts_usec, len as u32, &chunk.to_bytes())?;

        self.samples_written += chunk.len() as u64;
        self.records_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), CaptureError> {
        self.out.flush()?;
        Ok(())
    }
}

fn write_record<W: Write>(
    out: &mut W,
    ts_sec: u32,
    ts_usec: u32,
    orig_len: u32,
    data: &[u8],
) -> io::Result<()> {
    let mut header = [0u8; RECORD_HEADER_LEN];
    header[0..4].copy_from_slice(&ts_sec.to_le_bytes());
    header[4..8].copy_from_slice(&ts_usec.to_le_bytes());
    header[8..12].copy_from_slice(&(data.len() as u32).to_le_bytes());
    header[12..16].copy_from_slice(&orig_len.to_le_bytes());

    out.write_all(&header)?;
    out.write_all(data)
}

/// Writes records exactly as given, timestamps included
pub struct PcapRecordWriter<W: Write> {
    out: W,
    records_written: u64,
}

impl<W: Write> PcapRecordWriter<W> {
    /// Write the global header
    pub fn new(mut out: W) -> Result<Self, CaptureError> {
        out.write_all(&PcapHeader::default().to_bytes())?;
        Ok(Self {
            out,
            records_written: 0,
        })
    }

    pub fn write_record(&mut self, record: &PcapRecord) -> Result<(), CaptureError> {
        if record.data.len() > PCAP_SNAPLEN as usize {
            return Err(CaptureError::RecordTooLarge {
                len: record.data.len(),
                snaplen: PCAP_SNAPLEN,
            });
        }
        write_record(
            &mut self.out,
            record.ts_sec,
            record.ts_usec,
            record.orig_len,
            &record.data,
        )?;
        self.records_written += 1;
        Ok(())
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Flush and give back the underlying writer
    pub fn finish(mut self) -> Result<W, CaptureError> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Reads a capture written by [`PcapWriter`]
pub struct PcapReader<R: Read> {
    input: R,
    header: PcapHeader,
}

impl<R: Read> PcapReader<R> {
    pub fn new(mut input: R) -> Result<Self, CaptureError> {
        let mut bytes = [0u8; GLOBAL_HEADER_LEN];
        input.read_exact(&mut bytes).map_err(truncated)?;
        let header = PcapHeader::from_bytes(&bytes)?;
        Ok(Self { input, header })
    }

    pub fn header(&self) -> &PcapHeader {
        &self.header
    }

    /// Next record, or `None` at a clean end of file
    pub fn next_record(&mut self) -> Result<Option<PcapRecord>, CaptureError> {
        let mut header = [0u8; RECORD_HEADER_LEN];
        let mut filled = 0;
        while filled < RECORD_HEADER_LEN {
            match self.input.read(&mut header[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => return Err(CaptureError::Truncated),
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }

        let field = |at: usize| {
            u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]])
        };
        let incl_len = field(8);
        if incl_len > self.header.snaplen {
            return Err(CaptureError::RecordTooLarge {
                len: incl_len as usize,
                snaplen: self.header.snaplen,
            });
        }

        let mut data = vec![0u8; incl_len as usize];
        self.input.read_exact(&mut data).map_err(truncated)?;

        Ok(Some(PcapRecord {
            ts_sec: field(0),
            ts_usec: field(4),
            orig_len: field(12),
            data,
        }))
    }
}

fn truncated(e: io::Error) -> CaptureError {
    if e.kind() == ErrorKind::UnexpectedEof {
        CaptureError::Truncated
    } else {
        CaptureError::Io(e)
    }
}

impl<R: Read> Iterator for PcapReader<R> {
    type Item = Result<PcapRecord, CaptureError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn chunk(samples: &[(i8, i8)]) -> Chunk {
        Chunk::new(samples.iter().map(|&(i, q)| Sample::new(i, q)).collect())
    }

    #[test]
    fn test_global_header_layout() {
        let writer = PcapWriter::with_start_time(Vec::new(), 1000, Duration::ZERO).unwrap();
        let bytes = writer.into_inner();
        assert_eq!(
            bytes,
            vec![
                0xd4, 0xc3, 0xb2, 0xa1, // magic
                2, 0, 4, 0, // version
                0, 0, 0, 0, // thiszone
                0, 0, 0, 0, // sigfigs
                0, 0, 1, 0, // snaplen 65536
                0, 0, 0, 0, // linktype NULL
            ]
        );
    }

    #[test]
    fn test_records_read_back_with_synthesized_timestamps() {
        let start = Duration::new(100, 250_000_000);
        let mut writer = PcapWriter::with_start_time(Vec::new(), 4, start).unwrap();
        writer.write_chunk(&chunk(&[(1, 2), (127, -128)])).unwrap();
        writer.write_chunk(&chunk(&[(-1, 0), (3, 4), (5, 6)])).unwrap();
        writer.write_chunk(&chunk(&[(9, 9)])).unwrap();
        writer.finish().unwrap();
        assert_eq!(writer.records_written(), 3);
        assert_eq!(writer.samples_written(), 6);

        let mut reader = PcapReader::new(Cursor::new(writer.into_inner())).unwrap();
        assert_eq!(*reader.header(), PcapHeader::default());

        let records: Vec<PcapRecord> = reader.by_ref().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 3);

        // 4 samples per second: offsets of 0, 0.5 and 1.25 seconds
        assert_eq!((records[0].ts_sec, records[0].ts_usec), (100, 250_000));
        assert_eq!((records[1].ts_sec, records[1].ts_usec), (100, 750_000));
        assert_eq!((records[2].ts_sec, records[2].ts_usec), (101, 500_000));

        assert_eq!(records[0].data, vec![1, 2, 0x7f, 0x80]);
        assert_eq!(records[0].orig_len, 4);
        assert_eq!(
            records[1].samples(),
            vec![Sample::new(-1, 0), Sample::new(3, 4), Sample::new(5, 6)]
        );
    }

    #[test]
    fn test_timestamps_never_decrease() {
        let mut writer = PcapWriter::with_start_time(Vec::new(), 20_000_000, Duration::ZERO).unwrap();
        for len in [1usize, 1024, 7, 1024, 3] {
            writer
                .write_chunk(&Chunk::new(vec![Sample::new(0, 0); len]))
                .unwrap();
        }
        let reader = PcapReader::new(Cursor::new(writer.into_inner())).unwrap();
        let stamps: Vec<u64> = reader.map(|r| r.unwrap().timestamp_micros()).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_oversized_chunk_rejected() {
        let mut writer = PcapWriter::with_start_time(Vec::new(), 1, Duration::ZERO).unwrap();
        let big = Chunk::new(vec![Sample::new(0, 0); 32769]);
        assert!(matches!(
            writer.write_chunk(&big),
            Err(CaptureError::RecordTooLarge { len: 65538, .. })
        ));
    }

    #[test]
    fn test_reader_rejects_bad_magic_and_truncation() {
        let mut bytes = PcapWriter::with_start_time(Vec::new(), 1, Duration::ZERO)
            .unwrap()
            .into_inner();
        bytes[0] = 0;
        assert!(matches!(
            PcapReader::new(Cursor::new(bytes)),
            Err(CaptureError::BadMagic(_))
        ));

        let mut writer = PcapWriter::with_start_time(Vec::new(), 1, Duration::ZERO).unwrap();
        writer.write_chunk(&chunk(&[(1, 1), (2, 2)])).unwrap();
        let mut bytes = writer.into_inner();
        bytes.pop();
        let mut reader = PcapReader::new(Cursor::new(bytes)).unwrap();
        assert!(matches!(reader.next_record(), Err(CaptureError::Truncated)));

        assert!(matches!(
            PcapReader::new(Cursor::new(vec![0xd4, 0xc3])),
            Err(CaptureError::Truncated)
        ));
    }

    #[test]
    fn test_zero_sample_rate_rejected() {
        assert!(matches!(
            PcapWriter::with_start_time(Vec::new(), 0, Duration::ZERO),
            Err(CaptureError::InvalidSampleRate)
        ));
    }
}
