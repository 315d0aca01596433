//! Core data types for I/Q sample transport

use std::fmt;

/// One complex 8-bit sample
///
/// `i` is the in-phase component, `q` the quadrature component. On the wire
/// (raw input and capture records) a sample is two bytes, `i` first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Sample {
    pub i: i8,
    pub q: i8,
}

impl Sample {
    /// Create a new sample
    pub const fn new(i: i8, q: i8) -> Self {
        Self { i, q }
    }

    /// Decode a sample from an `(i, q)` byte pair
    #[inline]
    pub const fn from_bytes(i: u8, q: u8) -> Self {
        Self {
            i: i as i8,
            q: q as i8,
        }
    }

    /// Encode this sample as an `(i, q)` byte pair
    #[inline]
    pub const fn to_bytes(self) -> [u8; 2] {
        [self.i as u8, self.q as u8]
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", self.i, self.q)
    }
}

/// An ordered batch of samples, the unit of transport between stages
///
/// A chunk with no samples is the shutdown sentinel: it never carries data
/// and tells the receiving stage that its upstream has finished. Every
/// data-carrying chunk holds at least one sample.
///
/// Chunks are moved through channels, so after a send the receiver is the
/// only owner. Only the tee clones them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Chunk {
    samples: Vec<Sample>,
}

impl Chunk {
    /// Create a data chunk from decoded samples
    ///
    /// An empty vector yields the sentinel.
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    /// The shutdown sentinel
    pub fn sentinel() -> Self {
        Self {
            samples: Vec::new(),
        }
    }

    /// Whether this chunk is the shutdown sentinel
    #[inline]
    pub fn is_sentinel(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of samples carried
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Same as [`Chunk::is_sentinel`]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    #[inline]
    pub fn samples_mut(&mut self) -> &mut [Sample] {
        &mut self.samples
    }

    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }

    /// Interleaved wire bytes `i0 q0 i1 q1 ...`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            out.extend_from_slice(&sample.to_bytes());
        }
        out
    }
}

impl From<Vec<Sample>> for Chunk {
    fn from(samples: Vec<Sample>) -> Self {
        Self::new(samples)
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_sentinel() {
            write!(f, "Chunk[sentinel]")
        } else {
            write!(f, "Chunk[samples={}]", self.samples.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_byte_decoding() {
        assert_eq!(Sample::from_bytes(0x01, 0x02), Sample::new(1, 2));
        assert_eq!(Sample::from_bytes(0x7f, 0x80), Sample::new(127, -128));
        assert_eq!(Sample::from_bytes(0xff, 0x00), Sample::new(-1, 0));
        assert_eq!(Sample::new(-1, -128).to_bytes(), [0xff, 0x80]);
    }

    #[test]
    fn test_sentinel() {
        let sentinel = Chunk::sentinel();
        assert!(sentinel.is_sentinel());
        assert_eq!(sentinel.len(), 0);
        assert_eq!(sentinel.to_string(), "Chunk[sentinel]");

        let data = Chunk::new(vec![Sample::new(1, 1)]);
        assert!(!data.is_sentinel());
        assert_eq!(data.to_string(), "Chunk[samples=1]");
    }

    #[test]
    fn test_chunk_to_bytes_interleaves() {
        let chunk = Chunk::new(vec![Sample::new(1, 2), Sample::new(127, -128)]);
        assert_eq!(chunk.to_bytes(), vec![0x01, 0x02, 0x7f, 0x80]);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn decode_encode_round_trip(i in any::<i8>(), q in any::<i8>()) {
                let [bi, bq] = Sample::new(i, q).to_bytes();
                prop_assert_eq!(Sample::from_bytes(bi, bq), Sample::new(i, q));
            }
        }
    }
}
