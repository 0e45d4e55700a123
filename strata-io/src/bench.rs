use std::hint::black_box;
use std::time::{Duration, Instant};

use log::debug;

use crate::error::ProbeError;

/// Smallest buffer that gives a meaningful copy measurement.
const MIN_BUFFER: usize = 4096;

/// Result of one memory copy micro-benchmark.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandwidthSample {
    pub bytes_copied: u64,
    pub elapsed: Duration,
}

impl BandwidthSample {
    pub fn bytes_per_sec(&self) -> f64 {
        self.bytes_copied as f64 / self.elapsed.as_secs_f64()
    }
}

/// Copies a `buffer_size` buffer `rounds` times and reports the throughput.
///
/// This is a coarse signal for tier classification, not a precise benchmark.
pub fn memory_bandwidth(buffer_size: usize, rounds: u32) -> Result<BandwidthSample, ProbeError> {
    if buffer_size < MIN_BUFFER {
        return Err(ProbeError::BufferTooSmall(buffer_size, MIN_BUFFER));
    }

    let src = vec![0xA5u8; buffer_size];
    let mut dst = vec![0u8; buffer_size];
    let rounds = rounds.max(1);

    let start = Instant::now();
    for _ in 0..rounds {
        dst.copy_from_slice(black_box(&src));
        black_box(&mut dst);
    }
    let elapsed = start.elapsed();

    if elapsed.is_zero() {
        return Err(ProbeError::Unmeasurable);
    }

    let sample = BandwidthSample { bytes_copied: buffer_size as u64 * rounds as u64, elapsed };
    debug!("Memory bandwidth sample: {:.2} GB/s over {:?}", sample.bytes_per_sec() / 1e9, elapsed);
    Ok(sample)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_tiny_buffer() {
        assert!(matches!(memory_bandwidth(16, 1), Err(ProbeError::BufferTooSmall(16, _))));
    }

    #[test]
    fn test_reports_positive_throughput() {
        let sample = memory_bandwidth(1 << 20, 16).expect("copy should be measurable");
        assert_eq!(sample.bytes_copied, 16 << 20);
        assert!(sample.bytes_per_sec() > 0.0);
    }
}
