//! Transfer metrics sink.
//!
//! A write-only observer owned by each transfer: the drivers and workers
//! feed it byte counts, RTT samples and retransmission events, and it
//! emits a summary through the log when the transfer ends.

use std::time::{Duration, Instant};

use log::info;

/// Direction of a transfer, from the reporting side's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Upload => f.write_str("upload"),
            Direction::Download => f.write_str("download"),
        }
    }
}

/// Counters for a single transfer.
#[derive(Debug)]
pub struct TransferMetrics {
    direction: Direction,
    filename: String,
    started: Instant,
    bytes: u64,
    frames: u64,
    retransmissions: u64,
    rtt_samples: Vec<Duration>,
}

impl TransferMetrics {
    /// Marks the start of a transfer.
    pub fn start(direction: Direction, filename: &str) -> Self {
        info!("{direction} of '{filename}' started");
        Self {
            direction,
            filename: filename.to_string(),
            started: Instant::now(),
            bytes: 0,
            frames: 0,
            retransmissions: 0,
            rtt_samples: Vec::new(),
        }
    }

    /// Records one delivered payload.
    pub fn add_bytes(&mut self, n: usize) {
        self.bytes += n as u64;
        self.frames += 1;
    }

    /// Records a round-trip-time sample for an acknowledged frame.
    pub fn record_rtt(&mut self, rtt: Duration) {
        self.rtt_samples.push(rtt);
    }

    /// Records one retransmitted frame.
    pub fn record_retransmission(&mut self) {
        self.retransmissions += 1;
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn retransmissions(&self) -> u64 {
        self.retransmissions
    }

    fn mean_rtt(&self) -> Option<Duration> {
        if self.rtt_samples.is_empty() {
            return None;
        }
        let total: Duration = self.rtt_samples.iter().sum();
        Some(total / self.rtt_samples.len() as u32)
    }

    /// Emits the final summary.
    pub fn finish(&self) {
        let elapsed = self.started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            self.bytes as f64 / 1024.0 / elapsed
        } else {
            0.0
        };
        match self.mean_rtt() {
            Some(rtt) => info!(
                "{} of '{}' finished: {} bytes in {} frames, {:.2} KB/s, \
                 {} retransmissions, mean RTT {:.1} ms",
                self.direction,
                self.filename,
                self.bytes,
                self.frames,
                rate,
                self.retransmissions,
                rtt.as_secs_f64() * 1000.0
            ),
            None => info!(
                "{} of '{}' finished: {} bytes in {} frames, {:.2} KB/s, \
                 {} retransmissions",
                self.direction, self.filename, self.bytes, self.frames, rate, self.retransmissions
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let mut m = TransferMetrics::start(Direction::Upload, "a.bin");
        m.add_bytes(1200);
        m.add_bytes(600);
        m.record_retransmission();
        m.record_rtt(Duration::from_millis(10));
        m.record_rtt(Duration::from_millis(30));

        assert_eq!(m.bytes(), 1800);
        assert_eq!(m.retransmissions(), 1);
        assert_eq!(m.mean_rtt(), Some(Duration::from_millis(20)));
    }
}
