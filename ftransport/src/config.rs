//! Protocol constants and runtime configuration.

use std::time::Duration;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 16;

/// Maximum payload bytes in a single DATA frame.
pub const MSS: usize = 1200;

/// Maximum on-the-wire frame length (header + MSS).
pub const MTU: usize = HEADER_SIZE + MSS;

/// Default retransmission timeout.
pub const DEFAULT_RTO: Duration = Duration::from_secs(1);

/// Default retry budget for handshake and teardown.
pub const DEFAULT_RETRY_MAX: u32 = 8;

/// Default Go-Back-N sender window.
pub const DEFAULT_WINDOW: u32 = 4;

/// Default upper bound for uploaded file sizes.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Default post-BYE quiet interval.
pub const DEFAULT_QUIET_TIME: Duration = Duration::from_millis(200);

/// Default linger window as a multiple of the RTO.
pub const DEFAULT_LINGER_FACTOR: u32 = 3;

/// Default depth of a per-peer dispatch queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Runtime knobs shared by the client drivers and the server workers.
///
/// The wire constants (`MSS`, `HEADER_SIZE`) are fixed by the protocol and
/// not configurable; everything timing-related is, so tests can shrink the
/// timers.
#[derive(Debug, Clone)]
pub struct Config {
    /// Retransmission timeout, also the unit for handshake backoff.
    pub rto: Duration,

    /// Attempt budget for the handshake and for BYE teardown. Also bounds
    /// how long a session tolerates silence (`retry_max * rto`).
    pub retry_max: u32,

    /// Go-Back-N sender window capacity.
    pub window: u32,

    /// Maximum accepted `file_size` for uploads.
    pub max_file_size: u64,

    /// Quiet interval absorbed after a successful BYE exchange.
    pub quiet_time: Duration,

    /// Linger window on the BYE-receiving side, in RTOs.
    pub linger_factor: u32,

    /// Bounded depth of each per-peer dispatch queue.
    pub queue_depth: usize,
}

impl Config {
    pub fn new() -> Self {
        Self {
            rto: DEFAULT_RTO,
            retry_max: DEFAULT_RETRY_MAX,
            window: DEFAULT_WINDOW,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            quiet_time: DEFAULT_QUIET_TIME,
            linger_factor: DEFAULT_LINGER_FACTOR,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }

    pub fn with_rto(mut self, rto: Duration) -> Self {
        self.rto = rto;
        self.quiet_time = rto / 5;
        self
    }

    pub fn with_retry_max(mut self, retry_max: u32) -> Self {
        self.retry_max = retry_max;
        self
    }

    pub fn with_window(mut self, window: u32) -> Self {
        self.window = window;
        self
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    /// Ceiling for a blocking handshake wait: the sum of the doubling
    /// per-attempt timeouts.
    pub fn handshake_deadline(&self) -> Duration {
        let mut total = Duration::ZERO;
        let mut step = self.rto;
        for _ in 0..self.retry_max {
            total += step;
            step *= 2;
        }
        total
    }

    /// How long a session tolerates silence before it is abandoned.
    pub fn inactivity_budget(&self) -> Duration {
        self.rto * self.retry_max
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_constants() {
        assert_eq!(HEADER_SIZE, 16);
        assert_eq!(MTU, 1216);
    }

    #[test]
    fn test_handshake_deadline_doubles() {
        let config = Config::new()
            .with_rto(Duration::from_millis(100))
            .with_retry_max(3);

        // 100 + 200 + 400
        assert_eq!(config.handshake_deadline(), Duration::from_millis(700));
    }
}
