//! Statistics for relay tasks

use std::time::Duration;

use tokio::time::Instant;

/// Per-task statistics
#[derive(Debug, Clone)]
pub struct RelayStats {
    /// When the task started
    pub started_at: Instant,
    /// Packets read from the feed
    pub packets_received: u64,
    /// Packets dropped while waiting for the first keyframe
    pub packets_discarded: u64,
    /// Keyframes seen
    pub keyframes: u64,
    /// Packets the muxer rejected
    pub mux_errors: u64,
    /// Payloads pushed to the sink, including metadata and init segment
    pub payloads_sent: u64,
    /// Fragments pushed to the sink
    pub fragments_sent: u64,
    /// Total bytes pushed
    pub bytes_sent: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            packets_received: 0,
            packets_discarded: 0,
            keyframes: 0,
            mux_errors: 0,
            payloads_sent: 0,
            fragments_sent: 0,
            bytes_sent: 0,
        }
    }

    pub fn record_packet(&mut self, keyframe: bool) {
        self.packets_received += 1;
        if keyframe {
            self.keyframes += 1;
        }
    }

    pub fn record_discard(&mut self) {
        self.packets_discarded += 1;
    }

    pub fn record_mux_error(&mut self) {
        self.mux_errors += 1;
    }

    /// Count a pushed payload
    pub fn record_sent(&mut self, bytes: usize, fragment: bool) {
        self.payloads_sent += 1;
        self.bytes_sent += bytes as u64;
        if fragment {
            self.fragments_sent += 1;
        }
    }

    /// Time since the task started
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Outbound bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.elapsed().as_secs();
        if secs > 0 {
            (self.bytes_sent * 8) / secs
        } else {
            0
        }
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let mut stats = RelayStats::new();
        stats.record_discard();
        stats.record_packet(true);
        stats.record_packet(false);
        stats.record_sent(10, false);
        stats.record_sent(1000, true);

        assert_eq!(stats.packets_received, 2);
        assert_eq!(stats.packets_discarded, 1);
        assert_eq!(stats.keyframes, 1);
        assert_eq!(stats.payloads_sent, 2);
        assert_eq!(stats.fragments_sent, 1);
        assert_eq!(stats.bytes_sent, 1010);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bitrate() {
        let mut stats = RelayStats::new();
        assert_eq!(stats.bitrate(), 0);

        stats.record_sent(1000, true);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(stats.elapsed(), Duration::from_secs(2));
        assert_eq!(stats.bitrate(), 4000);
    }
}
