// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use serde::Serialize;
use std::time::{Duration, Instant};

/// Pacing metrics collected during a playout or capture loop
#[derive(Debug, Clone, Serialize)]
pub struct FrameMetrics {
    /// Frames copied to or from the channel
    pub frames_transferred: u64,
    /// Total bytes copied
    pub bytes_transferred: u64,
    /// Total duration in milliseconds
    pub duration_ms: u64,
    /// Average throughput in frames per second
    pub throughput_fps: f64,
    /// Average bandwidth in megabits per second
    pub bandwidth_mbps: f64,
    /// Shortest time between two transfers in microseconds
    pub interval_min_us: u64,
    /// Longest time between two transfers in microseconds
    pub interval_max_us: u64,
    pub interval_avg_us: u64,
    pub interval_p50_us: u64,
    pub interval_p95_us: u64,
    pub interval_p99_us: u64,
    /// Frames reported dropped by the handler
    pub dropped_frames: u64,
    /// Waits that ended without a frame
    pub timeouts: u64,
}

/// Collects per-transfer timing for one channel
pub struct MetricsCollector {
    start_time: Instant,
    last_transfer: Option<Instant>,
    intervals_us: Vec<u64>,
    frames: u64,
    bytes: u64,
    dropped_frames: u64,
    timeouts: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            last_transfer: None,
            intervals_us: Vec::new(),
            frames: 0,
            bytes: 0,
            dropped_frames: 0,
            timeouts: 0,
        }
    }

    /// Record a completed transfer of `bytes` at the current time
    pub fn record_transfer(&mut self, bytes: usize) {
        let now = Instant::now();
        if let Some(last) = self.last_transfer {
            self.record_interval(now.duration_since(last));
        }
        self.last_transfer = Some(now);
        self.frames += 1;
        self.bytes += bytes as u64;
    }

    pub fn record_interval(&mut self, interval: Duration) {
        self.intervals_us.push(interval.as_micros() as u64);
    }

    pub fn record_timeout(&mut self) {
        self.timeouts += 1;
    }

    /// Record the handler's cumulative drop count
    pub fn set_dropped(&mut self, dropped: u64) {
        self.dropped_frames = dropped;
    }

    /// Finalize and calculate all metrics
    pub fn finalize(&mut self) -> FrameMetrics {
        let duration = self.start_time.elapsed();
        let duration_ms = duration.as_millis() as u64;
        let duration_secs = duration.as_secs_f64();

        let throughput_fps = if duration_secs > 0.0 {
            self.frames as f64 / duration_secs
        } else {
            0.0
        };

        let bandwidth_mbps = if duration_secs > 0.0 {
            (self.bytes as f64 * 8.0) / (duration_secs * 1_000_000.0)
        } else {
            0.0
        };

        self.intervals_us.sort_unstable();
        let (min_us, max_us, avg_us) = match (self.intervals_us.first(), self.intervals_us.last()) {
            (Some(&min), Some(&max)) => {
                let sum: u64 = self.intervals_us.iter().sum();
                (min, max, sum / self.intervals_us.len() as u64)
            }
            _ => (0, 0, 0),
        };

        FrameMetrics {
            frames_transferred: self.frames,
            bytes_transferred: self.bytes,
            duration_ms,
            throughput_fps,
            bandwidth_mbps,
            interval_min_us: min_us,
            interval_max_us: max_us,
            interval_avg_us: avg_us,
            interval_p50_us: self.percentile(50.0),
            interval_p95_us: self.percentile(95.0),
            interval_p99_us: self.percentile(99.0),
            dropped_frames: self.dropped_frames,
            timeouts: self.timeouts,
        }
    }

    /// Calculate percentile from sorted interval data
    fn percentile(&self, p: f64) -> u64 {
        if self.intervals_us.is_empty() {
            return 0;
        }

        let len = self.intervals_us.len();
        let idx = ((p / 100.0) * (len - 1) as f64).round() as usize;
        self.intervals_us[idx.min(len - 1)]
    }

    /// Print metrics in human-readable format
    pub fn print_text(&mut self) {
        let metrics = self.finalize();
        println!("\n=== Pacing Metrics ===");
        println!("Frames transferred: {}", metrics.frames_transferred);
        println!(
            "Bytes transferred:  {} ({:.2} MB)",
            metrics.bytes_transferred,
            metrics.bytes_transferred as f64 / 1_048_576.0
        );
        println!(
            "Duration:           {:.2} s",
            metrics.duration_ms as f64 / 1000.0
        );
        println!("Throughput:         {:.2} fps", metrics.throughput_fps);
        println!("Bandwidth:          {:.2} Mbps", metrics.bandwidth_mbps);

        if metrics.frames_transferred > 1 {
            println!("\nFrame Interval (us):");
            println!("  Min:    {}", metrics.interval_min_us);
            println!("  Max:    {}", metrics.interval_max_us);
            println!("  Avg:    {}", metrics.interval_avg_us);
            println!("  P50:    {}", metrics.interval_p50_us);
            println!("  P95:    {}", metrics.interval_p95_us);
            println!("  P99:    {}", metrics.interval_p99_us);
        }

        if metrics.dropped_frames > 0 && metrics.frames_transferred > 0 {
            println!(
                "\nDropped frames:     {} ({:.2}%)",
                metrics.dropped_frames,
                (metrics.dropped_frames as f64 / metrics.frames_transferred as f64) * 100.0
            );
        }
        if metrics.timeouts > 0 {
            println!("Timeouts:           {}", metrics.timeouts);
        }
    }

    /// Print metrics in JSON format
    pub fn print_json(&mut self) -> Result<(), serde_json::Error> {
        let metrics = self.finalize();
        let json = serde_json::to_string_pretty(&metrics)?;
        println!("{}", json);
        Ok(())
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_calculation() {
        let mut collector = MetricsCollector::new();

        for i in 0..=10 {
            collector.record_interval(Duration::from_micros(i * 10));
        }

        let metrics = collector.finalize();

        assert_eq!(metrics.interval_p50_us, 50);
        assert_eq!(metrics.interval_p95_us, 100);
        assert_eq!(metrics.interval_min_us, 0);
        assert_eq!(metrics.interval_max_us, 100);
        assert_eq!(metrics.interval_avg_us, 50);
    }

    #[test]
    fn test_transfer_intervals() {
        let mut collector = MetricsCollector::new();
        collector.record_transfer(1000);
        std::thread::sleep(Duration::from_millis(5));
        collector.record_transfer(1000);

        let metrics = collector.finalize();
        assert_eq!(metrics.frames_transferred, 2);
        assert_eq!(metrics.bytes_transferred, 2000);
        assert!(metrics.interval_min_us >= 5000);
    }

    #[test]
    fn test_throughput_calculation() {
        let mut collector = MetricsCollector::new();

        for _ in 0..30 {
            collector.record_transfer(100_000);
        }

        std::thread::sleep(Duration::from_millis(100));

        let metrics = collector.finalize();

        assert_eq!(metrics.frames_transferred, 30);
        assert_eq!(metrics.bytes_transferred, 3_000_000);
        assert!(metrics.throughput_fps > 200.0 && metrics.throughput_fps < 400.0);
    }

    #[test]
    fn test_empty_metrics() {
        let mut collector = MetricsCollector::new();
        collector.record_timeout();
        collector.set_dropped(2);
        let metrics = collector.finalize();

        assert_eq!(metrics.frames_transferred, 0);
        assert_eq!(metrics.interval_min_us, 0);
        assert_eq!(metrics.interval_max_us, 0);
        assert_eq!(metrics.dropped_frames, 2);
        assert_eq!(metrics.timeouts, 1);
    }
}
