// Metrics collection and tracking

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::pipeline::StreamEnd;

const MAX_LATENCY_SAMPLES: usize = 1000;

/// Latency distribution over the most recent samples
#[derive(Debug)]
pub struct LatencyMetrics {
    count: AtomicU64,
    total_ms: AtomicU64,
    min_ms: AtomicU64,
    max_ms: AtomicU64,
    samples: Mutex<Vec<u64>>,
}

impl LatencyMetrics {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_ms: AtomicU64::new(0),
            min_ms: AtomicU64::new(u64::MAX),
            max_ms: AtomicU64::new(0),
            samples: Mutex::new(Vec::new()),
        }
    }

    pub fn record(&self, latency_ms: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.min_ms.fetch_min(latency_ms, Ordering::Relaxed);
        self.max_ms.fetch_max(latency_ms, Ordering::Relaxed);

        // keep the last MAX_LATENCY_SAMPLES for percentiles
        if let Ok(mut samples) = self.samples.lock() {
            samples.push(latency_ms);
            if samples.len() > MAX_LATENCY_SAMPLES {
                samples.remove(0);
            }
        }
    }

    pub fn avg_ms(&self) -> f64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        self.total_ms.load(Ordering::Relaxed) as f64 / count as f64
    }

    pub fn percentile(&self, p: u8) -> u64 {
        if let Ok(samples) = self.samples.lock() {
            if samples.is_empty() {
                return 0;
            }
            let mut sorted = samples.clone();
            sorted.sort_unstable();
            let index = (sorted.len() * p as usize / 100).min(sorted.len() - 1);
            sorted[index]
        } else {
            0
        }
    }

    pub fn stats(&self) -> LatencyStats {
        let min = self.min_ms.load(Ordering::Relaxed);
        LatencyStats {
            count: self.count.load(Ordering::Relaxed),
            avg_ms: self.avg_ms(),
            min_ms: if min == u64::MAX { 0 } else { min },
            max_ms: self.max_ms.load(Ordering::Relaxed),
            p50_ms: self.percentile(50),
            p95_ms: self.percentile(95),
            p99_ms: self.percentile(99),
        }
    }
}

impl Default for LatencyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters across all audio streams served by this process
#[derive(Debug)]
pub struct StreamMetrics {
    started_at: DateTime<Utc>,
    start: Instant,
    requests: AtomicU64,
    streams_started: AtomicU64,
    streams_completed: AtomicU64,
    streams_cancelled: AtomicU64,
    streams_truncated: AtomicU64,
    upstream_failures: AtomicU64,
    audio_bytes_sent: AtomicU64,
    first_audio: LatencyMetrics,
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            start: Instant::now(),
            requests: AtomicU64::new(0),
            streams_started: AtomicU64::new(0),
            streams_completed: AtomicU64::new(0),
            streams_cancelled: AtomicU64::new(0),
            streams_truncated: AtomicU64::new(0),
            upstream_failures: AtomicU64::new(0),
            audio_bytes_sent: AtomicU64::new(0),
            first_audio: LatencyMetrics::new(),
        }
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// A stream committed its response headers after `time_to_first_audio`
    pub fn record_stream_started(&self, time_to_first_audio: Duration) {
        self.streams_started.fetch_add(1, Ordering::Relaxed);
        self.first_audio.record(time_to_first_audio.as_millis() as u64);
    }

    pub fn record_stream_end(&self, end: &StreamEnd) {
        let counter = match end {
            StreamEnd::Complete => &self.streams_completed,
            StreamEnd::Cancelled => &self.streams_cancelled,
            StreamEnd::Failed(_) => &self.streams_truncated,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Upstream failed before any audio was sent
    pub fn record_upstream_failure(&self) {
        self.upstream_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audio_bytes(&self, bytes: usize) {
        self.audio_bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsResponse {
        MetricsResponse {
            timestamp: Utc::now(),
            started_at: self.started_at,
            uptime_seconds: self.start.elapsed().as_secs(),
            request_count: self.requests.load(Ordering::Relaxed),
            streams_started: self.streams_started.load(Ordering::Relaxed),
            streams_completed: self.streams_completed.load(Ordering::Relaxed),
            streams_cancelled: self.streams_cancelled.load(Ordering::Relaxed),
            streams_truncated: self.streams_truncated.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
            audio_bytes_sent: self.audio_bytes_sent.load(Ordering::Relaxed),
            time_to_first_audio: self.first_audio.stats(),
        }
    }
}

impl Default for StreamMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct LatencyStats {
    pub count: u64,
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub request_count: u64,
    pub streams_started: u64,
    pub streams_completed: u64,
    pub streams_cancelled: u64,
    pub streams_truncated: u64,
    pub upstream_failures: u64,
    pub audio_bytes_sent: u64,
    pub time_to_first_audio: LatencyStats,
}
