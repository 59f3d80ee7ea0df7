//! Simple metrics collection for observability
//!
//! This module provides lightweight metrics collection using atomic counters.
//! Designed for minimal overhead and zero allocations in the hot path.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use throttr::{Status, Verb};

/// Core metrics collected by the server
pub struct Metrics {
    /// Server start time
    start_time: Instant,

    /// Total requests executed
    pub total_requests: AtomicU64,

    /// Requests by verb, indexed by position in [`Verb::ALL`]
    requests_by_verb: [AtomicU64; Verb::ALL.len()],

    /// Responses by status, indexed by status code
    responses_by_status: [AtomicU64; Status::ALL.len()],

    /// Connection lifecycle
    pub connections_active: AtomicUsize,
    pub connections_total: AtomicU64,
    pub idle_timeouts: AtomicU64,
    pub malformed_frames: AtomicU64,

    /// Request latency buckets (in microseconds)
    pub latency_under_1ms: AtomicU64,
    pub latency_under_10ms: AtomicU64,
    pub latency_under_100ms: AtomicU64,
    pub latency_under_1s: AtomicU64,
    pub latency_over_1s: AtomicU64,

    /// Histogram support
    pub latency_sum_micros: AtomicU64,
    pub latency_count: AtomicU64,

    /// Store metrics
    pub active_keys: AtomicUsize,
    pub sweeps: AtomicU64,
    pub swept_keys: AtomicU64,
    pub last_sweep_micros: AtomicU64,
}

impl Metrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_requests: AtomicU64::new(0),
            requests_by_verb: std::array::from_fn(|_| AtomicU64::new(0)),
            responses_by_status: std::array::from_fn(|_| AtomicU64::new(0)),
            connections_active: AtomicUsize::new(0),
            connections_total: AtomicU64::new(0),
            idle_timeouts: AtomicU64::new(0),
            malformed_frames: AtomicU64::new(0),
            latency_under_1ms: AtomicU64::new(0),
            latency_under_10ms: AtomicU64::new(0),
            latency_under_100ms: AtomicU64::new(0),
            latency_under_1s: AtomicU64::new(0),
            latency_over_1s: AtomicU64::new(0),
            latency_sum_micros: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
            active_keys: AtomicUsize::new(0),
            sweeps: AtomicU64::new(0),
            swept_keys: AtomicU64::new(0),
            last_sweep_micros: AtomicU64::new(0),
        }
    }

    fn verb_index(verb: Verb) -> usize {
        verb.as_u8() as usize - 1
    }

    /// Record an executed request, its outcome and its latency
    pub fn record_request(&self, verb: Verb, status: Status, latency_us: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.requests_by_verb[Self::verb_index(verb)].fetch_add(1, Ordering::Relaxed);
        self.responses_by_status[status.as_u8() as usize].fetch_add(1, Ordering::Relaxed);

        // Record latency bucket
        match latency_us {
            0..=999 => self.latency_under_1ms.fetch_add(1, Ordering::Relaxed),
            1000..=9999 => self.latency_under_10ms.fetch_add(1, Ordering::Relaxed),
            10000..=99999 => self.latency_under_100ms.fetch_add(1, Ordering::Relaxed),
            100000..=999999 => self.latency_under_1s.fetch_add(1, Ordering::Relaxed),
            _ => self.latency_over_1s.fetch_add(1, Ordering::Relaxed),
        };

        // Update histogram metrics
        self.latency_sum_micros
            .fetch_add(latency_us, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame that could not be decoded
    pub fn record_malformed(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
        self.responses_by_status[Status::MalformedFrame.as_u8() as usize]
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_for(&self, verb: Verb) -> u64 {
        self.requests_by_verb[Self::verb_index(verb)].load(Ordering::Relaxed)
    }

    pub fn responses_for(&self, status: Status) -> u64 {
        self.responses_by_status[status.as_u8() as usize].load(Ordering::Relaxed)
    }

    pub fn connection_opened(&self) {
        self.connections_active.fetch_add(1, Ordering::Relaxed);
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_idle_timeout(&self) {
        self.idle_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Update active keys count
    pub fn update_active_keys(&self, count: usize) {
        self.active_keys.store(count, Ordering::Relaxed);
    }

    /// Record one pass of the expiry sweeper
    pub fn record_sweep(&self, removed: usize, elapsed: Duration) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.swept_keys.fetch_add(removed as u64, Ordering::Relaxed);
        self.last_sweep_micros
            .store(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        // Estimate size: ~50 chars per metric line, ~45 lines
        let mut output = String::with_capacity(2500);

        // Writing into a String cannot fail
        let _ = self.write_prometheus(&mut output);
        output
    }

    fn write_prometheus(&self, out: &mut String) -> std::fmt::Result {
        writeln!(out, "# HELP throttr_uptime_seconds Time since server start in seconds")?;
        writeln!(out, "# TYPE throttr_uptime_seconds gauge")?;
        writeln!(out, "throttr_uptime_seconds {}\n", self.uptime_seconds())?;

        // Total requests
        writeln!(out, "# HELP throttr_requests_total Total number of requests executed")?;
        writeln!(out, "# TYPE throttr_requests_total counter")?;
        writeln!(
            out,
            "throttr_requests_total {}\n",
            self.total_requests.load(Ordering::Relaxed)
        )?;

        // Requests by verb
        writeln!(out, "# HELP throttr_requests_by_verb Total requests by protocol verb")?;
        writeln!(out, "# TYPE throttr_requests_by_verb counter")?;
        for verb in Verb::ALL {
            writeln!(
                out,
                "throttr_requests_by_verb{{verb=\"{verb}\"}} {}",
                self.requests_for(verb)
            )?;
        }
        writeln!(out)?;

        // Outcomes
        writeln!(out, "# HELP throttr_responses_by_status Total responses by status")?;
        writeln!(out, "# TYPE throttr_responses_by_status counter")?;
        for status in Status::ALL {
            writeln!(
                out,
                "throttr_responses_by_status{{status=\"{status}\"}} {}",
                self.responses_for(status)
            )?;
        }
        writeln!(out)?;

        // Connections
        writeln!(out, "# HELP throttr_connections_active Current open connections")?;
        writeln!(out, "# TYPE throttr_connections_active gauge")?;
        writeln!(
            out,
            "throttr_connections_active {}\n",
            self.connections_active.load(Ordering::Relaxed)
        )?;

        writeln!(out, "# HELP throttr_connections_total Total accepted connections")?;
        writeln!(out, "# TYPE throttr_connections_total counter")?;
        writeln!(
            out,
            "throttr_connections_total {}\n",
            self.connections_total.load(Ordering::Relaxed)
        )?;

        writeln!(out, "# HELP throttr_idle_timeouts_total Connections closed for inactivity")?;
        writeln!(out, "# TYPE throttr_idle_timeouts_total counter")?;
        writeln!(
            out,
            "throttr_idle_timeouts_total {}\n",
            self.idle_timeouts.load(Ordering::Relaxed)
        )?;

        writeln!(out, "# HELP throttr_malformed_frames_total Frames that failed to decode")?;
        writeln!(out, "# TYPE throttr_malformed_frames_total counter")?;
        writeln!(
            out,
            "throttr_malformed_frames_total {}\n",
            self.malformed_frames.load(Ordering::Relaxed)
        )?;

        // Latency distribution
        let under_1ms = self.latency_under_1ms.load(Ordering::Relaxed);
        let under_10ms = under_1ms + self.latency_under_10ms.load(Ordering::Relaxed);
        let under_100ms = under_10ms + self.latency_under_100ms.load(Ordering::Relaxed);
        let under_1s = under_100ms + self.latency_under_1s.load(Ordering::Relaxed);
        let count = self.latency_count.load(Ordering::Relaxed);

        writeln!(out, "# HELP throttr_request_duration_seconds Request latency distribution")?;
        writeln!(out, "# TYPE throttr_request_duration_seconds histogram")?;
        writeln!(out, "throttr_request_duration_seconds_bucket{{le=\"0.001\"}} {under_1ms}")?;
        writeln!(out, "throttr_request_duration_seconds_bucket{{le=\"0.01\"}} {under_10ms}")?;
        writeln!(out, "throttr_request_duration_seconds_bucket{{le=\"0.1\"}} {under_100ms}")?;
        writeln!(out, "throttr_request_duration_seconds_bucket{{le=\"1\"}} {under_1s}")?;
        writeln!(out, "throttr_request_duration_seconds_bucket{{le=\"+Inf\"}} {count}")?;

        let latency_sum_seconds =
            self.latency_sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        writeln!(out, "throttr_request_duration_seconds_sum {latency_sum_seconds:.6}")?;
        writeln!(out, "throttr_request_duration_seconds_count {count}\n")?;

        // Store metrics
        writeln!(out, "# HELP throttr_active_keys Number of stored quota keys")?;
        writeln!(out, "# TYPE throttr_active_keys gauge")?;
        writeln!(
            out,
            "throttr_active_keys {}\n",
            self.active_keys.load(Ordering::Relaxed)
        )?;

        writeln!(out, "# HELP throttr_sweeps_total Expiry sweeps run")?;
        writeln!(out, "# TYPE throttr_sweeps_total counter")?;
        writeln!(out, "throttr_sweeps_total {}\n", self.sweeps.load(Ordering::Relaxed))?;

        writeln!(out, "# HELP throttr_swept_keys_total Expired keys removed by sweeps")?;
        writeln!(out, "# TYPE throttr_swept_keys_total counter")?;
        writeln!(
            out,
            "throttr_swept_keys_total {}\n",
            self.swept_keys.load(Ordering::Relaxed)
        )?;

        let last_sweep_seconds = self.last_sweep_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        writeln!(out, "# HELP throttr_last_sweep_duration_seconds Duration of the latest sweep")?;
        writeln!(out, "# TYPE throttr_last_sweep_duration_seconds gauge")?;
        writeln!(out, "throttr_last_sweep_duration_seconds {last_sweep_seconds:.6}")?;

        Ok(())
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
