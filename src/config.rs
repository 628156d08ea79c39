use crate::error::ProbeError;
use crate::http::HttpTarget;
use anyhow::{ensure, Result};
use std::time::Duration;

pub const DEFAULT_TRACE_URL: &str = "speed.cloudflare.com/cdn-cgi/trace";
pub const DEFAULT_SPEED_URL: &str = "speed.cloudflare.com/__down?bytes=500000000";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0";

/// Immutable settings for one run. Built once at startup and shared by
/// reference with every stage.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub dial_timeout: Duration,
    /// Bound for the diagnostic request and, separately, for its body read.
    pub response_timeout: Duration,
    /// Hard bound for one speed-test download, measured from request start.
    pub speed_timeout: Duration,
    /// Zero disables the latency filter.
    pub latency_threshold: Duration,
    /// MB/s. Zero disables the throughput filter.
    pub throughput_threshold_mbs: f64,
    pub probe_width: usize,
    /// Zero skips the speed-test stage entirely.
    pub speed_width: usize,
    pub tls: bool,
    pub trace_target: HttpTarget,
    pub speed_target: HttpTarget,
    pub user_agent: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(1),
            response_timeout: Duration::from_secs(2),
            speed_timeout: Duration::from_secs(5),
            latency_threshold: Duration::from_millis(300),
            throughput_threshold_mbs: 3.0,
            probe_width: 100,
            speed_width: 5,
            tls: true,
            trace_target: HttpTarget::parse(DEFAULT_TRACE_URL).expect("default trace url is valid"),
            speed_target: HttpTarget::parse(DEFAULT_SPEED_URL).expect("default speed url is valid"),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.probe_width > 0, "probe concurrency must be at least 1");
        ensure!(
            self.throughput_threshold_mbs >= 0.0 && self.throughput_threshold_mbs.is_finite(),
            "speed threshold must be a non-negative number"
        );
        ensure!(!self.dial_timeout.is_zero(), "dial timeout must be positive");
        ensure!(!self.response_timeout.is_zero(), "response timeout must be positive");
        ensure!(!self.speed_timeout.is_zero(), "speed-test timeout must be positive");
        Ok(())
    }

    pub fn latency_filter(&self) -> Option<Duration> {
        (!self.latency_threshold.is_zero()).then_some(self.latency_threshold)
    }

    pub fn throughput_filter(&self) -> Option<f64> {
        (self.throughput_threshold_mbs > 0.0).then_some(self.throughput_threshold_mbs)
    }

    /// A handshake exactly at the threshold passes.
    pub fn check_latency(&self, latency: Duration) -> Result<(), ProbeError> {
        match self.latency_filter() {
            Some(threshold) if latency > threshold => Err(ProbeError::LatencyExceeded { latency, threshold }),
            _ => Ok(()),
        }
    }

    /// `kbs` is the measured rate in kB/s; a rate exactly at the threshold passes.
    pub fn check_throughput(&self, kbs: f64) -> Result<(), ProbeError> {
        let measured_mbs = kbs / 1024.0;
        match self.throughput_filter() {
            Some(threshold_mbs) if measured_mbs < threshold_mbs => Err(ProbeError::BelowThreshold {
                measured_mbs,
                threshold_mbs,
            }),
            _ => Ok(()),
        }
    }

    pub fn speed_test_enabled(&self) -> bool {
        self.speed_width > 0
    }

    /// The trace endpoint echoes the client's user agent back as `uag=...`.
    pub fn trace_marker(&self) -> String {
        format!("uag={}", self.user_agent)
    }
}
