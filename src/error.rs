use std::io;
use std::time::Duration;
use thiserror::Error;

/// Why a candidate was dropped from a stage. These never leave the task that
/// produced them; they only surface in debug logs.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("dial failed: {0}")]
    Dial(#[source] io::Error),
    #[error("dial timed out after {0:?}")]
    DialTimeout(Duration),
    #[error("handshake latency {latency:?} over threshold {threshold:?}")]
    LatencyExceeded { latency: Duration, threshold: Duration },
    #[error("tls handshake failed: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("request failed: {0}")]
    Io(#[from] io::Error),
    #[error("http exchange failed: {0}")]
    Http(#[from] hyper::Error),
    #[error("no response within {0:?}")]
    ResponseTimeout(Duration),
    #[error("body not complete within {0:?}")]
    BodyTimeout(Duration),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("diagnostic marker missing from body")]
    MarkerMissing,
    #[error("colo/loc tokens missing from body")]
    TokensMissing,
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("download returned no data")]
    EmptyDownload,
    #[error("throughput {measured_mbs:.2} MB/s below threshold {threshold_mbs:.2} MB/s")]
    BelowThreshold { measured_mbs: f64, threshold_mbs: f64 },
}
