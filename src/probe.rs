use crate::config::PipelineConfig;
use crate::dispatcher::{Dispatcher, Progress, ResultSink};
use crate::error::ProbeError;
use crate::geo::GeoResolver;
use crate::http::HttpClient;
use crate::net::Connector;
use crate::types::{Candidate, ProbeResult};
use anyhow::Result;
use regex::Regex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

const MAX_TRACE_BODY: usize = 64 * 1024;

fn colo_loc_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)colo=([A-Z]+).*?loc=([A-Z]+)").expect("static regex"))
}

/// Pull `(datacenter, location)` out of a trace body: the first `colo=` token
/// and the first `loc=` token after it.
pub fn extract_colo_loc(body: &str) -> Option<(String, String)> {
    let caps = colo_loc_pattern().captures(body)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// Connectivity probe: dial, time the handshake, then fetch the diagnostic
/// trace over the same connection and resolve where it was served from.
pub struct ProbeStage<C> {
    config: Arc<PipelineConfig>,
    connector: Arc<C>,
    client: Arc<HttpClient>,
    geo: Arc<GeoResolver>,
    validated: AtomicU64,
}

impl<C: Connector> ProbeStage<C> {
    pub fn new(
        config: Arc<PipelineConfig>,
        connector: Arc<C>,
        client: Arc<HttpClient>,
        geo: Arc<GeoResolver>,
    ) -> Self {
        Self {
            config,
            connector,
            client,
            geo,
            validated: AtomicU64::new(0),
        }
    }

    /// Number of candidates that passed every check so far.
    pub fn validated(&self) -> u64 {
        self.validated.load(Ordering::Relaxed)
    }

    /// Probe a single candidate. Every failed check ends the probe; the open
    /// connection is released on all paths when it goes out of scope.
    pub async fn probe(&self, candidate: Candidate) -> Result<ProbeResult, ProbeError> {
        let cfg = &self.config;

        let start = Instant::now();
        let stream = match time::timeout(cfg.dial_timeout, self.connector.connect(candidate.socket_addr())).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ProbeError::Dial(e)),
            Err(_) => return Err(ProbeError::DialTimeout(cfg.dial_timeout)),
        };
        let latency = start.elapsed();
        cfg.check_latency(latency)?;

        let mut response = time::timeout(cfg.response_timeout, self.client.get(stream, &cfg.trace_target))
            .await
            .map_err(|_| ProbeError::ResponseTimeout(cfg.response_timeout))??;

        // A trickling body can stall well past the request timeout, so the
        // read gets its own timer.
        let body = tokio::select! {
            body = response.read_to_end(MAX_TRACE_BODY) => body?,
            _ = time::sleep(cfg.response_timeout) => {
                return Err(ProbeError::BodyTimeout(cfg.response_timeout));
            }
        };
        let body = String::from_utf8_lossy(&body);

        if !body.contains(&cfg.trace_marker()) {
            return Err(ProbeError::MarkerMissing);
        }
        let (datacenter, location_code) = extract_colo_loc(&body).ok_or(ProbeError::TokensMissing)?;

        let geo = self
            .geo
            .lookup(&datacenter)
            .map(|l| l.geo_info())
            .unwrap_or_default();

        Ok(ProbeResult {
            candidate,
            datacenter,
            location_code,
            geo,
            latency,
        })
    }

    /// Probe every candidate with at most `probe_width` in flight and return
    /// the survivors in completion order.
    pub async fn run(
        self: Arc<Self>,
        candidates: Vec<Candidate>,
        cancel: CancellationToken,
        progress: Progress,
    ) -> Result<Vec<ProbeResult>> {
        let sink = ResultSink::new();
        let mut dispatcher = Dispatcher::new(self.config.probe_width, cancel).with_progress(progress);

        for candidate in candidates {
            let stage = self.clone();
            let sink = sink.clone();
            dispatcher
                .submit(async move {
                    match stage.probe(candidate).await {
                        Ok(result) => {
                            stage.validated.fetch_add(1, Ordering::Relaxed);
                            tracing::info!(
                                endpoint = %candidate,
                                datacenter = %result.datacenter,
                                city = %result.city_label(),
                                latency_ms = result.latency_ms() as u64,
                                "endpoint validated"
                            );
                            sink.push(result).await;
                        }
                        Err(reason) => {
                            tracing::debug!(endpoint = %candidate, %reason, "probe dropped");
                        }
                    }
                })
                .await?;
        }

        let finished = dispatcher.await_all().await;
        tracing::debug!(finished, "probe workers joined");
        sink.into_inner()
    }
}
