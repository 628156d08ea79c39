use crate::config::PipelineConfig;
use crate::dispatcher::{Dispatcher, Progress, ResultSink};
use crate::error::ProbeError;
use crate::http::HttpClient;
use crate::net::Connector;
use crate::types::{format_throughput, ProbeResult, SpeedResult};
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Optional second pass: download a large payload from each probe survivor on
/// a fresh connection and keep only the fast ones.
pub struct SpeedStage<C> {
    config: Arc<PipelineConfig>,
    connector: Arc<C>,
    client: Arc<HttpClient>,
}

impl<C: Connector> SpeedStage<C> {
    pub fn new(config: Arc<PipelineConfig>, connector: Arc<C>, client: Arc<HttpClient>) -> Self {
        Self {
            config,
            connector,
            client,
        }
    }

    /// Measure download throughput in kB/s for one endpoint.
    ///
    /// The download is cut off at `speed_timeout`; bytes received up to that
    /// point still count, which is how a huge payload yields a rate inside a
    /// fixed window. Failing to get a response head in that window drops the
    /// endpoint.
    pub async fn measure(&self, probe: &ProbeResult) -> Result<f64, ProbeError> {
        let cfg = &self.config;
        let addr = probe.candidate.socket_addr();

        let stream = match time::timeout(cfg.dial_timeout, self.connector.connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ProbeError::Dial(e)),
            Err(_) => return Err(ProbeError::DialTimeout(cfg.dial_timeout)),
        };

        let start = Instant::now();
        let deadline = start + cfg.speed_timeout;
        let mut response = time::timeout_at(deadline, self.client.get(stream, &cfg.speed_target))
            .await
            .map_err(|_| ProbeError::ResponseTimeout(cfg.speed_timeout))??;
        if !response.is_success() {
            return Err(ProbeError::Status(response.status));
        }

        let bytes = response.drain_until(deadline).await?;
        if bytes == 0 {
            return Err(ProbeError::EmptyDownload);
        }
        let secs = start.elapsed().as_secs_f64().max(f64::EPSILON);
        let kbs = bytes as f64 / secs / 1024.0;
        cfg.check_throughput(kbs)?;
        Ok(kbs)
    }

    /// Speed-test every survivor. `speed_width` workers pull from one shared
    /// queue until it is empty; which worker takes which item is unspecified.
    pub async fn run(
        self: Arc<Self>,
        survivors: Vec<ProbeResult>,
        cancel: CancellationToken,
        progress: Progress,
    ) -> Result<Vec<SpeedResult>> {
        let workers = self.config.speed_width.min(survivors.len()).max(1);
        let queue = Arc::new(Mutex::new(VecDeque::from(survivors)));
        let sink = ResultSink::new();
        let mut dispatcher = Dispatcher::new(workers, cancel.clone());

        for _ in 0..workers {
            let stage = self.clone();
            let queue = queue.clone();
            let sink = sink.clone();
            let progress = progress.clone();
            let cancel = cancel.clone();
            dispatcher
                .submit(async move {
                    loop {
                        if cancel.is_cancelled() {
                            return;
                        }
                        let Some(probe) = queue.lock().await.pop_front() else {
                            return;
                        };
                        match stage.measure(&probe).await {
                            Ok(kbs) => {
                                tracing::info!(
                                    endpoint = %probe.candidate,
                                    speed = %format_throughput(kbs),
                                    "download speed measured"
                                );
                                sink.push(SpeedResult {
                                    probe,
                                    throughput_kbs: kbs,
                                })
                                .await;
                            }
                            Err(reason) => {
                                tracing::debug!(endpoint = %probe.candidate, %reason, "speed test dropped");
                            }
                        }
                        progress.advance();
                    }
                })
                .await?;
        }

        let finished = dispatcher.await_all().await;
        tracing::debug!(finished, "speed test workers joined");
        progress.finish();
        sink.into_inner()
    }
}
