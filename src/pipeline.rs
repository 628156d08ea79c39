use crate::config::PipelineConfig;
use crate::dispatcher::Progress;
use crate::geo::GeoResolver;
use crate::http::HttpClient;
use crate::net::{Connector, TcpConnector};
use crate::probe::ProbeStage;
use crate::rank::{rank_by_latency, rank_by_throughput};
use crate::speed::SpeedStage;
use crate::types::{Candidate, Ranking};
use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub candidates: usize,
    /// Endpoints that passed the connectivity probe.
    pub validated: u64,
    pub ranking: Ranking,
    pub elapsed: Duration,
}

/// Probe stage, optional speed-test stage, then ranking. The speed-test stage
/// starts only after every probe task has finished.
pub struct Pipeline<C = TcpConnector> {
    config: Arc<PipelineConfig>,
    connector: Arc<C>,
    client: Arc<HttpClient>,
    geo: Arc<GeoResolver>,
    show_progress: bool,
}

impl Pipeline<TcpConnector> {
    pub fn over_tcp(config: PipelineConfig, geo: GeoResolver) -> Result<Self> {
        Self::new(config, TcpConnector, geo)
    }
}

impl<C: Connector> Pipeline<C> {
    pub fn new(config: PipelineConfig, connector: C, geo: GeoResolver) -> Result<Self> {
        config.validate()?;
        let client = HttpClient::new(config.tls, config.user_agent.clone())?;
        Ok(Self {
            config: Arc::new(config),
            connector: Arc::new(connector),
            client: Arc::new(client),
            geo: Arc::new(geo),
            show_progress: true,
        })
    }

    /// Turn the in-place progress lines on or off.
    pub fn show_progress(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    fn progress(&self, label: &'static str, total: usize) -> Progress {
        if self.show_progress {
            Progress::new(label, total as u64)
        } else {
            Progress::silent(label, total as u64)
        }
    }

    /// Run both stages over `candidates`. Cancelling `cancel` aborts the run
    /// and discards whatever was collected so far.
    pub async fn run(&self, candidates: Vec<Candidate>, cancel: CancellationToken) -> Result<PipelineReport> {
        let started = Instant::now();
        let total = candidates.len();

        let probe = Arc::new(ProbeStage::new(
            self.config.clone(),
            self.connector.clone(),
            self.client.clone(),
            self.geo.clone(),
        ));
        let survivors = probe
            .clone()
            .run(candidates, cancel.clone(), self.progress("probe", total))
            .await?;
        if cancel.is_cancelled() {
            bail!("run interrupted during probe stage");
        }
        let validated = probe.validated();
        tracing::info!(candidates = total, validated, "probe stage finished");

        let ranking = if self.config.speed_test_enabled() && !survivors.is_empty() {
            let speed = Arc::new(SpeedStage::new(
                self.config.clone(),
                self.connector.clone(),
                self.client.clone(),
            ));
            let count = survivors.len();
            let fast = speed
                .run(survivors, cancel.clone(), self.progress("speed test", count))
                .await?;
            if cancel.is_cancelled() {
                bail!("run interrupted during speed test");
            }
            tracing::info!(tested = count, kept = fast.len(), "speed test finished");
            rank_by_throughput(fast)
        } else if self.config.speed_test_enabled() {
            Ranking::ByThroughput(Vec::new())
        } else {
            rank_by_latency(survivors)
        };

        Ok(PipelineReport {
            candidates: total,
            validated,
            ranking,
            elapsed: started.elapsed(),
        })
    }
}
