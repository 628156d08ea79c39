use std::path::{Path, PathBuf};
use std::time::Duration;

use edge_probe_rs::candidates::{self, LineNormalizer, NormalizedCandidates};
use edge_probe_rs::config::{self, PipelineConfig};
use edge_probe_rs::geo::{self, GeoResolver};
use edge_probe_rs::http::HttpTarget;
use edge_probe_rs::pipeline::{Pipeline, PipelineReport};
use edge_probe_rs::{export, upload};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// edge-probe-rs: find reachable CDN edge endpoints, rank them by latency or download speed.
#[derive(Debug, Parser)]
#[command(
    name = "edge-probe-rs",
    version,
    about = "Find reachable CDN edge endpoints and rank them by latency or download speed.",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Probe a candidate list, optionally speed-test the survivors, and export the ranking.
    Scan(ScanArgs),
    /// Upload a previous results CSV or a plain endpoint list.
    Upload(UploadArgs),
}

#[derive(Debug, Clone, Args)]
struct ScanArgs {
    /// Candidate file, one `address port` per line.
    #[arg(long, default_value = "ip.txt")]
    file: PathBuf,

    /// Download the candidate list from this URL instead of reading --file.
    #[arg(long = "targets-url")]
    targets_url: Option<String>,

    /// CSV output path.
    #[arg(long, default_value = "ip.csv")]
    outfile: PathBuf,

    /// Also write a pretty JSON report to this path.
    #[arg(long)]
    json: Option<PathBuf>,

    /// Max concurrent probes.
    #[arg(long, default_value_t = 100)]
    max: usize,

    /// Speed-test workers; 0 disables the speed test.
    #[arg(long, default_value_t = 5)]
    speedtest: usize,

    /// Speed-test payload URL (scheme is chosen by --tls).
    #[arg(long, default_value = config::DEFAULT_SPEED_URL)]
    url: String,

    /// Diagnostic trace URL (scheme is chosen by --tls).
    #[arg(long = "trace-url", default_value = config::DEFAULT_TRACE_URL)]
    trace_url: String,

    /// Use TLS for trace and speed-test requests.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    tls: bool,

    /// Latency threshold in milliseconds; 0 disables the filter.
    #[arg(long, default_value_t = 300)]
    delay: u64,

    /// Minimum download speed in MB/s; 0 disables the filter.
    #[arg(long = "speed-threshold", default_value_t = 3.0)]
    speed_threshold: f64,

    /// TCP dial timeout in milliseconds.
    #[arg(long = "dial-timeout-ms", default_value_t = 1000)]
    dial_timeout_ms: u64,

    /// Trace response timeout in milliseconds.
    #[arg(long = "response-timeout-ms", default_value_t = 2000)]
    response_timeout_ms: u64,

    /// Per-endpoint speed-test window in milliseconds.
    #[arg(long = "speed-timeout-ms", default_value_t = 5000)]
    speed_timeout_ms: u64,

    /// Location database cache file.
    #[arg(long, default_value = "locations.json")]
    locations: PathBuf,

    /// Where to fetch the location database when the cache is missing.
    #[arg(long = "locations-url", default_value = geo::DEFAULT_LOCATIONS_URL)]
    locations_url: String,

    /// Upload the ranked endpoints to this URL after export.
    #[arg(long)]
    upload: Option<String>,

    /// Bearer token for --upload.
    #[arg(long)]
    token: Option<String>,

    /// Disable the in-place progress lines.
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

#[derive(Debug, Clone, Args)]
struct UploadArgs {
    /// Results CSV (`.csv`) or endpoint list file.
    file: PathBuf,

    /// Collector URL.
    #[arg(long)]
    url: String,

    /// Bearer token.
    #[arg(long)]
    token: Option<String>,
}

impl ScanArgs {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let cfg = PipelineConfig {
            dial_timeout: Duration::from_millis(self.dial_timeout_ms),
            response_timeout: Duration::from_millis(self.response_timeout_ms),
            speed_timeout: Duration::from_millis(self.speed_timeout_ms),
            latency_threshold: Duration::from_millis(self.delay),
            throughput_threshold_mbs: self.speed_threshold,
            probe_width: self.max,
            speed_width: self.speedtest,
            tls: self.tls,
            trace_target: HttpTarget::parse(&self.trace_url).context("invalid --trace-url")?,
            speed_target: HttpTarget::parse(&self.url).context("invalid --url")?,
            ..PipelineConfig::default()
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Scan(args) => run_scan(args).await,
        Command::Upload(args) => run_upload(args).await,
    }
}

async fn run_scan(args: ScanArgs) -> Result<()> {
    let cfg = args.pipeline_config()?;
    print_config(&args, &cfg);

    let geo = GeoResolver::load_or_fetch(&args.locations, &args.locations_url).await?;
    if geo.is_empty() {
        tracing::warn!("location database has no entries, results will carry no geo data");
    } else {
        tracing::info!(datacenters = geo.len(), "location database loaded");
    }

    let normalizer = LineNormalizer::default();
    let NormalizedCandidates {
        candidates,
        skipped,
        duplicates,
    } = match &args.targets_url {
        Some(url) => candidates::fetch_candidates(url, &normalizer).await?,
        None => candidates::load_candidates_from_path(&args.file, &normalizer)?,
    };
    println!(
        "Loaded {} candidates ({} skipped, {} duplicates removed)",
        candidates.len(),
        skipped,
        duplicates
    );

    let cancel = CancellationToken::new();
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_ctrlc.cancel();
        }
    });

    let tls = cfg.tls;
    let pipeline = Pipeline::over_tcp(cfg, geo)?.show_progress(!args.quiet);
    let report = pipeline.run(candidates, cancel).await?;

    if report.validated == 0 {
        println!("No valid endpoints found.");
        return Ok(());
    }
    if report.ranking.is_empty() {
        println!(
            "{} endpoints validated, none passed the speed test.",
            report.validated
        );
        return Ok(());
    }

    export::write_csv(&args.outfile, &report.ranking, tls)?;
    if let Some(path) = args.json.as_deref() {
        export::write_json(path, &report, tls)?;
        println!("Wrote JSON report to {}", path.display());
    }
    print_summary(&report, &args.outfile);

    if let Some(url) = args.upload.as_deref() {
        let entries = upload::entries_from_ranking(&report.ranking);
        // Export already succeeded; a failed upload is reported, not fatal.
        match upload::upload(&entries, url, args.token.as_deref()).await {
            Ok(n) => println!("Uploaded {n} endpoints to {url}"),
            Err(e) => eprintln!("Upload failed: {e:#}"),
        }
    }
    Ok(())
}

async fn run_upload(args: UploadArgs) -> Result<()> {
    let entries = upload::load_entries(&args.file)?;
    println!("Parsed {} endpoints from {}", entries.len(), args.file.display());
    let n = upload::upload(&entries, &args.url, args.token.as_deref()).await?;
    println!("Uploaded {n} endpoints to {}", args.url);
    Ok(())
}

fn print_config(args: &ScanArgs, cfg: &PipelineConfig) {
    println!("edge-probe-rs configuration:");
    println!(
        "  candidates       : {}",
        args.targets_url
            .clone()
            .unwrap_or_else(|| args.file.display().to_string())
    );
    println!("  outfile          : {}", args.outfile.display());
    println!("  probe workers    : {}", cfg.probe_width);
    println!(
        "  speed workers    : {}{}",
        cfg.speed_width,
        if cfg.speed_test_enabled() { "" } else { " (speed test disabled)" }
    );
    println!(
        "  latency limit    : {} ms{}",
        cfg.latency_threshold.as_millis(),
        if cfg.latency_filter().is_some() { "" } else { " (filter disabled)" }
    );
    println!(
        "  speed limit      : {:.1} MB/s{}",
        cfg.throughput_threshold_mbs,
        if cfg.throughput_filter().is_some() { "" } else { " (filter disabled)" }
    );
    println!("  tls              : {}", cfg.tls);
    println!("  trace url        : {}", cfg.trace_target.url(cfg.tls));
    println!("  speed url        : {}", cfg.speed_target.url(cfg.tls));
}

fn print_summary(report: &PipelineReport, outfile: &Path) {
    println!(
        "Valid endpoints: {} | ranked: {} | wrote {} in {}s",
        report.validated,
        report.ranking.len(),
        outfile.display(),
        report.elapsed.as_secs()
    );
    for (rank, p) in report.ranking.probes().take(10).enumerate() {
        println!(
            "  {:>2}. {:<40} {:<4} {:>5} ms  {}",
            rank + 1,
            p.candidate.to_string(),
            p.datacenter,
            p.latency_ms(),
            p.city_label()
        );
    }
}
