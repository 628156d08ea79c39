//! Push ranked endpoints to a collector as plain `address:port#label` lines.
use crate::export::ExportRow;
use crate::geo::city_label;
use crate::types::Ranking;
use anyhow::{bail, Context, Result};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(10);
const UPLOAD_USER_AGENT: &str = concat!("edge-probe-rs/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEntry {
    pub address: IpAddr,
    pub port: u16,
    pub label: String,
}

impl UploadEntry {
    pub fn line(&self) -> String {
        match self.address {
            IpAddr::V4(v4) => format!("{v4}:{}#{}", self.port, self.label),
            IpAddr::V6(v6) => format!("[{v6}]:{}#{}", self.port, self.label),
        }
    }
}

pub fn entries_from_ranking(ranking: &Ranking) -> Vec<UploadEntry> {
    ranking
        .probes()
        .map(|p| UploadEntry {
            address: p.candidate.address,
            port: p.candidate.port,
            label: p.city_label(),
        })
        .collect()
}

pub fn entries_from_rows(rows: &[ExportRow]) -> Vec<UploadEntry> {
    rows.iter()
        .filter_map(|r| {
            let address = r.address.parse::<IpAddr>().ok()?;
            (r.port != 0).then(|| UploadEntry {
                address,
                port: r.port,
                label: city_label(&r.city_localized, &r.city, &r.datacenter),
            })
        })
        .collect()
}

/// Parse one line of a free-form endpoint list: `ip port [label...]`,
/// `ip:port` or `ip:port#label`. A missing label becomes `Unknown`.
pub fn parse_list_line(raw: &str) -> Option<UploadEntry> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
        return None;
    }

    let (addr, port, label) = if let Some((endpoint, label)) = line.split_once('#') {
        let (addr, port) = endpoint.trim().rsplit_once(':')?;
        (addr, port, label.trim().to_string())
    } else if line.contains(char::is_whitespace) {
        let mut fields = line.split_whitespace();
        let addr = fields.next()?;
        let port = fields.next()?;
        (addr, port, fields.collect::<Vec<_>>().join(" "))
    } else {
        let (addr, port) = line.rsplit_once(':')?;
        (addr, port, String::new())
    };

    let address = addr
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .ok()?;
    let port = port.trim().parse::<u16>().ok().filter(|p| *p != 0)?;
    let label = if label.is_empty() { "Unknown".to_string() } else { label };
    Some(UploadEntry { address, port, label })
}

pub fn entries_from_list(text: &str) -> Vec<UploadEntry> {
    text.lines().filter_map(parse_list_line).collect()
}

/// Load upload entries from a file: a `.csv` is treated as a results export,
/// anything else as a free-form endpoint list.
pub fn load_entries(path: &Path) -> Result<Vec<UploadEntry>> {
    let is_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv {
        let rows = crate::export::read_results_csv_path(path)?;
        Ok(entries_from_rows(&rows))
    } else {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(entries_from_list(&text))
    }
}

pub fn upload_body(entries: &[UploadEntry]) -> String {
    entries.iter().map(UploadEntry::line).collect::<Vec<_>>().join("\n")
}

/// POST `entries` to `url`. Returns how many lines were sent; zero entries
/// sends nothing.
pub async fn upload(entries: &[UploadEntry], url: &str, token: Option<&str>) -> Result<usize> {
    if entries.is_empty() {
        tracing::info!("nothing to upload");
        return Ok(0);
    }
    let client = reqwest::Client::builder()
        .timeout(UPLOAD_TIMEOUT)
        .user_agent(UPLOAD_USER_AGENT)
        .build()
        .context("failed to build upload client")?;

    let mut req = client
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(upload_body(entries));
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        req = req.bearer_auth(token);
    }

    let resp = req.send().await.with_context(|| format!("upload to {url} failed"))?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("upload rejected with status {status}: {body}");
    }
    tracing::info!(count = entries.len(), %url, "upload complete");
    Ok(entries.len())
}
