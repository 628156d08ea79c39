use crate::types::Candidate;
use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CandidateError {
    #[error("expected `address port`, got: {0}")]
    Format(String),
    #[error("invalid address: {0}")]
    Address(String),
    #[error("invalid port: {0}")]
    Port(String),
}

/// Parse one input line into a candidate.
///
/// Supported formats:
/// - `address port` (whitespace separated, trailing fields ignored)
/// - `address:port` and `[v6]:port`
/// - `address:port#description`
///
/// Blank lines and lines starting with `#` or `//` yield `Ok(None)`.
pub fn parse_candidate_line(raw: &str) -> Result<Option<Candidate>, CandidateError> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
        return Ok(None);
    }

    // Everything after `#` is a free-form label and may contain spaces.
    let line = line.split('#').next().unwrap_or("").trim();
    let mut fields = line.split_whitespace();
    let first = fields.next().unwrap_or("");
    if let Some(port) = fields.next() {
        let address = first
            .parse::<IpAddr>()
            .map_err(|_| CandidateError::Address(first.to_string()))?;
        let port = parse_port(port)?;
        return Ok(Candidate::new(address, port));
    }

    if !first.contains(':') {
        return Err(CandidateError::Format(line.to_string()));
    }
    if let Ok(sock) = first.parse::<SocketAddr>() {
        return Candidate::new(sock.ip(), sock.port())
            .map(Some)
            .ok_or_else(|| CandidateError::Port("0".into()));
    }
    // Distinguish a bad port from a bad address for the warning.
    let (address, port) = first
        .rsplit_once(':')
        .ok_or_else(|| CandidateError::Format(line.to_string()))?;
    let address = address.trim_start_matches('[').trim_end_matches(']');
    let address = address
        .parse::<IpAddr>()
        .map_err(|_| CandidateError::Address(address.to_string()))?;
    let port = parse_port(port)?;
    Ok(Candidate::new(address, port))
}

fn parse_port(s: &str) -> Result<u16, CandidateError> {
    match s.parse::<u32>() {
        Ok(v) if (1..=65535).contains(&v) => Ok(v as u16),
        _ => Err(CandidateError::Port(s.to_string())),
    }
}

/// Outcome of normalizing a raw candidate list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedCandidates {
    pub candidates: Vec<Candidate>,
    pub skipped: usize,
    pub duplicates: usize,
}

/// Turns raw candidate text into a clean list ready for dispatch.
pub trait CandidateNormalizer {
    fn normalize(&self, input: &str) -> NormalizedCandidates;
}

/// Line-oriented normalizer: skips malformed lines with a warning and drops
/// repeated address/port pairs, keeping first-seen order.
#[derive(Debug, Clone, Copy)]
pub struct LineNormalizer {
    pub dedup: bool,
}

impl Default for LineNormalizer {
    fn default() -> Self {
        Self { dedup: true }
    }
}

impl CandidateNormalizer for LineNormalizer {
    fn normalize(&self, input: &str) -> NormalizedCandidates {
        let mut out = NormalizedCandidates::default();
        let mut seen = HashSet::new();

        for (idx, raw_line) in input.lines().enumerate() {
            let line_no = idx + 1;
            match parse_candidate_line(raw_line) {
                Ok(Some(c)) => {
                    if !self.dedup || seen.insert(c) {
                        out.candidates.push(c);
                    } else {
                        out.duplicates += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(line = line_no, "skipping candidate line: {e}");
                    out.skipped += 1;
                }
            }
        }
        out
    }
}

/// Read and normalize a candidate file. The whole file is loaded before
/// anything is dispatched.
pub fn load_candidates_from_path(
    path: impl AsRef<Path>,
    normalizer: &impl CandidateNormalizer,
) -> Result<NormalizedCandidates> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read candidate file: {}", path.as_ref().display()))?;
    Ok(normalizer.normalize(&content))
}

/// Download and normalize a remote candidate list.
pub async fn fetch_candidates(
    url: &str,
    normalizer: &impl CandidateNormalizer,
) -> Result<NormalizedCandidates> {
    let resp = reqwest::get(url)
        .await
        .with_context(|| format!("failed to download candidate list from {url}"))?;
    if !resp.status().is_success() {
        bail!("failed to download candidate list from {url}: status {}", resp.status());
    }
    let body = resp.text().await.context("failed to read candidate list body")?;
    Ok(normalizer.normalize(&body))
}
