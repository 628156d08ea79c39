use crate::pipeline::PipelineReport;
use crate::types::{ProbeResult, Ranking};
use ::time::{format_description::well_known, OffsetDateTime};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

const BASE_HEADER: [&str; 12] = [
    "address",
    "port",
    "tls",
    "datacenter",
    "location",
    "region",
    "city",
    "region_localized",
    "country",
    "city_localized",
    "flag",
    "latency",
];
const SPEED_HEADER: &str = "download_mb_s";

/// One exported result line, shared by the CSV and JSON outputs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExportRow {
    pub address: String,
    pub port: u16,
    pub tls: bool,
    pub datacenter: String,
    pub location: String,
    pub region: String,
    pub city: String,
    pub region_localized: String,
    pub country: String,
    pub city_localized: String,
    pub flag: String,
    pub latency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_mb_s: Option<String>,
}

impl ExportRow {
    fn from_probe(p: &ProbeResult, tls: bool, download_mb_s: Option<String>) -> Self {
        Self {
            address: p.candidate.address.to_string(),
            port: p.candidate.port,
            tls,
            datacenter: p.datacenter.clone(),
            location: p.location_code.clone(),
            region: p.geo.region.clone(),
            city: p.geo.city.clone(),
            region_localized: p.geo.region_localized.clone(),
            country: p.geo.country.clone(),
            city_localized: p.geo.city_localized.clone(),
            flag: p.geo.flag.clone(),
            latency: format!("{} ms", p.latency_ms()),
            download_mb_s,
        }
    }

    fn record(&self) -> Vec<String> {
        let mut rec = vec![
            self.address.clone(),
            self.port.to_string(),
            self.tls.to_string(),
            self.datacenter.clone(),
            self.location.clone(),
            self.region.clone(),
            self.city.clone(),
            self.region_localized.clone(),
            self.country.clone(),
            self.city_localized.clone(),
            self.flag.clone(),
            self.latency.clone(),
        ];
        if let Some(speed) = &self.download_mb_s {
            rec.push(speed.clone());
        }
        rec
    }
}

/// MB/s with two decimals at or above 1 MB/s, three below.
pub fn format_mb_s(kbs: f64) -> String {
    let mbs = kbs / 1024.0;
    if mbs >= 1.0 {
        format!("{mbs:.2}")
    } else {
        format!("{mbs:.3}")
    }
}

/// Flatten a ranking into export rows, preserving rank order.
pub fn export_rows(ranking: &Ranking, tls: bool) -> Vec<ExportRow> {
    match ranking {
        Ranking::ByLatency(v) => v.iter().map(|p| ExportRow::from_probe(p, tls, None)).collect(),
        Ranking::ByThroughput(v) => v
            .iter()
            .map(|s| ExportRow::from_probe(&s.probe, tls, Some(format_mb_s(s.throughput_kbs))))
            .collect(),
    }
}

pub fn write_csv_to<W: Write>(writer: W, ranking: &Ranking, tls: bool) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    let mut header: Vec<&str> = BASE_HEADER.to_vec();
    if ranking.speed_tested() {
        header.push(SPEED_HEADER);
    }
    wtr.write_record(&header)?;
    for row in export_rows(ranking, tls) {
        wtr.write_record(row.record())?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write the CSV export. Failing to create the file aborts the run.
pub fn write_csv(path: &Path, ranking: &Ranking, tls: bool) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    write_csv_to(BufWriter::new(file), ranking, tls)
        .with_context(|| format!("failed to write {}", path.display()))
}

#[derive(Serialize, Debug)]
struct JsonReport<'a> {
    generated_at: String,
    tls: bool,
    candidates: usize,
    validated: u64,
    speed_tested: bool,
    elapsed_ms: u128,
    results: &'a [ExportRow],
}

/// Pretty JSON report with run metadata alongside the ranked rows.
pub fn write_json(path: &Path, report: &PipelineReport, tls: bool) -> Result<()> {
    let rows = export_rows(&report.ranking, tls);
    let doc = JsonReport {
        generated_at: now_rfc3339(),
        tls,
        candidates: report.candidates,
        validated: report.validated,
        speed_tested: report.ranking.speed_tested(),
        elapsed_ms: report.elapsed.as_millis(),
        results: &rows,
    };
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &doc)?;
    Ok(())
}

/// Read back a CSV produced by [`write_csv`]. Rows with too few columns or a
/// bad port are skipped.
pub fn read_results_csv<R: Read>(reader: R) -> Result<Vec<ExportRow>> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let mut rows = Vec::new();
    for (idx, record) in rdr.records().enumerate() {
        let record = record.context("failed to read results CSV")?;
        if record.len() < BASE_HEADER.len() {
            tracing::warn!(row = idx + 1, "skipping short results row");
            continue;
        }
        let Ok(port) = record[1].parse::<u16>() else {
            tracing::warn!(row = idx + 1, port = &record[1], "skipping results row with bad port");
            continue;
        };
        rows.push(ExportRow {
            address: record[0].to_string(),
            port,
            tls: record[2].eq_ignore_ascii_case("true"),
            datacenter: record[3].to_string(),
            location: record[4].to_string(),
            region: record[5].to_string(),
            city: record[6].to_string(),
            region_localized: record[7].to_string(),
            country: record[8].to_string(),
            city_localized: record[9].to_string(),
            flag: record[10].to_string(),
            latency: record[11].to_string(),
            download_mb_s: record.get(12).filter(|s| !s.is_empty()).map(str::to_string),
        });
    }
    Ok(rows)
}

pub fn read_results_csv_path(path: &Path) -> Result<Vec<ExportRow>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    read_results_csv(file)
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
