use crate::signal::HeartRateSample;
use anyhow::{Context, Result};
use csv::{ReaderBuilder, Trim};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const TIMESTAMP_COLUMNS: &[&str] = &["timestamp", "time", "t"];
const BPM_COLUMNS: &[&str] = &["bpm", "heart_rate", "hr"];

/// Read a recorded `timestamp,bpm` feed. Header names are matched
/// case-insensitively; `heart_rate` and `hr` are accepted for the rate.
pub fn read_samples_csv(path: &Path) -> Result<Vec<HeartRateSample>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    parse_samples_csv(file).with_context(|| format!("parsing {}", path.display()))
}

pub fn parse_samples_csv<R: Read>(input: R) -> Result<Vec<HeartRateSample>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .comment(Some(b'#'))
        .from_reader(input);
    let headers = reader.headers().context("reading header")?.clone();
    let ts_idx = locate_column(&headers, TIMESTAMP_COLUMNS, "timestamp")?;
    let bpm_idx = locate_column(&headers, BPM_COLUMNS, "heart rate")?;

    let mut samples = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("reading row {}", row + 1))?;
        let timestamp = parse_field(&record, ts_idx)
            .with_context(|| format!("row {}: bad timestamp", row + 1))?;
        let bpm = parse_field(&record, bpm_idx)
            .with_context(|| format!("row {}: bad heart rate", row + 1))?;
        samples.push(HeartRateSample::new(timestamp, bpm));
    }
    Ok(samples)
}

fn parse_field(record: &csv::StringRecord, idx: usize) -> Result<f64> {
    let raw = record
        .get(idx)
        .ok_or_else(|| anyhow::anyhow!("missing field {}", idx))?;
    raw.parse::<f64>()
        .with_context(|| format!("{:?} is not a number", raw))
}

fn locate_column(headers: &csv::StringRecord, accepted: &[&str], hint: &str) -> Result<usize> {
    headers
        .iter()
        .position(|name| accepted.iter().any(|a| name.eq_ignore_ascii_case(a)))
        .ok_or_else(|| anyhow::anyhow!("missing {} column (one of {:?})", hint, accepted))
}
