use assert_cmd::cargo::cargo_bin_cmd;
use serde::Deserialize;
use std::error::Error;
use std::path::PathBuf;

#[derive(Deserialize)]
struct HrvTimeOutput {
    sdnn_ms: f64,
    rmssd_ms: f64,
    mean_rr_ms: f64,
    sample_count: usize,
    mean_bpm: Option<f64>,
    rejected: u64,
}

fn rr_path() -> String {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(|p| p.parent())
        .expect("workspace root")
        .join("test_data/tiny_rr.txt");
    root.to_string_lossy().to_string()
}

#[test]
fn hrv_time_filters_and_computes() -> Result<(), Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("pulse");
    cmd.args(["hrv-time", "--input", &rr_path()]);
    let out = cmd.assert().success().get_output().stdout.clone();
    let value: HrvTimeOutput = serde_json::from_slice(&out)?;
    assert_eq!(value.sample_count, 4);
    assert_eq!(value.rejected, 1);
    assert!((value.sdnn_ms - 50.0).abs() < 1e-6);
    assert!((value.rmssd_ms - 100.0).abs() < 1e-6);
    assert!((value.mean_rr_ms - 850.0).abs() < 1e-6);
    let mean_bpm = value.mean_bpm.ok_or("missing mean_bpm")?;
    assert!((mean_bpm - 60_000.0 / 850.0).abs() < 1e-6);
    Ok(())
}

#[test]
fn hrv_time_reads_stdin() -> Result<(), Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("pulse");
    cmd.arg("hrv-time").write_stdin("0.8\n");
    let out = cmd.assert().success().get_output().stdout.clone();
    let value: HrvTimeOutput = serde_json::from_slice(&out)?;
    assert_eq!(value.sample_count, 1);
    assert_eq!(value.sdnn_ms, 0.0);
    assert_eq!(value.rmssd_ms, 0.0);
    assert_eq!(value.mean_bpm, None);
    Ok(())
}

#[test]
fn hrv_time_counts_non_finite_values_as_rejected() -> Result<(), Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("pulse");
    cmd.arg("hrv-time").write_stdin("0.8
NaN
0.9
inf
");
    let out = cmd.assert().success().get_output().stdout.clone();
    let value: HrvTimeOutput = serde_json::from_slice(&out)?;
    assert_eq!(value.sample_count, 2);
    assert_eq!(value.rejected, 2);
    Ok(())
}

#[test]
fn hrv_time_rejects_inverted_range() {
    let mut cmd = cargo_bin_cmd!("pulse");
    cmd.args([
        "hrv-time",
        "--input",
        &rr_path(),
        "--min-rr-s",
        "1.2",
        "--max-rr-s",
        "0.3",
    ]);
    cmd.assert().failure();
}
