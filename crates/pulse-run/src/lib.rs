use anyhow::{bail, Context, Result};
use csv::{ReaderBuilder, Trim, WriterBuilder};
use log::{debug, info};
use pulse_lib::{
    engine::{EngineConfig, IngestOutcome},
    ingest::{RandomWalkConfig, SampleSource},
    metrics::hrv::HRVMetrics,
    SharedEngine,
};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const CLOCK_EPS: f64 = 1e-9;

pub const LOG_HEADER: [&str; 5] = [
    "timestamp",
    "heart_rate",
    "rr_interval",
    "sdnn_ms",
    "rmssd_ms",
];

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SessionSpec {
    #[serde(default)]
    pub name: Option<String>,
    /// Session length in seconds; a session without one runs until the
    /// source is exhausted.
    #[serde(default)]
    pub duration_s: Option<f64>,
    #[serde(default)]
    pub schedule: Option<SchedulePolicy>,
    #[serde(default)]
    pub engine: Option<EngineConfig>,
    #[serde(default)]
    pub simulation: Option<RandomWalkConfig>,
}

impl SessionSpec {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("session")
    }

    pub fn schedule(&self) -> SchedulePolicy {
        self.schedule.unwrap_or_default()
    }

    pub fn engine(&self) -> EngineConfig {
        self.engine.unwrap_or_default()
    }

    pub fn simulation(&self) -> RandomWalkConfig {
        self.simulation.unwrap_or_default()
    }
}

/// When the runner polls the source and when it asks for fresh statistics.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct SchedulePolicy {
    pub ingest_interval_s: f64,
    pub refresh_interval_s: f64,
    /// Sleep between ticks instead of running on a simulated clock.
    pub realtime: bool,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            ingest_interval_s: 1.0,
            refresh_interval_s: 60.0,
            realtime: false,
        }
    }
}

impl SchedulePolicy {
    pub fn validate(&self) -> Result<(), pulse_lib::ConfigError> {
        for (name, value) in [
            ("ingest_interval_s", self.ingest_interval_s),
            ("refresh_interval_s", self.refresh_interval_s),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(pulse_lib::ConfigError::NonPositive { name, value });
            }
        }
        Ok(())
    }
}

/// One row of the session log. `sdnn_ms`/`rmssd_ms` are filled on the row
/// of the tick that triggered a refresh.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LogRow {
    pub timestamp: f64,
    #[serde(default)]
    pub heart_rate: Option<f64>,
    #[serde(default)]
    pub rr_interval: Option<f64>,
    #[serde(default)]
    pub sdnn_ms: Option<f64>,
    #[serde(default)]
    pub rmssd_ms: Option<f64>,
}

impl LogRow {
    fn record(&self) -> [String; 5] {
        let opt = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
        [
            self.timestamp.to_string(),
            opt(self.heart_rate),
            opt(self.rr_interval),
            opt(self.sdnn_ms),
            opt(self.rmssd_ms),
        ]
    }
}

/// Append-only CSV log. The header is written only when the file is new
/// or empty, so repeated sessions accumulate in one file.
pub struct CsvLogSink {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: usize,
}

impl CsvLogSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let is_new = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening log {}", path.display()))?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if is_new {
            writer
                .write_record(LOG_HEADER)
                .with_context(|| format!("writing log header {}", path.display()))?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            rows: 0,
        })
    }

    pub fn append(&mut self, row: &LogRow) -> Result<()> {
        self.writer
            .write_record(row.record())
            .with_context(|| format!("writing log {}", self.path.display()))?;
        self.rows += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .with_context(|| format!("flushing log {}", self.path.display()))?;
        Ok(())
    }

    pub fn rows_written(&self) -> usize {
        self.rows
    }
}

pub fn read_log_csv(path: &Path) -> Result<Vec<LogRow>> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("opening log {}", path.display()))?;
    let mut rows = Vec::new();
    for row in reader.deserialize::<LogRow>() {
        rows.push(row.with_context(|| format!("parsing log {}", path.display()))?);
    }
    Ok(rows)
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionManifest {
    pub name: String,
    pub source: String,
    pub derivation: pulse_lib::RrDerivation,
    pub ingest_interval_s: f64,
    pub refresh_interval_s: f64,
    pub duration_s: Option<f64>,
    pub seed: Option<u64>,
    pub total_samples: usize,
    pub accepted_intervals: usize,
    pub rejected_samples: u64,
    pub dropped_by_feed: u64,
    pub refreshes: usize,
    pub final_metrics: HRVMetrics,
    pub start_time_unix: f64,
}

#[derive(Debug)]
pub struct SessionBundle {
    pub metrics: Vec<HRVMetrics>,
    pub rows: Vec<LogRow>,
    pub manifest: SessionManifest,
}

pub fn read_session(path: &Path) -> Result<SessionSpec> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read session {}", path.display()))?;
    let spec: SessionSpec = toml::from_str(&contents)
        .with_context(|| format!("parsing session {}", path.display()))?;
    Ok(spec)
}

/// Drive `source` into `engine` on the session schedule, starting the clock at
/// `start_at`. Every refresh goes through the shared engine, so subscribers
/// see each snapshot as it is produced. The engine is reset when the session
/// ends; its latest snapshot is kept.
pub fn run_session<S: SampleSource + ?Sized>(
    spec: &SessionSpec,
    source_name: &str,
    start_at: f64,
    source: &mut S,
    engine: &SharedEngine,
    mut sink: Option<&mut CsvLogSink>,
) -> Result<SessionBundle> {
    let schedule = spec.schedule();
    schedule.validate()?;
    let pause = if schedule.realtime {
        let interval = Duration::try_from_secs_f64(schedule.ingest_interval_s)
            .context("ingest_interval_s is too large for realtime pacing")?;
        Some(interval)
    } else {
        None
    };
    if let Some(duration) = spec.duration_s {
        if !(duration.is_finite() && duration >= 0.0) {
            bail!("duration_s must be a non-negative number, got {}", duration);
        }
    }
    info!(
        "starting session '{}' from {} (ingest every {}s, refresh every {}s)",
        spec.name(),
        source_name,
        schedule.ingest_interval_s,
        schedule.refresh_interval_s
    );
    let start_time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_secs_f64())
        .unwrap_or(0.0);

    let mut rows = Vec::new();
    let mut metrics = Vec::new();
    let mut total_samples = 0;
    let mut accepted = 0;
    let mut dirty = false;
    let mut next_refresh = start_at + schedule.refresh_interval_s;
    let mut tick: u64 = 0;
    loop {
        let now = start_at + tick as f64 * schedule.ingest_interval_s;
        match spec.duration_s {
            Some(duration) if now - start_at > duration + CLOCK_EPS => break,
            None if source.is_exhausted() => break,
            _ => {}
        }
        let first_row = rows.len();
        for sample in source.poll(now) {
            total_samples += 1;
            let rr_interval = match engine.ingest(sample) {
                IngestOutcome::Accepted(rr) => {
                    accepted += 1;
                    dirty = true;
                    Some(rr)
                }
                _ => None,
            };
            rows.push(LogRow {
                timestamp: sample.timestamp,
                heart_rate: Some(sample.bpm),
                rr_interval,
                sdnn_ms: None,
                rmssd_ms: None,
            });
        }
        if now + CLOCK_EPS >= next_refresh {
            let snapshot = engine.refresh();
            debug!(
                "refresh at {:.1}s: sdnn={:.1}ms rmssd={:.1}ms n={}",
                now, snapshot.sdnn_ms, snapshot.rmssd_ms, snapshot.sample_count
            );
            metrics.push(snapshot);
            dirty = false;
            annotate_tick(&mut rows, first_row, now, &snapshot);
            next_refresh += schedule.refresh_interval_s;
        }
        if let Some(sink) = sink.as_deref_mut() {
            for row in &rows[first_row..] {
                sink.append(row)?;
            }
        }
        tick += 1;
        if let Some(pause) = pause {
            thread::sleep(pause);
        }
    }
    if dirty {
        metrics.push(engine.refresh());
    }
    if let Some(sink) = sink {
        sink.flush()?;
    }
    let final_metrics = engine.latest();
    let rejected = engine.rejections().total;
    engine.reset();
    info!(
        "session '{}' finished: {} samples, {} intervals, {} rejected",
        spec.name(),
        total_samples,
        accepted,
        rejected
    );

    let manifest = SessionManifest {
        name: spec.name().to_string(),
        source: source_name.to_string(),
        derivation: spec.engine().derivation,
        ingest_interval_s: schedule.ingest_interval_s,
        refresh_interval_s: schedule.refresh_interval_s,
        duration_s: spec.duration_s,
        seed: spec.simulation.and_then(|sim| sim.seed),
        total_samples,
        accepted_intervals: accepted,
        rejected_samples: rejected,
        dropped_by_feed: source.dropped(),
        refreshes: metrics.len(),
        final_metrics,
        start_time_unix: start_time,
    };
    Ok(SessionBundle {
        metrics,
        rows,
        manifest,
    })
}

// Attach a refresh to the last row of its tick, or add a metrics-only row
// when the tick delivered nothing.
fn annotate_tick(rows: &mut Vec<LogRow>, first_row: usize, now: f64, snapshot: &HRVMetrics) {
    if rows.len() == first_row {
        rows.push(LogRow {
            timestamp: now,
            heart_rate: None,
            rr_interval: None,
            sdnn_ms: None,
            rmssd_ms: None,
        });
    }
    if let Some(row) = rows.last_mut() {
        row.sdnn_ms = Some(snapshot.sdnn_ms);
        row.rmssd_ms = Some(snapshot.rmssd_ms);
    }
}

pub fn write_manifest(path: &Path, manifest: &SessionManifest) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("creating manifest {}", path.display()))?;
    serde_json::to_writer_pretty(file, manifest)
        .with_context(|| format!("writing manifest {}", path.display()))?;
    Ok(())
}

pub fn read_manifest(path: &Path) -> Result<SessionManifest> {
    let file =
        File::open(path).with_context(|| format!("opening manifest {}", path.display()))?;
    let manifest = serde_json::from_reader::<_, SessionManifest>(file)
        .with_context(|| format!("parsing manifest {}", path.display()))?;
    Ok(manifest)
}

pub fn write_metrics_jsonl(path: &Path, metrics: &[HRVMetrics]) -> Result<()> {
    let mut out = String::new();
    for m in metrics {
        out.push_str(&serde_json::to_string(m)?);
        out.push('\n');
    }
    fs::write(path, out).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_lib::{
        engine::{HrvEngine, RrDerivation},
        ingest::{RandomWalk, ReplaySource},
        signal::HeartRateSample,
    };
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn session_spec(duration_s: Option<f64>, refresh_interval_s: f64) -> SessionSpec {
        SessionSpec {
            name: Some("test".into()),
            duration_s,
            schedule: Some(SchedulePolicy {
                ingest_interval_s: 1.0,
                refresh_interval_s,
                realtime: false,
            }),
            engine: None,
            simulation: Some(RandomWalkConfig {
                seed: Some(9),
                ..RandomWalkConfig::default()
            }),
        }
    }

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .parent()
            .and_then(|p| p.parent())
            .expect("workspace root")
            .join("test_data")
            .join(name)
    }

    #[test]
    fn simulated_session_refreshes_on_cadence() {
        let spec = session_spec(Some(60.0), 20.0);
        let mut walk = RandomWalk::new(spec.simulation()).unwrap();
        let engine = SharedEngine::default();
        let bundle = run_session(&spec, "random-walk", 0.0, &mut walk, &engine, None).unwrap();
        // ticks at 0..=60 -> 61 samples, refreshes at 20, 40, 60
        assert_eq!(bundle.manifest.total_samples, 61);
        assert_eq!(bundle.metrics.len(), 3);
        assert_eq!(bundle.metrics[2].sample_count, 61);
        assert_eq!(bundle.manifest.accepted_intervals, 61);
        assert_eq!(bundle.manifest.seed, Some(9));
        assert_eq!(engine.window_len(), 0);
        assert_eq!(engine.latest(), bundle.manifest.final_metrics);
    }

    #[test]
    fn trailing_samples_get_a_final_refresh() {
        let spec = session_spec(Some(30.0), 60.0);
        let mut walk = RandomWalk::seeded(1);
        let engine = SharedEngine::default();
        let bundle = run_session(&spec, "random-walk", 0.0, &mut walk, &engine, None).unwrap();
        assert_eq!(bundle.metrics.len(), 1);
        assert_eq!(bundle.manifest.final_metrics.sample_count, 31);
    }

    #[test]
    fn subscribers_see_every_refresh() {
        let spec = session_spec(Some(9.0), 3.0);
        let mut walk = RandomWalk::seeded(5);
        let engine = SharedEngine::default();
        let rx = engine.subscribe();
        let bundle = run_session(&spec, "random-walk", 0.0, &mut walk, &engine, None).unwrap();
        let seen: Vec<HRVMetrics> = rx.try_iter().collect();
        assert_eq!(seen, bundle.metrics);
    }

    #[test]
    fn replay_runs_until_exhausted() {
        let mut spec = session_spec(None, 5.0);
        spec.engine = Some(EngineConfig::with_derivation(RrDerivation::InstantaneousRate));
        let mut source = ReplaySource::from_csv(&fixture("hr_samples.csv")).unwrap();
        let engine = SharedEngine::default();
        let start = source.start_time().unwrap();
        let bundle = run_session(&spec, "replay", start, &mut source, &engine, None).unwrap();
        assert_eq!(bundle.manifest.total_samples, 11);
        assert_eq!(bundle.manifest.dropped_by_feed, 1);
        assert_eq!(bundle.manifest.rejected_samples, 1);
        assert_eq!(bundle.manifest.accepted_intervals, 10);
        assert_eq!(bundle.manifest.final_metrics.sample_count, 10);
    }

    #[test]
    fn elapsed_time_replay_uses_timestamps() {
        let mut spec = session_spec(None, 100.0);
        let config = EngineConfig::with_derivation(RrDerivation::ElapsedTime);
        spec.engine = Some(config);
        let beats = [0.0, 0.8, 1.7, 2.5, 3.4];
        let mut source = ReplaySource::new(
            beats
                .iter()
                .map(|&t| HeartRateSample::new(t, 70.0))
                .collect(),
        );
        let engine = SharedEngine::new(HrvEngine::new(config).unwrap());
        let spec = SessionSpec {
            schedule: Some(SchedulePolicy {
                ingest_interval_s: 0.5,
                refresh_interval_s: 100.0,
                realtime: false,
            }),
            ..spec
        };
        let bundle = run_session(&spec, "replay", 0.0, &mut source, &engine, None).unwrap();
        assert_eq!(bundle.manifest.accepted_intervals, 4);
        let m = bundle.manifest.final_metrics;
        assert!((m.mean_rr_ms - 850.0).abs() < 1e-6);
        assert!((m.sdnn_ms - 50.0).abs() < 1e-6);
        assert!((m.rmssd_ms - 100.0).abs() < 1e-6);
    }

    #[test]
    fn sink_writes_header_once_and_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs/session.csv");
        let spec = session_spec(Some(4.0), 2.0);
        for _ in 0..2 {
            let mut walk = RandomWalk::seeded(11);
            let engine = SharedEngine::default();
            let mut sink = CsvLogSink::open(&path).unwrap();
            run_session(&spec, "random-walk", 0.0, &mut walk, &engine, Some(&mut sink)).unwrap();
            assert_eq!(sink.rows_written(), 5);
        }
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("timestamp,heart_rate").count(), 1);
        let rows = read_log_csv(&path).unwrap();
        assert_eq!(rows.len(), 10);
        assert!(rows.iter().all(|r| r.heart_rate.is_some()));
        assert_eq!(rows.iter().filter(|r| r.sdnn_ms.is_some()).count(), 4);
    }

    #[test]
    fn empty_tick_refresh_gets_its_own_row() {
        let spec = session_spec(Some(2.0), 2.0);
        let mut source = ReplaySource::new(Vec::new());
        let engine = SharedEngine::default();
        let bundle = run_session(&spec, "replay", 0.0, &mut source, &engine, None).unwrap();
        assert_eq!(bundle.rows.len(), 1);
        assert_eq!(bundle.rows[0].heart_rate, None);
        assert_eq!(bundle.rows[0].sdnn_ms, Some(0.0));
        assert_eq!(bundle.manifest.final_metrics.sample_count, 0);
    }

    #[test]
    fn manifest_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let spec = session_spec(Some(5.0), 5.0);
        let mut walk = RandomWalk::seeded(2);
        let engine = SharedEngine::default();
        let bundle = run_session(&spec, "random-walk", 0.0, &mut walk, &engine, None).unwrap();
        let path = dir.path().join("session.json");
        write_manifest(&path, &bundle.manifest).unwrap();
        let back = read_manifest(&path).unwrap();
        assert_eq!(back.name, "test");
        assert_eq!(back.total_samples, 6);
        assert_eq!(back.final_metrics, bundle.manifest.final_metrics);
    }

    #[test]
    fn manifest_write_failure_names_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing/session.json");
        let spec = session_spec(Some(1.0), 1.0);
        let mut walk = RandomWalk::seeded(2);
        let engine = SharedEngine::default();
        let bundle = run_session(&spec, "random-walk", 0.0, &mut walk, &engine, None).unwrap();
        let err = write_manifest(&path, &bundle.manifest).unwrap_err();
        assert!(err.to_string().starts_with("creating manifest"));
        assert!(err.to_string().contains("session.json"));
    }

    #[test]
    fn reads_session_file() {
        let spec = read_session(&fixture("session.toml")).unwrap();
        assert_eq!(spec.name(), "evening-check");
        assert_eq!(spec.duration_s, Some(120.0));
        assert_eq!(spec.schedule().refresh_interval_s, 30.0);
        assert_eq!(spec.engine().capacity, 120);
        assert_eq!(spec.engine().max_rr_s, 1.2);
        assert_eq!(spec.simulation().seed, Some(42));
    }

    #[test]
    fn replay_with_non_finite_timestamp_finishes() {
        let spec = session_spec(None, 60.0);
        let mut source = ReplaySource::new(vec![
            HeartRateSample::new(0.0, 70.0),
            HeartRateSample::new(f64::INFINITY, 70.0),
            HeartRateSample::new(2.0, 70.0),
        ]);
        let engine = SharedEngine::default();
        let bundle = run_session(&spec, "replay", 0.0, &mut source, &engine, None).unwrap();
        assert_eq!(bundle.manifest.total_samples, 3);
        assert_eq!(bundle.manifest.accepted_intervals, 2);
        assert_eq!(bundle.manifest.rejected_samples, 1);
        assert_eq!(bundle.manifest.final_metrics.sample_count, 2);
    }

    #[test]
    fn realtime_refuses_unrepresentable_interval() {
        let mut spec = session_spec(Some(5.0), 5.0);
        spec.schedule = Some(SchedulePolicy {
            ingest_interval_s: 1e30,
            refresh_interval_s: 1e30,
            realtime: true,
        });
        let mut walk = RandomWalk::seeded(2);
        let engine = SharedEngine::default();
        let err = run_session(&spec, "random-walk", 0.0, &mut walk, &engine, None).unwrap_err();
        assert!(err.to_string().contains("realtime"));
        assert_eq!(walk.current(), 75.0);
    }

    #[test]
    fn rejects_zero_interval_schedule() {
        let mut spec = session_spec(Some(5.0), 5.0);
        spec.schedule = Some(SchedulePolicy {
            ingest_interval_s: 0.0,
            ..SchedulePolicy::default()
        });
        let mut walk = RandomWalk::seeded(2);
        let engine = SharedEngine::default();
        assert!(run_session(&spec, "random-walk", 0.0, &mut walk, &engine, None).is_err());
    }
}
