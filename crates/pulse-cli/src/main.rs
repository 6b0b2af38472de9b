use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::info;
use pulse_lib::{
    engine::{EngineConfig, HrvEngine, RrDerivation},
    ingest::{RandomWalk, ReplaySource, SampleSource},
    io::text as text_io,
    metrics::hrv::HRVMetrics,
    SharedEngine,
};
use pulse_run::{
    read_session, run_session, write_manifest, write_metrics_jsonl, CsvLogSink, SchedulePolicy,
    SessionBundle, SessionSpec,
};
use serde::Serialize;
use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
    thread,
};

const DEFAULT_SIMULATION_S: f64 = 300.0;

#[derive(Parser)]
#[command(
    name = "pulse",
    version,
    about = "Pulse: live heart-rate variability from heart-rate streams"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Derivation {
    /// Interval between consecutive sample timestamps
    #[value(name = "elapsed")]
    Elapsed,
    /// 60 / bpm of each sample
    #[value(name = "rate")]
    Rate,
}

impl From<Derivation> for RrDerivation {
    fn from(value: Derivation) -> Self {
        match value {
            Derivation::Elapsed => RrDerivation::ElapsedTime,
            Derivation::Rate => RrDerivation::InstantaneousRate,
        }
    }
}

/// Overrides shared by every streaming command. Flags win over the session file.
#[derive(Args)]
struct SessionArgs {
    /// TOML session file
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    derivation: Option<Derivation>,
    #[arg(long)]
    capacity: Option<usize>,
    #[arg(long)]
    ingest_interval_s: Option<f64>,
    #[arg(long)]
    refresh_interval_s: Option<f64>,
    #[arg(long)]
    duration_s: Option<f64>,
    /// Directory receiving session.csv, metrics.jsonl and session.json
    #[arg(long)]
    out: Option<PathBuf>,
}

impl SessionArgs {
    fn resolve(&self) -> Result<SessionSpec> {
        let mut spec = match &self.config {
            Some(path) => read_session(path)?,
            None => SessionSpec::default(),
        };
        let mut engine = spec.engine();
        if let Some(derivation) = self.derivation {
            engine.derivation = derivation.into();
        }
        if let Some(capacity) = self.capacity {
            engine.capacity = capacity;
        }
        spec.engine = Some(engine);
        let mut schedule = spec.schedule();
        if let Some(interval) = self.ingest_interval_s {
            schedule.ingest_interval_s = interval;
        }
        if let Some(interval) = self.refresh_interval_s {
            schedule.refresh_interval_s = interval;
        }
        spec.schedule = Some(schedule);
        if self.duration_s.is_some() {
            spec.duration_s = self.duration_s;
        }
        Ok(spec)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a session against the random-walk heart-rate simulator
    Simulate {
        #[command(flatten)]
        session: SessionArgs,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        start_bpm: Option<f64>,
        /// Pace ticks with the wall clock
        #[arg(long)]
        realtime: bool,
    },
    /// Replay a recorded timestamp,bpm CSV feed through the engine
    Replay {
        #[arg(long)]
        input: PathBuf,
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Time-domain HRV from newline-delimited RR intervals (seconds)
    HrvTime {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long, default_value_t = pulse_lib::MIN_RR_S)]
        min_rr_s: f64,
        #[arg(long, default_value_t = pulse_lib::MAX_RR_S)]
        max_rr_s: f64,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Simulate {
            session,
            seed,
            start_bpm,
            realtime,
        } => cmd_simulate(&session, seed, start_bpm, realtime)?,
        Commands::Replay { input, session } => cmd_replay(&input, &session)?,
        Commands::HrvTime {
            input,
            min_rr_s,
            max_rr_s,
        } => cmd_hrv_time(input.as_deref(), min_rr_s, max_rr_s)?,
    }
    Ok(())
}

fn cmd_simulate(
    args: &SessionArgs,
    seed: Option<u64>,
    start_bpm: Option<f64>,
    realtime: bool,
) -> Result<()> {
    let mut spec = args.resolve()?;
    let mut simulation = spec.simulation();
    if seed.is_some() {
        simulation.seed = seed;
    }
    if start_bpm.is_some() {
        simulation.start_bpm = start_bpm;
    }
    spec.simulation = Some(simulation);
    if realtime {
        spec.schedule = Some(SchedulePolicy {
            realtime,
            ..spec.schedule()
        });
    }
    spec.duration_s.get_or_insert(DEFAULT_SIMULATION_S);
    let mut walk = RandomWalk::new(simulation)?;
    stream_session(&spec, "random-walk", 0.0, &mut walk, args.out.as_deref())
}

fn cmd_replay(input: &Path, args: &SessionArgs) -> Result<()> {
    let spec = args.resolve()?;
    let mut source = ReplaySource::from_csv(input)?;
    let start = source.start_time().unwrap_or(0.0);
    info!("replaying {} samples from {}", source.remaining(), input.display());
    stream_session(&spec, "replay", start, &mut source, args.out.as_deref())
}

/// Run one session, printing each refreshed snapshot as a JSON line while it
/// is produced, and write the session files when `out` is given.
fn stream_session<S: SampleSource>(
    spec: &SessionSpec,
    source_name: &str,
    start_at: f64,
    source: &mut S,
    out: Option<&Path>,
) -> Result<()> {
    let engine = SharedEngine::new(HrvEngine::new(spec.engine())?);
    let updates = engine.subscribe();
    let printer = thread::spawn(move || -> Result<()> {
        for metrics in updates {
            println!("{}", serde_json::to_string(&metrics)?);
        }
        Ok(())
    });

    let mut sink = match out {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            Some(CsvLogSink::open(&dir.join("session.csv"))?)
        }
        None => None,
    };
    let bundle = run_session(spec, source_name, start_at, source, &engine, sink.as_mut());
    // closing the last handle ends the subscription
    drop(engine);
    printer
        .join()
        .map_err(|_| anyhow!("metrics printer panicked"))??;
    let bundle = bundle?;
    if let Some(dir) = out {
        write_session_files(dir, &bundle)?;
    }
    Ok(())
}

fn write_session_files(dir: &Path, bundle: &SessionBundle) -> Result<()> {
    write_metrics_jsonl(&dir.join("metrics.jsonl"), &bundle.metrics)?;
    write_manifest(&dir.join("session.json"), &bundle.manifest)?;
    Ok(())
}

fn read_samples(input: Option<&Path>) -> Result<Vec<f64>> {
    match input {
        Some(path) => text_io::read_f64_series(path),
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            text_io::parse_f64_series(&buf)
        }
    }
}

#[derive(Serialize)]
struct HrvTimeOutput {
    #[serde(flatten)]
    metrics: HRVMetrics,
    mean_bpm: Option<f64>,
    rejected: u64,
}

fn cmd_hrv_time(input: Option<&Path>, min_rr_s: f64, max_rr_s: f64) -> Result<()> {
    let rr = read_samples(input)?;
    // the whole series is one window
    let mut engine = HrvEngine::new(EngineConfig {
        capacity: rr.len().max(1),
        min_rr_s,
        max_rr_s,
        ..EngineConfig::default()
    })?;
    for x in rr {
        engine.ingest_interval(x);
    }
    let metrics = engine.refresh();
    let out = HrvTimeOutput {
        metrics,
        mean_bpm: metrics.mean_bpm(),
        rejected: engine.rejections().total,
    };
    println!("{}", serde_json::to_string(&out)?);
    Ok(())
}
