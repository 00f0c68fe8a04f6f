use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use actimetry::{
    read_readings, run_session, ActimetryError, DataLayout, Participant, ParticipantTable,
    PipelineConfig, SessionInput, SessionMetrics,
};
use anyhow::{anyhow, Context, Result};
use chrono::DateTime;
use clap::{ArgAction, Parser, Subcommand, ValueHint};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Functional arm-use metrics from wrist actimetry", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline for one or more sessions and write metric tables
    Process(ProcessArgs),
    /// Report sampling statistics of the raw readings per session and side
    Diagnose(DiagnoseArgs),
}

#[derive(Parser, Debug)]
struct SessionSelection {
    /// Study data root (holds participants_<month>.csv and data_actimetry/)
    #[arg(long, value_hint = ValueHint::DirPath)]
    data_dir: PathBuf,

    /// Cohort month selecting the participant metadata file
    #[arg(long)]
    month: Option<String>,

    /// Session identifiers (folder names) to process
    sessions: Vec<String>,

    /// Process every session listed in the participant table
    #[arg(long, action = ArgAction::SetTrue, conflicts_with = "sessions")]
    all_sessions: bool,
}

#[derive(Parser, Debug)]
struct ProcessArgs {
    #[command(flatten)]
    selection: SessionSelection,

    /// JSON pipeline config; flags below override its values
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Low-pass cutoff frequency (Hz)
    #[arg(long)]
    cutoff_hz: Option<f64>,

    /// Skip low-pass filtering
    #[arg(long, action = ArgAction::SetTrue, conflicts_with = "cutoff_hz")]
    no_filter: bool,

    /// Resampling frequency (Hz)
    #[arg(long)]
    resample_hz: Option<f64>,

    /// Keep native sampling (skip resampling)
    #[arg(long, action = ArgAction::SetTrue, conflicts_with = "resample_hz")]
    raw_sampling: bool,

    /// Epoch duration in seconds
    #[arg(long)]
    window_s: Option<f64>,

    /// Maximum |elevation| (degrees) for functional use
    #[arg(long)]
    symmetry_deg: Option<f64>,

    /// Minimum elevation range (degrees) for functional use
    #[arg(long)]
    amplitude_deg: Option<f64>,

    /// Jerk magnitude below which a sample is dropped from both arms
    #[arg(long)]
    jerk_threshold: Option<f64>,

    /// Per-second count a second must exceed to count as active
    #[arg(long)]
    activity_threshold: Option<f64>,

    /// Summary CSV path (`-` for stdout)
    #[arg(short, long, default_value = "actimetry_summary.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Per-day counts CSV path
    #[arg(long, value_hint = ValueHint::FilePath)]
    daily_output: Option<PathBuf>,

    /// Full per-session metrics as JSON
    #[arg(long, value_hint = ValueHint::FilePath)]
    json: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,

    /// Profile major stages with timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,
}

#[derive(Parser, Debug)]
struct DiagnoseArgs {
    #[command(flatten)]
    selection: SessionSelection,

    /// Output report path (`-` for stdout)
    #[arg(short, long, default_value = "actimetry_diagnostics.txt", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Process(args) => args.verbose,
        Command::Diagnose(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Process(args) => handle_process(args),
        Command::Diagnose(args) => handle_diagnose(args),
    }
}

fn build_config(args: &ProcessArgs) -> Result<PipelineConfig> {
    let mut config = match args.config.as_ref() {
        Some(path) => PipelineConfig::load_json(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(month) = args.selection.month.as_ref() {
        config.month = Some(month.clone());
    }
    if args.no_filter {
        config.filter_cutoff_hz = None;
    } else if let Some(cutoff) = args.cutoff_hz {
        config.filter_cutoff_hz = Some(cutoff);
    }
    if args.raw_sampling {
        config.resampling_freq_hz = None;
    } else if let Some(freq) = args.resample_hz {
        config.resampling_freq_hz = Some(freq);
    }
    if let Some(seconds) = args.window_s {
        config.seconds_per_window = seconds;
    }
    if let Some(deg) = args.symmetry_deg {
        config.symmetry_threshold_deg = deg;
    }
    if let Some(deg) = args.amplitude_deg {
        config.amplitude_threshold_deg = deg;
    }
    if let Some(threshold) = args.jerk_threshold {
        config.jerk_removal_threshold = threshold;
    }
    if let Some(threshold) = args.activity_threshold {
        config.activity_threshold = threshold;
    }

    config.validate()?;
    Ok(config)
}

fn load_table(layout: &DataLayout, config: &PipelineConfig) -> Result<ParticipantTable> {
    layout
        .load_participants(config)
        .with_context(|| format!("failed to load participant metadata from {}", layout.root.display()))
}

fn select_participants(
    table: &ParticipantTable,
    selection: &SessionSelection,
) -> Result<Vec<Participant>> {
    if selection.all_sessions {
        if table.is_empty() {
            return Err(anyhow!("participant table lists no sessions"));
        }
        return table
            .sessions()
            .iter()
            .map(|session| table.lookup(session).cloned().map_err(anyhow::Error::from))
            .collect();
    }
    if selection.sessions.is_empty() {
        return Err(anyhow!("no sessions supplied; pass session ids or --all-sessions"));
    }
    selection
        .sessions
        .iter()
        .map(|session| table.lookup(session).cloned().map_err(anyhow::Error::from))
        .collect()
}

fn handle_process(args: ProcessArgs) -> Result<()> {
    let config = build_config(&args)?;
    let layout = DataLayout::new(&args.selection.data_dir);
    let table = load_table(&layout, &config)?;
    let participants = select_participants(&table, &args.selection)?;
    debug!(?config, sessions = participants.len(), "pipeline configured");

    let t_parse = Instant::now();
    let inputs: Vec<Result<SessionInput, ActimetryError>> = participants
        .par_iter()
        .map(|participant| SessionInput::load(&layout, participant))
        .collect();
    if args.profile || args.verbose {
        info!(
            "Parse stage: {:.1} ms ({} sessions)",
            t_parse.elapsed().as_secs_f64() * 1000.0,
            inputs.len()
        );
    }

    let t_compute = Instant::now();
    let outcomes: Vec<Result<SessionMetrics, ActimetryError>> = inputs
        .into_par_iter()
        .map(|input| input.and_then(|input| run_session(&input, &config)))
        .collect();
    if args.profile || args.verbose {
        info!(
            "Compute stage: {:.1} ms",
            t_compute.elapsed().as_secs_f64() * 1000.0
        );
    }

    let attempted = outcomes.len();
    let mut metrics = Vec::with_capacity(attempted);
    for outcome in outcomes {
        match outcome {
            Ok(session) => metrics.push(session),
            Err(err) => warn!("Skipping {}", err),
        }
    }
    if metrics.is_empty() {
        return Err(anyhow!("all {} sessions failed", attempted));
    }
    info!(
        "Processed {} of {} sessions",
        metrics.len(),
        attempted
    );

    let t_write = Instant::now();
    if args.output.as_os_str() == "-" {
        let stdout = io::stdout();
        write_summary_rows(&metrics, &mut csv::Writer::from_writer(stdout.lock()))?;
    } else {
        let file = File::create(&args.output)
            .with_context(|| format!("failed to create {}", args.output.display()))?;
        write_summary_rows(&metrics, &mut csv::Writer::from_writer(file))?;
        info!("Wrote summary CSV: {}", args.output.display());
    }

    if let Some(path) = args.daily_output.as_ref() {
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        write_daily_rows(&metrics, &mut csv::Writer::from_writer(file))?;
        info!("Wrote daily CSV: {}", path.display());
    }

    if let Some(path) = args.json.as_ref() {
        write_json(&metrics, path)?;
        info!("Wrote metrics JSON: {}", path.display());
    }
    if args.profile || args.verbose {
        info!(
            "Write stage: {:.1} ms",
            t_write.elapsed().as_secs_f64() * 1000.0
        );
    }

    Ok(())
}

fn fmt_value(value: f64) -> String {
    if value.is_finite() {
        format!("{:.4}", value)
    } else {
        String::new()
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map(fmt_value).unwrap_or_default()
}

fn write_summary_rows<W: Write>(metrics: &[SessionMetrics], writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record([
        "session",
        "is_patient",
        "fm_score",
        "paretic_side",
        "num_epochs",
        "window_size",
        "num_days",
        "functional_non_paretic",
        "functional_paretic",
        "use_hours_non_paretic",
        "use_hours_paretic",
        "use_ratio",
        "jerk_ratio_mean",
        "jerk_ratio_median",
        "jerk_samples",
    ])?;

    for m in metrics {
        writer.write_record([
            m.session.clone(),
            m.is_patient.to_string(),
            fmt_opt(m.fm_score),
            m.paretic_side.to_string(),
            m.num_epochs.to_string(),
            m.window_size.to_string(),
            m.num_days().to_string(),
            m.functional_epochs[0].to_string(),
            m.functional_epochs[1].to_string(),
            fmt_value(m.use_hours[0]),
            fmt_value(m.use_hours[1]),
            fmt_value(m.total_use_ratio),
            fmt_opt(m.jerk_ratio.mean),
            fmt_opt(m.jerk_ratio.median),
            m.jerk_ratio.retained.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

fn write_daily_rows<W: Write>(metrics: &[SessionMetrics], writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record([
        "session",
        "day",
        "functional_non_paretic",
        "functional_paretic",
        "use_ratio",
    ])?;

    for m in metrics {
        for (day, (counts, ratio)) in m.daily_counts.iter().zip(&m.daily_use_ratio).enumerate() {
            writer.write_record([
                m.session.clone(),
                day.to_string(),
                counts[0].to_string(),
                counts[1].to_string(),
                fmt_value(*ratio),
            ])?;
        }
    }

    writer.flush()?;
    Ok(())
}

fn write_json(metrics: &[SessionMetrics], path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, metrics)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Default)]
struct SamplingStats {
    count: usize,
    first_us: Option<i64>,
    last_us: Option<i64>,
    mean_interval_s: Option<f64>,
    max_interval_s: Option<f64>,
}

impl SamplingStats {
    fn from_times(mut times: Vec<i64>) -> Self {
        times.sort_unstable();
        let count = times.len();
        let mut stats = SamplingStats {
            count,
            first_us: times.first().copied(),
            last_us: times.last().copied(),
            ..SamplingStats::default()
        };
        if count >= 2 {
            let span = (times[count - 1] - times[0]) as f64;
            stats.mean_interval_s = Some(span / (count - 1) as f64 / 1e6);
            stats.max_interval_s = times
                .windows(2)
                .map(|pair| pair[1] - pair[0])
                .max()
                .map(|us| us as f64 / 1e6);
        }
        stats
    }

    fn nyquist_hz(&self) -> Option<f64> {
        self.mean_interval_s
            .filter(|&dt| dt > 0.0)
            .map(|dt| 0.5 / dt)
    }
}

fn fmt_time(us: Option<i64>) -> String {
    us.and_then(DateTime::from_timestamp_micros)
        .map_or("n/a".into(), |ts| ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
}

fn handle_diagnose(args: DiagnoseArgs) -> Result<()> {
    let layout = DataLayout::new(&args.selection.data_dir);
    let config = PipelineConfig {
        month: args.selection.month.clone(),
        ..PipelineConfig::default()
    };
    let table = load_table(&layout, &config)?;
    let participants = select_participants(&table, &args.selection)?;

    let mut report = String::new();
    for participant in &participants {
        report.push_str(&format!("SESSION: {}\n", participant.session));
        report.push_str(&format!(
            "  is_patient: {}, FMScore: {}, paretic_side: {}\n",
            participant.is_patient,
            participant
                .fm_score
                .map_or("n/a".into(), |v| format!("{:.1}", v)),
            participant.paretic_side
        ));

        for (role, side) in [
            ("paretic", participant.paretic_side),
            ("non_paretic", participant.non_paretic_side()),
        ] {
            let path = layout.readings_path(&participant.session, side);
            let samples = match read_readings(&path) {
                Ok(samples) => samples,
                Err(err) => {
                    warn!("Cannot read {}: {}", path.display(), err);
                    report.push_str(&format!("  {} ({}): unreadable: {}\n", role, side, err));
                    continue;
                }
            };
            let stats = SamplingStats::from_times(samples.iter().map(|s| s.t_us).collect());
            report.push_str(&format!("  {} ({}):\n", role, side));
            report.push_str(&format!("    samples: {}\n", stats.count));
            report.push_str(&format!("    first: {}\n", fmt_time(stats.first_us)));
            report.push_str(&format!("    last: {}\n", fmt_time(stats.last_us)));
            report.push_str(&format!(
                "    mean_interval_s: {}\n",
                stats.mean_interval_s.map_or("n/a".into(), |v| format!("{:.6}", v))
            ));
            report.push_str(&format!(
                "    max_interval_s: {}\n",
                stats.max_interval_s.map_or("n/a".into(), |v| format!("{:.6}", v))
            ));
            report.push_str(&format!(
                "    nyquist_hz: {}\n",
                stats.nyquist_hz().map_or("n/a".into(), |v| format!("{:.3}", v))
            ));
        }
        report.push('\n');
    }

    if args.output.as_os_str() == "-" {
        io::stdout().lock().write_all(report.as_bytes())?;
    } else {
        fs::write(&args.output, report)
            .with_context(|| format!("failed to write {}", args.output.display()))?;
        info!("Diagnostic report written: {}", args.output.display());
    }
    Ok(())
}
