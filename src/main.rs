//! CLI driver: reads a frame log, runs it through the pipeline, and writes
//! alerts to the configured sinks. Contains no detection logic of its own,
//! it owns frame I/O and pipeline wiring only.

mod constants;
mod logic;

use clap::{Args, Parser, Subcommand};
use logic::alerting::sink::SinkConfig;
use logic::alerting::{AlertManager, AlertManagerConfig};
use logic::config::ConfigStore;
use logic::frame::Frame;
use logic::pipeline::{Mode, Pipeline};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;
use sysinfo::{Pid, System};

#[derive(Parser, Debug)]
#[command(name = "can-ids-core")]
#[command(about = "CAN bus intrusion detection core")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accumulate baselines only, never emit alerts.
    Learn(RunArgs),
    /// Detect against baselines already present in the config file.
    Detect(RunArgs),
    /// Learn until the window closes, then detect for the rest of the run.
    Auto(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Frame log to read (newline-delimited JSON). Defaults to stdin.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Configuration file: global settings, per-ID overrides, learned baselines.
    #[arg(long)]
    config: PathBuf,

    /// Directory alert output is written to.
    #[arg(long, default_value = "logs")]
    output_dir: PathBuf,

    /// Overrides learning_params.initial_learning_window_sec for this run.
    #[arg(long)]
    learning_duration: Option<f64>,

    /// Frames processed between debug-level progress log lines.
    #[arg(long, default_value_t = 1000)]
    batch_size: u64,

    /// Process RSS, in MB, above which memory-pressure cleanup runs.
    #[arg(long)]
    memory_limit: Option<u64>,

    /// Seconds between periodic summary log lines.
    #[arg(long, default_value_t = 30)]
    stats_interval: u64,
}

fn main() -> ExitCode {
    env_logger::init();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let (mode, args) = match cli.command {
        Command::Learn(a) => (Mode::Learn, a),
        Command::Detect(a) => (Mode::Detect, a),
        Command::Auto(a) => (Mode::Auto, a),
    };

    let config = ConfigStore::load(&args.config)?;
    for msg in config.validation_errors() {
        log::warn!("config validation: {}", msg);
    }

    std::fs::create_dir_all(&args.output_dir)?;

    let learning_window = args.learning_duration.unwrap_or_else(|| {
        config.get_global_setting_or("learning_params", "initial_learning_window_sec", 300.0)
    });

    let mut alert_manager = AlertManager::new(AlertManagerConfig::default());
    alert_manager.enable_console(SinkConfig::default());
    alert_manager.enable_json_file(args.output_dir.join("alerts.jsonl"), SinkConfig::default())?;

    let mut pipeline = Pipeline::new(config, alert_manager, mode, learning_window);

    let reader: Box<dyn BufRead> = match &args.input {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let mut sys = System::new();
    let pid = Pid::from_u32(std::process::id());
    let stats_interval = std::time::Duration::from_secs(args.stats_interval);
    let mut last_stats_log = std::time::Instant::now();
    let mut frame_count: u64 = 0;
    let mut alert_count: u64 = 0;
    let mut last_timestamp = 0.0f64;

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let frame = match Frame::parse_json_line(&line) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("skipping unparseable frame: {}", e);
                continue;
            }
        };
        last_timestamp = frame.timestamp;
        alert_count += pipeline.process_frame(&frame).len() as u64;
        frame_count += 1;

        if frame_count % args.batch_size == 0 {
            log::debug!("processed {} frames, {} alerts so far", frame_count, alert_count);
        }

        if let Some(limit_mb) = args.memory_limit {
            sys.refresh_process(pid);
            if let Some(proc) = sys.process(pid) {
                let rss_mb = proc.memory() / 1024 / 1024;
                if rss_mb > limit_mb {
                    log::warn!(
                        "memory limit exceeded ({} MB > {} MB), running pressure cleanup",
                        rss_mb,
                        limit_mb
                    );
                    pipeline.state.memory_pressure_cleanup(last_timestamp);
                    pipeline.alerts.reduce_alert_retention(last_timestamp);
                }
            }
        }

        if last_stats_log.elapsed() >= stats_interval {
            let stats = pipeline.alerts.stats();
            log::info!(
                "frames={} tracked_ids={} alerts={} throttled={}",
                frame_count,
                pipeline.state.len(),
                stats.total_alerts,
                stats.throttled_alerts
            );
            last_stats_log = std::time::Instant::now();
        }
    }

    if pipeline.mode() != Mode::Detect {
        let finalized = pipeline.finish_learning();
        log::info!("learning finished, {} IDs finalized into baselines", finalized.len());
        pipeline.config.save_config(Some(&args.config))?;
    }

    log::info!("run complete: {} frames processed, {} alerts accepted", frame_count, alert_count);
    Ok(())
}
