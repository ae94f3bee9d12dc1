//! Lighttrace CLI
//!
//! Reconstructs connectivity and device-state timelines from raw telemetry
//! rows and prints per-day aggregation tables. Rows are read from a JSONL
//! file standing in for the storage collaborator.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use lighttrace::{
    config::Config,
    engine::daily::{
        self, day_bounds, gaze_durations, scene_durations, settings_durations,
    },
    engine::{aggregate_batch, connection, state_series, AggregationOptions, DeviceState},
    event::{partition_rows, DeviceEvents, RawRow},
    VERSION,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lighttrace")]
#[command(version = VERSION)]
#[command(about = "Interval reconstruction and daily aggregation for device telemetry", long_about = None)]
struct Cli {
    /// JSONL file with raw telemetry rows
    #[arg(long, short, global = true, default_value = "events.jsonl")]
    input: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconstruct connected/disconnected intervals for one device
    Connectivity {
        /// Device name
        #[arg(long)]
        device: String,

        /// First day of the query window (YYYY-MM-DD)
        #[arg(long)]
        since: NaiveDate,

        /// Last day of the query window (YYYY-MM-DD)
        #[arg(long)]
        until: NaiveDate,

        /// Largest heartbeat gap in seconds still considered connected
        #[arg(long)]
        max_delay: Option<u64>,

        /// Clip boundary intervals to the query window
        #[arg(long)]
        cut: bool,
    },

    /// Replay the device state series for one device
    State {
        #[arg(long)]
        device: String,

        #[arg(long)]
        since: NaiveDate,

        #[arg(long)]
        until: NaiveDate,

        /// Forward-fill the series at the configured resampling step
        #[arg(long)]
        resample: bool,
    },

    /// Per-day scene durations for one device
    Scenes {
        #[arg(long)]
        device: String,

        #[arg(long)]
        since: NaiveDate,

        #[arg(long)]
        until: NaiveDate,
    },

    /// Per-day settings-menu durations for one device
    Settings {
        #[arg(long)]
        device: String,

        #[arg(long)]
        since: NaiveDate,

        #[arg(long)]
        until: NaiveDate,
    },

    /// Per-day gaze-zone durations for one device
    Gaze {
        #[arg(long)]
        device: String,

        #[arg(long)]
        since: NaiveDate,

        #[arg(long)]
        until: NaiveDate,
    },

    /// Aggregate every device in the input into daily records
    Report {
        #[arg(long)]
        since: NaiveDate,

        #[arg(long)]
        until: NaiveDate,

        /// Output format (json or jsonl)
        #[arg(long, default_value = "json")]
        format: String,
    },

    /// Show configuration
    Config,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load().unwrap_or_default();
    let options = config
        .aggregation_options()
        .context("invalid configuration")?;

    match cli.command {
        Commands::Connectivity {
            device,
            since,
            until,
            max_delay,
            cut,
        } => {
            let max_delay = max_delay
                .map(|secs| Duration::seconds(secs as i64))
                .unwrap_or(options.max_delay);
            cmd_connectivity(&cli.input, &device, since, until, max_delay, cut, &options)
        }
        Commands::State {
            device,
            since,
            until,
            resample,
        } => {
            let step = resample.then(|| config.resample_step());
            cmd_state(&cli.input, &device, since, until, step, &options)
        }
        Commands::Scenes {
            device,
            since,
            until,
        } => {
            let events = device_events(&cli.input, &device)?;
            let table = scene_durations(&events.instructions, since, until, &options)?;
            print_json(&table)
        }
        Commands::Settings {
            device,
            since,
            until,
        } => {
            let events = device_events(&cli.input, &device)?;
            let table = settings_durations(&events.instructions, since, until, &options)?;
            print_json(&table)
        }
        Commands::Gaze {
            device,
            since,
            until,
        } => {
            let events = device_events(&cli.input, &device)?;
            let table = gaze_durations(&events.gaze, since, until, &options)?;
            print_json(&table)
        }
        Commands::Report {
            since,
            until,
            format,
        } => cmd_report(&cli.input, since, until, &format, &options),
        Commands::Config => cmd_config(&config),
    }
}

/// Load raw telemetry rows from a JSONL file.
fn load_rows(path: &Path) -> Result<Vec<RawRow>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("could not read input file {path:?}"))?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("malformed row at {path:?} line {}", number + 1))
        })
        .collect()
}

/// Load and classify the events of a single device.
///
/// Only the requested device's rows are classified, so an unclassifiable
/// row on another device cannot abort this query. A device without any
/// rows is not an error; it resolves to empty streams (full-window
/// "disconnected", default state, zero-filled day rows).
fn device_events(input: &Path, device: &str) -> Result<DeviceEvents> {
    let rows: Vec<RawRow> = load_rows(input)?
        .into_iter()
        .filter(|row| row.device == device)
        .collect();
    let mut devices = partition_rows(&rows)?;
    Ok(devices
        .remove(device)
        .unwrap_or_else(|| DeviceEvents::new(device)))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_connectivity(
    input: &Path,
    device: &str,
    since: NaiveDate,
    until: NaiveDate,
    max_delay: Duration,
    cut: bool,
    options: &AggregationOptions,
) -> Result<()> {
    let events = device_events(input, device)?;
    let (begin, end) = day_bounds(since, until, options.timezone);
    let intervals = connection(&events.heartbeats, begin, end, max_delay, cut);
    print_json(&intervals)
}

/// A state sample as printed by the `state` subcommand.
#[derive(Serialize)]
struct StateSample {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    state: DeviceState,
}

fn cmd_state(
    input: &Path,
    device: &str,
    since: NaiveDate,
    until: NaiveDate,
    resample: Option<Duration>,
    options: &AggregationOptions,
) -> Result<()> {
    let events = device_events(input, device)?;
    let (begin, end) = day_bounds(since, until, options.timezone);
    let series = state_series(&events.instructions, begin, end);

    let samples = match resample {
        Some(step) => series.resample(step),
        None => series.samples,
    };
    let samples: Vec<StateSample> = samples
        .into_iter()
        .map(|(timestamp, state)| StateSample { timestamp, state })
        .collect();
    print_json(&samples)
}

/// One device's slice of the batch report.
#[derive(Serialize)]
struct DeviceReport {
    device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    records: Option<Vec<daily::DailyRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn cmd_report(
    input: &Path,
    since: NaiveDate,
    until: NaiveDate,
    format: &str,
    options: &AggregationOptions,
) -> Result<()> {
    if format != "json" && format != "jsonl" {
        bail!("unknown format `{format}` (expected json or jsonl)");
    }

    let rows = load_rows(input)?;
    let results = aggregate_batch(&rows, since, until, options);

    let reports: Vec<DeviceReport> = results
        .into_iter()
        .map(|(device, result)| match result {
            Ok(records) => DeviceReport {
                device,
                records: Some(records),
                error: None,
            },
            Err(e) => DeviceReport {
                device,
                records: None,
                error: Some(e.to_string()),
            },
        })
        .collect();

    if format == "jsonl" {
        for report in &reports {
            println!("{}", serde_json::to_string(report)?);
        }
    } else {
        print_json(&reports)?;
    }
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
