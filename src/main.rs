//! CLI entry point for waveform-daq.
//!
//! # Usage
//!
//! Acquire from the simulated device until Ctrl+C (or for a fixed time):
//! ```bash
//! waveform-daq acquire --config config/daq.toml --duration 30s
//! ```
//!
//! Inspect or export a previous capture:
//! ```bash
//! waveform-daq load Measurements/measurement_20250101_120000.tdms
//! waveform-daq export Measurements/measurement_20250101_120000.tdms out.csv
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::runtime::Handle;
use tracing::{info, warn};
use waveform_daq::config::Settings;
use waveform_daq::data::WaveformCapture;
use waveform_daq::hardware::simulated_factory;
use waveform_daq::logging::{self, LogFormat, LoggingConfig};
use waveform_daq::session::AcquisitionSession;

#[derive(Parser)]
#[command(name = "waveform-daq")]
#[command(about = "Continuous analog acquisition with TDMS logging", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = CliLogFormat::Compact, global = true)]
    log_format: CliLogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliLogFormat {
    Pretty,
    Compact,
    Json,
}

impl From<CliLogFormat> for LogFormat {
    fn from(value: CliLogFormat) -> Self {
        match value {
            CliLogFormat::Pretty => LogFormat::Pretty,
            CliLogFormat::Compact => LogFormat::Compact,
            CliLogFormat::Json => LogFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire from the simulated device
    Acquire {
        /// Settings file
        #[arg(long, default_value = "config/daq.toml")]
        config: PathBuf,

        /// Stop after this long (e.g. "30s", "2m"); default runs until Ctrl+C
        #[arg(long, value_parser = parse_duration)]
        duration: Option<Duration>,

        /// Print every Nth snapshot
        #[arg(long, default_value_t = 10)]
        print_every: u64,
    },

    /// Summarize a TDMS capture
    Load {
        /// Path to the .tdms file
        file: PathBuf,
    },

    /// Export a TDMS capture as CSV
    Export {
        /// Path to the .tdms file
        file: PathBuf,
        /// Destination .csv file
        output: PathBuf,
    },
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = LogFormat::from(cli.log_format);

    match cli.command {
        Commands::Acquire {
            config,
            duration,
            print_every,
        } => acquire(config, duration, print_every, format).await,
        Commands::Load { file } => {
            logging::init(LoggingConfig::default().with_format(format))?;
            load(file)
        }
        Commands::Export { file, output } => {
            logging::init(LoggingConfig::default().with_format(format))?;
            export(file, output)
        }
    }
}

async fn acquire(
    config: PathBuf,
    duration: Option<Duration>,
    print_every: u64,
    format: LogFormat,
) -> Result<()> {
    let settings = Settings::load_from(&config)
        .with_context(|| format!("loading settings from {}", config.display()))?;
    settings.validate()?;
    logging::init(LoggingConfig::from_settings(&settings)?.with_format(format))?;
    info!(
        app = %settings.application.name,
        device = %settings.global.device,
        channels = settings.channels.len(),
        "Settings loaded"
    );

    let session = AcquisitionSession::from_settings(
        &settings,
        simulated_factory(settings.simulation.clone()),
    )?;

    let names: Arc<[String]> = session.channels().iter().map(|c| c.name.clone()).collect();
    let every = print_every.max(1);
    session.attach_consumer(&Handle::current(), move |snapshot| {
        if snapshot.sequence % every != 0 {
            return;
        }
        let values: Vec<String> = names
            .iter()
            .zip(snapshot.latest_values())
            .map(|(name, v)| format!("{name}={v:.4}"))
            .collect();
        println!(
            "t={:>9.3}s  {}",
            snapshot.latest_time().unwrap_or(0.0),
            values.join("  ")
        );
    });

    let path = match session.start() {
        Ok(path) => path,
        Err(err) => {
            let (title, body) = err.user_message();
            eprintln!("{title}\n\n{body}");
            return Err(err.into());
        }
    };
    println!("Logging to {}", path.display());

    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Ctrl+C handler failed");
            }
        }
        _ = deadline => {}
        _ = session.wait_until_stopped() => {}
    }

    session.stop();
    session.wait_until_stopped().await;
    session.detach_consumer();

    if let Some(err) = session.last_error() {
        let (title, body) = err.user_message;
        bail!("{title}: {body}");
    }
    println!("Saved {}", path.display());
    Ok(())
}

fn load(file: PathBuf) -> Result<()> {
    let capture = WaveformCapture::load(&file)?;
    println!("File:       {}", file.display());
    println!("Samples:    {}", capture.num_samples());
    println!("Increment:  {} s", capture.sample_increment);
    for ch in &capture.channels {
        println!(
            "  {:<20} {:>8} samples  [{}]",
            ch.name,
            ch.samples.len(),
            ch.unit().unwrap_or("-")
        );
    }
    Ok(())
}

#[cfg(feature = "storage_csv")]
fn export(file: PathBuf, output: PathBuf) -> Result<()> {
    let capture = waveform_daq::data::export::export_container(&file, &output)?;
    println!(
        "Exported {} channels x {} samples to {}",
        capture.channels.len(),
        capture.num_samples(),
        output.display()
    );
    Ok(())
}

#[cfg(not(feature = "storage_csv"))]
fn export(_file: PathBuf, _output: PathBuf) -> Result<()> {
    bail!("CSV export is not enabled. Please build with --features storage_csv")
}
