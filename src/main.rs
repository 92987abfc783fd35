//! CLI Entry Point for bk_psu
//!
//! Provides command-line control of a BK Precision 1697B:
//! - Identification and full status readout
//! - Setting voltage, current and their upper limits
//! - Switching the output
//! - Background monitoring with CSV logging and threshold alerts
//!
//! # Usage
//!
//! ```bash
//! bk_psu --port /dev/ttyACM0 info
//! bk_psu set --voltage 9 --current 2.5
//! bk_psu output on
//! bk_psu monitor --interval 10s --duration 1h --log-dir logs
//! ```

use anyhow::{Context, Result};
use bk_psu::config::{LogFormat, PsuConfig};
use bk_psu::instrument::Bk1697b;
use bk_psu::logging;
use bk_psu::monitor::{Monitor, SharedSupply};
use clap::{Parser, Subcommand, ValueEnum};
use serde::de::value::StrDeserializer;
use serde::de::IntoDeserializer;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "bk_psu")]
#[command(about = "Control a BK Precision 1697B power supply over serial", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serial port, overrides the configuration file
    #[arg(long, global = true)]
    port: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format, overrides the configuration file
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print identification and SCPI version
    Info,

    /// Print output state, settings, measurements and limits
    Status,

    /// Program setpoints and limits
    Set {
        /// Output voltage (V)
        #[arg(long)]
        voltage: Option<f64>,
        /// Output current (A)
        #[arg(long)]
        current: Option<f64>,
        /// Upper voltage limit (V)
        #[arg(long)]
        voltage_limit: Option<f64>,
        /// Upper current limit (A)
        #[arg(long)]
        current_limit: Option<f64>,
    },

    /// Switch or query the output
    Output {
        #[arg(value_enum)]
        action: OutputAction,
    },

    /// Poll measurements, log them to CSV and report threshold alerts
    Monitor {
        /// Time between polls, e.g. "10s"
        #[arg(long, value_parser = humantime_duration)]
        interval: Option<Duration>,
        /// Stop after this long, e.g. "30m" (runs until Ctrl-C if omitted)
        #[arg(long, value_parser = humantime_duration)]
        duration: Option<Duration>,
        /// Directory for the CSV log
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputAction {
    On,
    Off,
    Toggle,
    Status,
}

/// Parse "10s", "30m", "1h 30m" the same way the configuration file does.
fn humantime_duration(s: &str) -> Result<Duration, String> {
    let de: StrDeserializer<'_, serde::de::value::Error> = s.into_deserializer();
    humantime_serde::deserialize(de).map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PsuConfig::load_from(path),
        None => PsuConfig::load(),
    }
    .context("Failed to load configuration")?;
    if let Some(port) = &cli.port {
        config.link.path = port.clone();
    }
    if let Some(level) = &cli.log_level {
        config.application.log_level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.application.log_format = format;
    }
    config.validate().context("Invalid configuration")?;
    logging::init_from_config(&config)?;

    let mut psu = Bk1697b::open(&config.link, config.timing)
        .with_context(|| format!("Could not connect to {}", config.link.path))?;

    match cli.command {
        Commands::Monitor {
            interval,
            duration,
            log_dir,
        } => {
            if let Some(interval) = interval {
                config.monitor.interval = interval;
            }
            if let Some(dir) = log_dir {
                config.monitor.log_dir = dir;
            }
            run_monitor(psu, &config, duration)
        }
        command => {
            let result = run_command(&mut psu, command);
            psu.close();
            result
        }
    }
}

fn run_command(psu: &mut Bk1697b, command: Commands) -> Result<()> {
    match command {
        Commands::Info => {
            println!("Device: {}", psu.identification()?.as_deref().unwrap_or("--"));
            println!("SCPI version: {}", psu.version()?.as_deref().unwrap_or("--"));
        }
        Commands::Status => {
            let status = psu.status()?;
            let show = |v: Option<f64>| v.map_or("--".to_string(), |v| format!("{:.3}", v));
            let output = status.output.map_or("--".to_string(), |o| o.to_string());
            println!("Output:          {}", output);
            println!("Voltage setting: {} V", show(status.voltage_setting));
            println!("Current setting: {} A", show(status.current_setting));
            println!(
                "Measured:        {} V  {} A  {} W",
                show(status.voltage),
                show(status.current),
                show(status.power)
            );
            println!(
                "Upper limits:    {} V  {} A",
                show(status.voltage_limit),
                show(status.current_limit)
            );
        }
        Commands::Set {
            voltage,
            current,
            voltage_limit,
            current_limit,
        } => {
            if let Some(v) = voltage_limit {
                psu.set_upper_limit_voltage(v)?;
            }
            if let Some(c) = current_limit {
                psu.set_upper_limit_current(c)?;
            }
            if let Some(v) = voltage {
                psu.set_voltage(v)?;
            }
            if let Some(c) = current {
                psu.set_current(c)?;
            }
            println!(
                "Voltage setting: {:.2} V, current setting: {:.2} A",
                psu.voltage_setting()?,
                psu.current_setting()?
            );
        }
        Commands::Output { action } => {
            let state = match action {
                OutputAction::On => {
                    psu.turn_on()?;
                    psu.output_state()?
                }
                OutputAction::Off => {
                    psu.turn_off()?;
                    psu.output_state()?
                }
                OutputAction::Toggle => {
                    psu.toggle_output()?;
                    psu.output_state()?
                }
                OutputAction::Status => psu.output_state()?,
            };
            println!("Output: {}", state);
        }
        Commands::Monitor { .. } => anyhow::bail!("monitor runs on a shared supply"),
    }
    Ok(())
}

fn run_monitor(psu: Bk1697b, config: &PsuConfig, duration: Option<Duration>) -> Result<()> {
    let shared = SharedSupply::new(psu);
    let (tx, rx) = mpsc::channel();
    let monitor = Monitor::start(shared.clone(), &config.monitor, tx)?;
    println!("Logging to {}", monitor.csv_path().display());

    let deadline = duration.map(|d| Instant::now() + d);
    loop {
        let wait = match deadline {
            Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                Some(left) => left.min(config.monitor.interval),
                None => break,
            },
            None => config.monitor.interval,
        };
        match rx.recv_timeout(wait) {
            Ok(alert) => println!("ALERT: {}", alert),
            Err(RecvTimeoutError::Timeout) => {
                if !monitor.is_running() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let samples = monitor.stop();
    shared.close()?;
    println!("Took {} samples", samples);
    Ok(())
}
