//! Command-line entry point for the projector controller.
//!
//! Bridges an MQTT control topic to the projector's serial port and
//! publishes the projector status back as retained messages.

mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use beamer_commands::{CommandQueue, CommandTable, Dispatcher, StopHandle};
use beamer_devices::{MqttBridge, SerialTransport};

use crate::config::ControllerConfig;

/// Projector control over RS-232, driven from MQTT.
#[derive(Parser, Debug)]
#[command(name = "beamer-control")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial device path, overrides the config file.
    #[arg(long)]
    serial_device: Option<String>,

    /// Serial baud rate, overrides the config file.
    #[arg(long)]
    baud_rate: Option<u32>,

    /// MQTT broker host, overrides the config file.
    #[arg(long)]
    mqtt_host: Option<String>,

    /// MQTT broker port, overrides the config file.
    #[arg(long)]
    mqtt_port: Option<u16>,

    /// Print the effective configuration and exit.
    #[arg(long)]
    check_config: bool,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    /// Write logs to this file instead of stdout.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Verbose output (debug level).
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Compact,
    Json,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let _guard = init_logging(&args)?;

    let config = load_config(&args)?;
    if args.check_config {
        print!("{}", config.to_toml()?);
        return Ok(ExitCode::SUCCESS);
    }

    run(config).await
}

/// Install the global subscriber. The returned guard flushes the log file.
fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    let level = if args.verbose {
        "debug"
    } else {
        args.log_level.as_str()
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log level '{}'", level))?;

    let (writer, guard, ansi) = match &args.log_file {
        Some(path) => {
            let (writer, guard) = file_writer(path)?;
            (BoxMakeWriter::new(writer), Some(guard), false)
        }
        None => (BoxMakeWriter::new(std::io::stdout), None, true),
    };

    match args.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(writer)
            .with_target(true)
            .init(),
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(false)
            .compact()
            .init(),
    }

    Ok(guard)
}

fn file_writer(
    path: &Path,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let file_name = path
        .file_name()
        .with_context(|| format!("Log file path {} has no file name", path.display()))?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let file_name = file_name
        .to_str()
        .with_context(|| format!("Log file name {} is not valid UTF-8", path.display()))?;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(dir)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    Ok(tracing_appender::non_blocking(appender))
}

/// Load the config file (if any), apply command-line overrides, validate.
fn load_config(args: &Args) -> Result<ControllerConfig> {
    let mut config = match &args.config {
        Some(path) => ControllerConfig::load(path)?,
        None => ControllerConfig::default(),
    };

    if let Some(device) = &args.serial_device {
        config.serial.device = device.clone();
    }
    if let Some(baud_rate) = args.baud_rate {
        config.serial.baud_rate = baud_rate;
    }
    if let Some(host) = &args.mqtt_host {
        config.mqtt.host = host.clone();
    }
    if let Some(port) = args.mqtt_port {
        config.mqtt.port = port;
    }

    config.validate().context("Configuration check failed")?;
    Ok(config)
}

/// Run both workers until one of them stops or Ctrl-C is received.
///
/// Either worker ending on its own is fatal for the whole process.
async fn run(config: ControllerConfig) -> Result<ExitCode> {
    let table = CommandTable::default();
    let queue = CommandQueue::new(config.protocol.queue_capacity);

    let (bridge, publisher) = MqttBridge::new(config.mqtt.clone(), table.clone(), queue.clone())
        .context("Failed to set up MQTT")?;
    let transport = SerialTransport::open(&config.serial, config.protocol.read_timeout())
        .context("Failed to set up serial port")?;

    let stop = StopHandle::new();
    let worker_stop = stop.clone();
    let protocol = config.protocol.clone();
    let mut serial_task = tokio::task::spawn_blocking(move || {
        let mut dispatcher =
            Dispatcher::new(transport, publisher, table, queue, &protocol, Instant::now());
        dispatcher.run(&worker_stop)
    });
    let mut mqtt_task = tokio::spawn(bridge.run());

    info!("beamer-control running");

    let code = tokio::select! {
        result = &mut serial_task => {
            match result {
                Ok(Ok(())) => error!("Serial worker stopped unexpectedly"),
                Ok(Err(e)) => error!("Serial worker failed: {}", e),
                Err(e) => error!("Serial worker panicked: {}", e),
            }
            mqtt_task.abort();
            ExitCode::FAILURE
        }
        result = &mut mqtt_task => {
            match result {
                Ok(Ok(())) => error!("MQTT bridge stopped unexpectedly"),
                Ok(Err(e)) => error!("MQTT bridge failed: {}", e),
                Err(e) => error!("MQTT bridge panicked: {}", e),
            }
            stop.stop();
            let _ = serial_task.await;
            ExitCode::FAILURE
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Shutting down");
            stop.stop();
            mqtt_task.abort();
            let _ = serial_task.await;
            ExitCode::SUCCESS
        }
    };

    Ok(code)
}
