//! dtvd: local IPC service for TV tuner hardware.
//!
//! Clients connect over a Unix socket to list tuners, select a tuner source
//! and receive its stream descriptors, and drive channel scanning and EPG
//! queries. Scan progress and EIT updates are pushed as notifications.

use std::path::PathBuf;

use clap::Parser;
use log::{error, info};

mod backend;
mod config;
mod dispatch;
mod hal;
mod logging;
mod notify;
mod registry;
mod server;

use backend::UnsupportedBackend;
use config::{load_config, ConfigFile, DEFAULT_CONFIG_FILE, DEFAULT_SOCKET};
use dispatch::Dispatcher;
use hal::SimulatedHal;
use registry::{DeviceRegistry, DEFAULT_MAX_DEVICES};
use server::{Server, ServerConfig, Service, ServiceEvent};

const DEFAULT_EVENT_QUEUE: usize = 256;
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_RETENTION_DAYS: u64 = 7;

/// dtvd - TV tuner IPC service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path of the listening Unix socket
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Configuration file path
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory where log files are stored
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Number of days to keep log files
    #[arg(long)]
    log_retention_days: Option<u64>,

    /// Maximum number of tracked tuner devices
    #[arg(long)]
    max_devices: Option<usize>,

    /// Capacity of the service event queue
    #[arg(long)]
    event_queue: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Config file: explicit path > auto-detect > defaults
    let config_path = args.config.clone().or_else(|| {
        let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
        default_path.exists().then_some(default_path)
    });
    let file_config = match &config_path {
        Some(path) => match load_config(path) {
            Ok(c) => {
                eprintln!("Loaded config from: {}", path.display());
                c
            }
            Err(e) => {
                eprintln!("Failed to load config file: {}", e);
                return Err(e);
            }
        },
        None => ConfigFile::default(),
    };

    // Command line takes precedence over the config file.
    let log_dir = args
        .log_dir
        .clone()
        .or_else(|| file_config.logging.log_dir.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));
    let log_retention_days = args
        .log_retention_days
        .or(file_config.logging.retention_days)
        .unwrap_or(DEFAULT_RETENTION_DAYS);
    logging::init_logging(
        &log_dir,
        log_retention_days,
        args.verbose,
        file_config.logging.level.as_deref(),
    )?;

    let socket_path = args
        .socket
        .clone()
        .or_else(|| file_config.server.socket.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET));
    let max_devices = args
        .max_devices
        .or(file_config.server.max_devices)
        .unwrap_or(DEFAULT_MAX_DEVICES);
    let event_queue = args
        .event_queue
        .or(file_config.server.event_queue)
        .unwrap_or(DEFAULT_EVENT_QUEUE)
        .max(1);

    info!("dtvd starting...");
    info!("  Socket: {}", socket_path.display());
    info!("  Max devices: {}", max_devices);
    info!("  Event queue: {}", event_queue);
    info!("  Simulated devices: {}", file_config.hal.devices.len());

    let hal = SimulatedHal::new(&file_config.hal.devices);
    let registry = DeviceRegistry::new(Box::new(hal), max_devices);
    let dispatcher = Dispatcher::new(registry, Box::<UnsupportedBackend>::default());

    let mut service = Service::new(dispatcher, event_queue);
    let events = service.sender();
    service
        .init()
        .map_err(|e| format!("Failed to initialize service: {}", e))?;
    let service_task = tokio::spawn(service.run());

    let server = Server::new(ServerConfig { socket_path: socket_path.clone() }, events.clone());
    let listener = server.bind()?;

    tokio::select! {
        result = server.serve(listener) => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
        }
    }

    if events.send(ServiceEvent::Shutdown).await.is_err() {
        error!("Service task already stopped");
    }
    service_task.await?;

    if let Err(e) = std::fs::remove_file(&socket_path) {
        error!("Failed to remove socket {}: {}", socket_path.display(), e);
    }
    info!("dtvd stopped");

    Ok(())
}
