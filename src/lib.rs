use std::env;
use std::path::PathBuf;
use std::time::Duration;
use log::info;

use crate::cli::{Cli, Command};
use crate::config::io::ConfigIO;
use crate::config::types::Config;
use crate::device::types::PeerId;
use crate::error::AppRunError;
use crate::output::midi::MidirSinks;
use crate::output::router::SinkProvider;

pub mod app;
pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod midi;
pub mod output;

pub fn init_logging(level: log::LevelFilter) {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(
            fern::log_file(log_file).expect("Failed to open LOG_FILE")
        );
    }

    dispatch.apply().expect("Failed to initialize logger");
}

fn print_destinations() -> Result<(), AppRunError> {
    let sinks = MidirSinks::new().enumerate_sinks()?;
    if sinks.is_empty() {
        println!("(no destinations)");
    }
    for (index, sink) in sinks.iter().enumerate() {
        println!("{}. {}\t{}", index + 1, sink.name, sink.id);
    }
    Ok(())
}

async fn print_devices(config_path: Option<PathBuf>) -> Result<(), AppRunError> {
    let config_io = ConfigIO::new_sync(config_path)?;
    let devices = config_io.load_saved_devices().await;
    if devices.is_empty() {
        println!("(no saved devices)");
    }
    for (index, device) in devices.iter().enumerate() {
        println!("{}. {}\t{}", index + 1, device.name, device.identifier);
    }
    Ok(())
}

async fn forget_device(config_path: Option<PathBuf>, identifier: String) -> Result<(), AppRunError> {
    let mut config_io = ConfigIO::new_sync(config_path)?;
    let mut config_locker = config_io.locker()?;
    let _lock_guard = config_locker.lock()?;

    let identifier = PeerId::new(identifier);
    let mut devices = config_io.load_saved_devices().await;
    let count = devices.len();
    devices.retain(|device| device.identifier != identifier);

    if devices.len() == count {
        println!("No saved device {}", identifier);
        return Ok(());
    }

    config_io.save(Config { devices }).await?;
    println!("Removed {}", identifier);
    Ok(())
}

pub fn run(cli: Cli) -> Result<(), AppRunError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|source| AppRunError::Runtime { source })?;

    let result = match cli.command.unwrap_or_default() {
        Command::Run => runtime.block_on(app::run_bridge(cli.config, cli.destination)),
        Command::Destinations => print_destinations(),
        Command::Devices => runtime.block_on(print_devices(cli.config)),
        Command::Forget { identifier } => runtime.block_on(forget_device(cli.config, identifier)),
    };

    // stdin is read on a blocking thread that can not be interrupted; do not wait for it
    runtime.shutdown_timeout(Duration::from_millis(500));
    info!("Exiting");
    result
}
