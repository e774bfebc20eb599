pub mod bridge;
pub mod console;

use std::path::PathBuf;
use log::{info, warn};
use tokio::sync::mpsc::unbounded_channel;
use tokio_util::sync::CancellationToken;

use crate::app::bridge::Bridge;
use crate::app::console::console_task;
use crate::config::io::{persistence_task, ConfigIO};
use crate::device::btle::BtleTransport;
use crate::device::coordinator::ConnectionCoordinator;
use crate::device::transport::{LogNotices, TokioTimer};
use crate::error::AppRunError;
use crate::output::midi::MidirSinks;
use crate::output::router::OutputRouter;

/// Run the bridge until the console quits. Holds the config file lock for the whole run.
pub async fn run_bridge(config_path: Option<PathBuf>, destination: Option<String>) -> Result<(), AppRunError> {
    let mut config_io = ConfigIO::new_sync(config_path)?;
    let mut config_locker = config_io.locker()?;
    let _lock_guard = config_locker.lock()?;
    let saved_devices = config_io.load_saved_devices().await;
    info!("Loaded {} saved device(s)", saved_devices.len());

    let app_cancel = CancellationToken::new();
    let (event_sender, event_receiver) = unbounded_channel();
    let (command_sender, command_receiver) = unbounded_channel();

    let (config_saver, config_saver_handle) = persistence_task(config_io.clone(), app_cancel.clone());
    let (transport, radio_handle) = BtleTransport::start(event_sender.clone(), app_cancel.clone());
    let console_handle = console_task(command_sender, app_cancel.clone());

    let notices = LogNotices::new();
    let coordinator = ConnectionCoordinator::new(
        transport,
        config_saver,
        notices.clone(),
        TokioTimer::new(event_sender),
        saved_devices,
    );

    let mut bridge = Bridge::new(coordinator, OutputRouter::new(MidirSinks::new()), notices);
    bridge.refresh_sinks();
    if let Some(destination) = destination {
        match bridge.select_destination(&destination) {
            Ok(_) => {},
            Err(message) => warn!("{}", message),
        }
    }

    bridge.run(event_receiver, command_receiver, app_cancel.clone()).await;

    app_cancel.cancel();
    for (name, handle) in [("radio", radio_handle), ("console", console_handle), ("config", config_saver_handle)] {
        if let Err(err) = handle.await {
            warn!("Failed to join {} task: {:?}", name, err);
        }
    }

    info!("Bridge stopped");
    Ok(())
}
