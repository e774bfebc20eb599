use clap::Parser;
use log::{error, info, LevelFilter};
use ble_midi_bridge::{init_logging, run};
use ble_midi_bridge::cli::Cli;
use ble_midi_bridge::error::{AppRunError, ConfigError};

fn main() -> Result<(), AppRunError> {
    let cli = Cli::parse();
    init_logging(if cli.verbose { LevelFilter::Debug } else { LevelFilter::Info });
    info!(concat!("BLE MIDI Bridge ", env!("CARGO_PKG_VERSION")));

    match run(cli) {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            error!("This application has already been started");
            Ok(())
        },
        Err(err) => {
            error!("Unexpected error: {}", err);
            Err(err)
        },
        Ok(_) => Ok(()),
    }
}
