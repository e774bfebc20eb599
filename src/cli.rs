use std::path::PathBuf;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "ble-midi-bridge", version, about = "Forward MIDI from Bluetooth LE serial peripherals to a MIDI output")]
pub struct Cli {
    /// Log debug messages
    #[arg(short, long)]
    pub verbose: bool,

    /// Path of the saved devices file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Output to route messages to at startup (position, identifier or name)
    #[arg(short, long, value_name = "OUTPUT")]
    pub destination: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the bridge (default)
    #[default]
    Run,
    /// List the MIDI outputs and exit
    Destinations,
    /// List the saved devices and exit
    Devices,
    /// Remove a saved device
    Forget {
        identifier: String,
    },
}
