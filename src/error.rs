use std::io;
use thiserror::Error;
use std::str::Utf8Error;
use btleplug;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (output): {source}")]
    OutputError { #[from] source: OutputError },

    #[error("Failed to start application (runtime): {source}")]
    Runtime { source: io::Error },
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("A required bluetooth characteristic is not available")]
    MissingCharacteristic,

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("Unknown peripheral {id}")]
    UnknownPeer { id: String },
}

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to initialize MIDI output (midir): {source}")]
    MidiInit { #[from] source: midir::InitError },

    #[error("Failed to connect to MIDI output: {message}")]
    MidiConnect { message: String },

    #[error("Failed to send to MIDI output (midir): {source}")]
    MidiSend { #[from] source: midir::SendError },

    #[error("Unknown MIDI output {id}")]
    UnknownSink { id: String },
}
