use std::fmt::Write as _;
use log::{debug, warn};
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tokio::spawn;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::device::constants::UNIDENTIFIED_NAME;
use crate::device::registry::DeviceRegistry;
use crate::device::types::PeerId;
use crate::output::router::OutputSink;

pub const HELP: &str = "\
Commands:
  list                  show devices and outputs
  scan                  start a new scan
  connect <n|id>        connect to a new device
  remove <n|id>         forget a saved device
  select <n|id|name>    route messages to an output (again to deselect)
  deselect              stop routing messages
  refresh               re-enumerate outputs
  pause / resume        stop / restart scanning
  status                show the bluetooth status
  quit                  exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    List,
    Rescan,
    Connect(String),
    Remove(String),
    Select(String),
    Deselect,
    Refresh,
    Pause,
    Resume,
    Status,
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Result<ConsoleCommand, String> {
    let line = line.trim();
    let (word, argument) = match line.split_once(char::is_whitespace) {
        Some((word, argument)) => (word, argument.trim()),
        None => (line, ""),
    };

    let require = |command: fn(String) -> ConsoleCommand| {
        if argument.is_empty() {
            Err(format!("{} needs an argument", word))
        } else {
            Ok(command(argument.to_string()))
        }
    };

    match word.to_ascii_lowercase().as_str() {
        "list" | "ls" => Ok(ConsoleCommand::List),
        "scan" | "rescan" => Ok(ConsoleCommand::Rescan),
        "connect" => require(ConsoleCommand::Connect),
        "remove" | "forget" => require(ConsoleCommand::Remove),
        "select" => require(ConsoleCommand::Select),
        "deselect" => Ok(ConsoleCommand::Deselect),
        "refresh" => Ok(ConsoleCommand::Refresh),
        "pause" => Ok(ConsoleCommand::Pause),
        "resume" => Ok(ConsoleCommand::Resume),
        "status" => Ok(ConsoleCommand::Status),
        "help" | "?" => Ok(ConsoleCommand::Help),
        "quit" | "exit" => Ok(ConsoleCommand::Quit),
        "" => Err(String::new()),
        other => Err(format!("Unknown command '{}', try 'help'", other)),
    }
}

/// Reads commands from stdin. End of input counts as `quit`.
pub fn console_task(commands: UnboundedSender<ConsoleCommand>, cancel: CancellationToken) -> JoinHandle<()> {
    spawn(async move {
        let mut lines = BufReader::new(stdin()).lines();

        'mainloop: loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break 'mainloop,
                line = lines.next_line() => line,
            };

            let command = match line {
                Ok(Some(line)) => match parse_command(&line) {
                    Ok(command) => command,
                    Err(message) => {
                        if !message.is_empty() {
                            println!("{}", message);
                        }
                        continue;
                    },
                },
                Ok(None) => {
                    debug!("End of console input");
                    ConsoleCommand::Quit
                },
                Err(err) => {
                    warn!("Failed to read console input: {:?}", err);
                    ConsoleCommand::Quit
                },
            };

            let quit = command == ConsoleCommand::Quit;
            if commands.send(command).is_err() || quit {
                break 'mainloop;
            }
        }
    })
}

// `target` is a 1-based position in the listing, an identifier or a name
fn resolve<'a, I>(candidates: I, target: &str) -> Option<PeerId>
where
    I: Iterator<Item = (&'a PeerId, Option<&'a str>)> + Clone,
{
    if let Ok(position) = target.parse::<usize>() {
        if let Some((id, _)) = position.checked_sub(1).and_then(|index| candidates.clone().nth(index)) {
            return Some(id.clone());
        }
    }

    candidates
        .clone()
        .find(|(id, _)| id.as_str() == target)
        .or_else(|| candidates.clone().find(|(_, name)| *name == Some(target)))
        .map(|(id, _)| id.clone())
}

pub fn resolve_saved(registry: &DeviceRegistry, target: &str) -> Option<PeerId> {
    resolve(
        registry.saved_devices().map(|device| (device.identifier(), Some(device.name()))),
        target,
    )
}

pub fn resolve_discovered(registry: &DeviceRegistry, target: &str) -> Option<PeerId> {
    resolve(
        registry.discovered_peers().map(|peer| (&peer.identifier, peer.name.as_deref())),
        target,
    )
}

pub fn resolve_sink<'a>(sinks: &'a [OutputSink], target: &str) -> Option<&'a OutputSink> {
    if let Ok(position) = target.parse::<usize>() {
        if let Some(sink) = position.checked_sub(1).and_then(|index| sinks.get(index)) {
            return Some(sink);
        }
    }

    sinks
        .iter()
        .find(|sink| sink.id == target)
        .or_else(|| sinks.iter().find(|sink| sink.name == target))
}

/// The three lists of the bridge: saved devices, new devices and outputs.
pub fn render_listing(registry: &DeviceRegistry, sinks: &[OutputSink], active: Option<&OutputSink>, status: &str) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Status: {}", status);

    let _ = writeln!(out, "My Devices");
    let mut saved = registry.saved_devices().peekable();
    if saved.peek().is_none() {
        let _ = writeln!(out, "  (no saved devices)");
    }
    for (index, device) in saved.enumerate() {
        let state = registry.state(device.identifier());
        let _ = writeln!(out, "  {}. {} [{}] {}", index + 1, device.name(), device.identifier(), state);
    }

    let _ = writeln!(out, "New Devices");
    let mut discovered = registry.discovered_peers().peekable();
    if discovered.peek().is_none() {
        let _ = writeln!(out, "  (no new devices)");
    }
    for (index, peer) in discovered.enumerate() {
        let connecting = if registry.is_connecting(&peer.identifier) { " Connecting..." } else { "" };
        let name = peer.name.as_deref().unwrap_or(UNIDENTIFIED_NAME);
        let _ = writeln!(out, "  {}. {} [{}]{}", index + 1, name, peer.identifier, connecting);
    }

    let _ = writeln!(out, "Destinations");
    if sinks.is_empty() {
        let _ = writeln!(out, "  (no destinations)");
    }
    for (index, sink) in sinks.iter().enumerate() {
        let marker = if active.is_some_and(|active| active.id == sink.id) { " *" } else { "" };
        let _ = writeln!(out, "  {}. {}{}", index + 1, sink.name, marker);
    }

    out
}
