use std::collections::HashMap;
use log::{debug, info};
use midir::{MidiOutput, MidiOutputConnection};

use crate::error::OutputError;
use crate::output::router::{OutputSink, SinkProvider};

const CLIENT_NAME: &str = "BleMidiClient";

/// MIDI output ports of the system, via midir. Ports are opened on first use and kept open
/// until they disappear from the enumeration.
pub struct MidirSinks {
    connections: HashMap<String, MidiOutputConnection>,
}

impl MidirSinks {
    pub fn new() -> Self {
        MidirSinks {
            connections: HashMap::new(),
        }
    }

    fn open(&self, sink_id: &str) -> Result<MidiOutputConnection, OutputError> {
        let midi_out = MidiOutput::new(CLIENT_NAME)?;

        let port = midi_out
            .find_port_by_id(sink_id.to_string())
            .ok_or_else(|| OutputError::UnknownSink { id: sink_id.to_string() })?;

        let connection = midi_out
            .connect(&port, CLIENT_NAME)
            .map_err(|err| OutputError::MidiConnect { message: err.to_string() })?;

        info!("MIDI output opened: '{}'", sink_id);
        Ok(connection)
    }
}

impl Default for MidirSinks {
    fn default() -> Self {
        MidirSinks::new()
    }
}

impl SinkProvider for MidirSinks {
    fn enumerate_sinks(&mut self) -> Result<Vec<OutputSink>, OutputError> {
        let midi_out = MidiOutput::new(CLIENT_NAME)?;

        let sinks: Vec<OutputSink> = midi_out
            .ports()
            .iter()
            .map(|port| OutputSink {
                id: port.id(),
                name: midi_out.port_name(port).unwrap_or_else(|_| "Error".to_string()),
            })
            .collect();

        let stale: Vec<String> = self
            .connections
            .keys()
            .filter(|id| !sinks.iter().any(|sink| &&sink.id == id))
            .cloned()
            .collect();

        for id in stale {
            if let Some(connection) = self.connections.remove(&id) {
                debug!("Closing MIDI output '{}'", id);
                connection.close();
            }
        }

        Ok(sinks)
    }

    fn send(&mut self, sink_id: &str, bytes: &[u8]) -> Result<(), OutputError> {
        if !self.connections.contains_key(sink_id) {
            let connection = self.open(sink_id)?;
            self.connections.insert(sink_id.to_string(), connection);
        }

        match self.connections.get_mut(sink_id) {
            Some(connection) => Ok(connection.send(bytes)?),
            None => Err(OutputError::UnknownSink { id: sink_id.to_string() }),
        }
    }
}
