use std::fmt;
use log::{debug, info, warn};

use crate::error::OutputError;
use crate::midi::framer::MidiMessage;

/// An output the bridge can forward messages to, e.g. a MIDI output port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSink {
    pub id: String,
    pub name: String,
}

impl fmt::Display for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// The environment's output sinks.
pub trait SinkProvider {
    fn enumerate_sinks(&mut self) -> Result<Vec<OutputSink>, OutputError>;
    fn send(&mut self, sink_id: &str, bytes: &[u8]) -> Result<(), OutputError>;
}

/// Holds the enumerated sinks and at most one active selection.
pub struct OutputRouter<P> {
    provider: P,
    sinks: Vec<OutputSink>,
    active: Option<String>,
}

impl<P: SinkProvider> OutputRouter<P> {
    pub fn new(provider: P) -> Self {
        OutputRouter {
            provider,
            sinks: Vec::new(),
            active: None,
        }
    }

    pub fn sinks(&self) -> &[OutputSink] {
        &self.sinks
    }

    pub fn active(&self) -> Option<&OutputSink> {
        let active = self.active.as_ref()?;
        self.sinks.iter().find(|sink| &sink.id == active)
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Re-enumerate the sinks. The selection is dropped if its sink disappeared.
    pub fn refresh(&mut self) {
        self.sinks = match self.provider.enumerate_sinks() {
            Ok(sinks) => sinks,
            Err(err) => {
                warn!("Failed to enumerate outputs: {}", err);
                Vec::new()
            },
        };
        debug!("Found {} output(s)", self.sinks.len());

        if let Some(active) = &self.active {
            if !self.sinks.iter().any(|sink| &sink.id == active) {
                info!("Selected output {} is gone", active);
                self.active = None;
            }
        }
    }

    pub fn select(&mut self, sink_id: &str) -> Result<(), OutputError> {
        let Some(sink) = self.sinks.iter().find(|sink| sink.id == sink_id) else {
            return Err(OutputError::UnknownSink { id: sink_id.to_string() });
        };

        if self.active.as_deref() != Some(sink_id) {
            info!("Routing messages to {}", sink.name);
            self.active = Some(sink_id.to_string());
        }
        Ok(())
    }

    pub fn deselect(&mut self) {
        if self.active.take().is_some() {
            info!("Stopped routing messages");
        }
    }

    /// Select `sink_id`, or deselect it if it is already the active sink. Returns whether a
    /// sink is selected afterwards.
    pub fn toggle(&mut self, sink_id: &str) -> Result<bool, OutputError> {
        if self.active.as_deref() == Some(sink_id) {
            self.deselect();
            return Ok(false);
        }

        self.select(sink_id)?;
        Ok(true)
    }

    /// Forward a message to the active sink, if any. Send failures are logged and dropped.
    pub fn route(&mut self, message: &MidiMessage) {
        let Some(active) = &self.active else {
            return;
        };

        if let Err(err) = self.provider.send(active, message.as_bytes()) {
            warn!("Dropped {:?}: {}", message, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeSinks {
        available: Vec<OutputSink>,
        sent: Vec<(String, Vec<u8>)>,
        fail_enumerate: bool,
    }

    impl SinkProvider for FakeSinks {
        fn enumerate_sinks(&mut self) -> Result<Vec<OutputSink>, OutputError> {
            if self.fail_enumerate {
                return Err(OutputError::MidiConnect { message: "unavailable".to_string() });
            }
            Ok(self.available.clone())
        }

        fn send(&mut self, sink_id: &str, bytes: &[u8]) -> Result<(), OutputError> {
            self.sent.push((sink_id.to_string(), bytes.to_vec()));
            Ok(())
        }
    }

    fn sink(id: &str) -> OutputSink {
        OutputSink { id: id.to_string(), name: format!("Port {}", id) }
    }

    fn router(ids: &[&str]) -> OutputRouter<FakeSinks> {
        let mut router = OutputRouter::new(FakeSinks {
            available: ids.iter().map(|id| sink(id)).collect(),
            ..FakeSinks::default()
        });
        router.refresh();
        router
    }

    #[test]
    fn route_without_selection_is_a_no_op() {
        let mut router = router(&["1"]);
        router.route(&MidiMessage::from(vec![0xF8]));
        assert!(router.provider().sent.is_empty());
    }

    #[test]
    fn route_forwards_verbatim_to_active_sink() {
        let mut router = router(&["1", "2"]);
        router.select("2").expect("select");
        router.route(&MidiMessage::from(vec![0x90, 0x3C, 0x40]));
        assert_eq!(router.provider().sent, vec![("2".to_string(), vec![0x90, 0x3C, 0x40])]);
    }

    #[test]
    fn select_is_idempotent_and_checks_the_sink() {
        let mut router = router(&["1"]);
        router.select("1").expect("select");
        router.select("1").expect("select");
        assert_eq!(router.active(), Some(&sink("1")));
        assert!(matches!(router.select("9"), Err(OutputError::UnknownSink { .. })));
        assert_eq!(router.active(), Some(&sink("1")));

        router.deselect();
        router.deselect();
        assert_eq!(router.active(), None);
    }

    #[test]
    fn toggle_deselects_active_sink() {
        let mut router = router(&["1", "2"]);
        assert!(router.toggle("1").expect("toggle"));
        assert!(router.toggle("2").expect("toggle"));
        assert!(!router.toggle("2").expect("toggle"));
        assert_eq!(router.active(), None);
    }

    #[test]
    fn refresh_drops_vanished_selection() {
        let mut router = router(&["1", "2"]);
        router.select("2").expect("select");

        router.provider.available.retain(|sink| sink.id != "2");
        router.refresh();
        assert_eq!(router.active(), None);

        router.route(&MidiMessage::from(vec![0xF8]));
        assert!(router.provider().sent.is_empty());
    }

    #[test]
    fn refresh_keeps_selection_that_moved() {
        let mut router = router(&["1", "2"]);
        router.select("2").expect("select");

        router.provider.available.remove(0);
        router.refresh();
        assert_eq!(router.active(), Some(&sink("2")));
    }

    #[test]
    fn failed_enumeration_clears_selection() {
        let mut router = router(&["1"]);
        router.select("1").expect("select");
        router.provider.fail_enumerate = true;
        router.refresh();
        assert!(router.sinks().is_empty());
        assert_eq!(router.active(), None);
    }
}
