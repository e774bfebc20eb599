use std::fmt;
use serde::{Deserialize, Serialize};

use crate::device::constants::UNIDENTIFIED_NAME;

/// Stable identifier of a peripheral, as reported by the transport. Persisted across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        PeerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A peripheral as reported by the transport. The name is whatever the peripheral currently
/// advertises, if anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: PeerId,
    pub name: Option<String>,
}

impl Peer {
    pub fn new(id: PeerId, name: Option<String>) -> Self {
        Peer { id, name }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNIDENTIFIED_NAME)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Idle,
    Connecting,
    Connected,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            DeviceState::Idle => "Not Connected",
            DeviceState::Connecting => "Connecting...",
            DeviceState::Connected => "Active",
        };

        write!(f, "{}", result)
    }
}

/// Everything the connection coordinator reacts to. Delivered in order over a single channel;
/// events for one peer are never reordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A peripheral advertising the serial service was seen while scanning.
    Discovered(Peer),
    /// The link to the peripheral is up, the data channel is not known yet.
    Connected(PeerId),
    /// The data characteristic was found and subscribed to.
    ChannelReady(Peer),
    ConnectFailed(PeerId, String),
    Disconnected(PeerId, Option<String>),
    BytesReceived(PeerId, Vec<u8>),
    RadioStateChanged(bool),
    /// Fired CONNECT_TIMEOUT after a connect request; a no-op if the attempt already ended.
    ConnectTimeout(PeerId),
    /// The application gained (true) or lost (false) the foreground.
    Foreground(bool),
    Rescan,
}
