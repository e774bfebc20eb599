use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use log::{info, warn};
use tokio::spawn;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::sleep;

use crate::device::types::{DeviceEvent, Peer, PeerId};

/// The radio driver as seen by the connection coordinator.
///
/// None of these calls block: results (connected, failed, channel ready, ...) come back later
/// as `DeviceEvent`s on the coordinator's event channel.
pub trait Transport {
    fn start_scan(&mut self);
    fn stop_scan(&mut self);
    fn connect(&mut self, peer: &PeerId);
    fn cancel_connection(&mut self, peer: &PeerId);

    /// Locate and subscribe to the data characteristic of a connected peer. Answers with
    /// `DeviceEvent::ChannelReady` or `DeviceEvent::ConnectFailed`.
    fn discover_channel(&mut self, peer: &PeerId);

    /// Peers advertising the serial service that are already connected at the system level.
    fn connected_peers(&self) -> Vec<Peer>;
}

/// Deferred delivery of connection deadlines.
pub trait Timer {
    fn schedule_timeout(&self, peer: PeerId, after: Duration);
}

/// Where user-facing status messages go. Fire and forget.
pub trait Notices {
    fn show_transient(&self, text: &str);
    fn show_persistent(&self, text: &str);
}

pub struct TokioTimer {
    events: UnboundedSender<DeviceEvent>,
}

impl TokioTimer {
    pub fn new(events: UnboundedSender<DeviceEvent>) -> Self {
        TokioTimer { events }
    }
}

impl Timer for TokioTimer {
    fn schedule_timeout(&self, peer: PeerId, after: Duration) {
        let events = self.events.clone();

        spawn(async move {
            sleep(after).await;
            // the receiver is gone during shutdown, nothing left to time out
            let _ = events.send(DeviceEvent::ConnectTimeout(peer));
        });
    }
}

/// Notices for a console front end: everything is logged, and the latest persistent status is
/// kept around so it can be displayed on request.
#[derive(Clone, Default)]
pub struct LogNotices {
    status: Arc<Mutex<String>>,
}

impl LogNotices {
    pub fn new() -> Self {
        LogNotices::default()
    }

    pub fn status(&self) -> String {
        self.status.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Notices for LogNotices {
    fn show_transient(&self, text: &str) {
        warn!("{}", text.replace('\n', " "));
    }

    fn show_persistent(&self, text: &str) {
        info!("Status: {}", text);
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = text.to_string();
    }
}
