//! Connection lifecycle of the saved and newly discovered peripherals.
//!
//! Per peer: `Idle -> Connecting -> {Connected | Failed | TimedOut} -> Idle`. A peer is
//! `Connecting` while it is in the registry's connecting set; every connect request schedules a
//! timeout that is a no-op once the peer has left that set.

use log::{debug, info, warn};

use crate::config::io::PersistenceGateway;
use crate::config::types::SavedDevice;
use crate::device::constants::CONNECT_TIMEOUT;
use crate::device::registry::DeviceRegistry;
use crate::device::transport::{Notices, Timer, Transport};
use crate::device::types::{DeviceEvent, Peer, PeerId};
use crate::midi::framer::MidiMessage;

pub const STATUS_SCANNING: &str = "Scanning";
pub const STATUS_DONE_SCANNING: &str = "Done Scanning";
pub const STATUS_RADIO_OFF: &str = "Bluetooth Off";
pub const NOTICE_FAILED: &str = "Failed";

pub struct ConnectionCoordinator<T, S, N, M> {
    transport: T,
    store: S,
    notices: N,
    timer: M,
    registry: DeviceRegistry,
    radio_on: bool,
    foreground: bool,
}

impl<T, S, N, M> ConnectionCoordinator<T, S, N, M>
where
    T: Transport,
    S: PersistenceGateway,
    N: Notices,
    M: Timer,
{
    /// The radio is assumed off until the transport reports otherwise; the application starts in
    /// the foreground.
    pub fn new(transport: T, store: S, notices: N, timer: M, saved_devices: Vec<SavedDevice>) -> Self {
        ConnectionCoordinator {
            transport,
            store,
            notices,
            timer,
            registry: DeviceRegistry::new(saved_devices),
            radio_on: false,
            foreground: true,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Apply one transport event. Bytes from a live device come back as complete messages; every
    /// other event returns none.
    pub fn handle_event(&mut self, event: DeviceEvent) -> Vec<MidiMessage> {
        match event {
            DeviceEvent::BytesReceived(id, bytes) => return self.decode(&id, &bytes).collect(),
            DeviceEvent::Discovered(peer) => self.reconcile(&peer),
            DeviceEvent::Connected(id) => self.on_connected(&id),
            DeviceEvent::ChannelReady(peer) => self.on_channel_ready(&peer),
            DeviceEvent::ConnectFailed(id, reason) => self.on_connect_failed(&id, &reason),
            DeviceEvent::Disconnected(id, reason) => self.on_disconnected(&id, reason),
            DeviceEvent::RadioStateChanged(on) => self.on_radio_state_changed(on),
            DeviceEvent::ConnectTimeout(id) => self.on_connect_timeout(&id),
            DeviceEvent::Foreground(true) => {
                self.foreground = true;
                self.activate();
            },
            DeviceEvent::Foreground(false) => self.on_background(),
            DeviceEvent::Rescan => self.activate(),
        }

        Vec::new()
    }

    /// Frame bytes received from `peer`. Yields nothing if the peer is not a live saved device.
    fn decode<'a>(&'a mut self, peer: &PeerId, bytes: &'a [u8]) -> impl Iterator<Item = MidiMessage> + 'a {
        let device = self.registry.find_mut(peer).filter(|device| device.is_live());
        if device.is_none() {
            debug!("Ignoring {} byte(s) from {}, not a live device", bytes.len(), peer);
        }

        device
            .into_iter()
            .flat_map(move |device| device.framer_mut().feed(bytes))
    }

    /// Start a new activation cycle: forget discovered peers, scan, and connect every saved
    /// device that is already reachable.
    pub fn activate(&mut self) {
        self.registry.reset_activation_cycle();

        if !self.radio_on {
            self.notices.show_persistent(STATUS_RADIO_OFF);
            return;
        }

        info!("Activation: scanning and reconnecting saved devices");
        self.notices.show_persistent(STATUS_SCANNING);
        self.transport.start_scan();
        self.sweep_connected();
    }

    /// User picked a discovered peer. Returns false if it is unknown or already connecting.
    pub fn connect_discovered(&mut self, id: &PeerId) -> bool {
        if self.registry.discovered_peer(id).is_none() {
            warn!("Can not connect to {}: not a discovered peripheral", id);
            return false;
        }

        if self.registry.is_connecting(id) {
            debug!("Already connecting to {}", id);
            return false;
        }

        self.begin_connect(id);
        true
    }

    /// User removed a saved device. Returns false if it was not saved.
    pub fn remove_device(&mut self, id: &PeerId) -> bool {
        let was_live = self.registry.detach(id);
        let was_connecting = self.registry.finish_connecting(id);

        if was_live || was_connecting {
            self.transport.cancel_connection(id);
        }

        let removed = match self.registry.remove(id) {
            Some(device) => {
                info!("Removed saved device {} ({})", device.name(), id);
                self.persist();
                true
            },
            None => false,
        };

        self.restart_sweep();
        removed
    }

    /// Stop scanning and drop every link, e.g. before exiting.
    pub fn shutdown(&mut self) {
        info!("Shutting down connections");
        if self.radio_on {
            self.transport.stop_scan();
        }

        for id in self.registry.connecting_identifiers() {
            self.registry.finish_connecting(&id);
            self.transport.cancel_connection(&id);
        }

        for id in self.registry.live_identifiers() {
            self.registry.detach(&id);
            self.transport.cancel_connection(&id);
        }
    }

    fn begin_connect(&mut self, id: &PeerId) {
        if !self.registry.begin_connecting(id) {
            debug!("Already connecting to {}", id);
            return;
        }

        info!("Connecting to {}", id);
        self.transport.connect(id);
        self.timer.schedule_timeout(id.clone(), CONNECT_TIMEOUT);
    }

    /// Matched peers are connected, unmatched peers become discovered peers.
    fn reconcile(&mut self, peer: &Peer) {
        match self.registry.find(&peer.id) {
            Some(device) if device.is_live() => {
                debug!("{} is already connected", peer.id);
            },
            Some(_) if self.registry.is_connecting(&peer.id) => {
                debug!("{} is already connecting", peer.id);
            },
            Some(_) => self.begin_connect(&peer.id),
            None => {
                if self.registry.note_discovered(peer) {
                    info!("Discovered {} ({})", peer.display_name(), peer.id);
                }
            },
        }
    }

    fn sweep_connected(&mut self) {
        for peer in self.transport.connected_peers() {
            self.reconcile(&peer);
        }
    }

    // rescan without starting a new activation cycle
    fn restart_sweep(&mut self) {
        if !self.radio_on {
            return;
        }

        self.transport.stop_scan();
        self.transport.start_scan();
        self.sweep_connected();
    }

    fn on_connected(&mut self, id: &PeerId) {
        if !self.registry.is_connecting(id) {
            debug!("Ignoring link to {}, no connection attempt in progress", id);
            return;
        }

        debug!("Link to {} is up, discovering the data channel", id);
        self.transport.discover_channel(id);
    }

    fn on_channel_ready(&mut self, peer: &Peer) {
        if !self.registry.finish_connecting(&peer.id) {
            // the attempt timed out or was cancelled before the channel came up
            warn!("Data channel of {} is ready, but it is no longer connecting", peer.id);
            self.transport.cancel_connection(&peer.id);
            return;
        }

        let mut dirty = false;

        if self.registry.find(&peer.id).is_none() {
            let device = self.registry.promote(peer);
            info!("Saved new device {} ({})", device.name(), peer.id);
            dirty = true;
        } else if self.registry.rename(&peer.id, peer.display_name()) {
            info!("Renamed device {} to {}", peer.id, peer.display_name());
            dirty = true;
        }

        self.registry.attach(&peer.id);
        info!("Device {} is active", peer.id);

        if dirty {
            self.persist();
        }
    }

    fn on_connect_failed(&mut self, id: &PeerId, reason: &str) {
        if !self.registry.finish_connecting(id) {
            debug!("Ignoring connect failure of {}, no connection attempt in progress: {}", id, reason);
            return;
        }

        warn!("Connecting to {} failed: {}", id, reason);
        self.notices.show_transient(NOTICE_FAILED);
    }

    fn on_connect_timeout(&mut self, id: &PeerId) {
        if !self.registry.finish_connecting(id) {
            return;
        }

        warn!("Connecting to {} took too long", id);
        self.transport.cancel_connection(id);
        self.notices.show_transient(NOTICE_FAILED);
    }

    fn on_disconnected(&mut self, id: &PeerId, reason: Option<String>) {
        if self.registry.detach(id) {
            info!("Device {} disconnected: {}", id, reason.as_deref().unwrap_or("link lost"));
        }

        if self.registry.finish_connecting(id) {
            let name = self.display_name(id);
            warn!("Connecting to {} failed, disconnected", id);
            self.notices.show_transient(&format!("Failed to connect to\n{}", name));
        }

        if self.foreground {
            self.restart_sweep();
        }
    }

    fn on_radio_state_changed(&mut self, on: bool) {
        if on == self.radio_on {
            return;
        }
        self.radio_on = on;

        if on {
            info!("Radio powered on");
            self.activate();
            return;
        }

        warn!("Radio powered off");
        self.registry.detach_all();
        self.registry.reset_activation_cycle();
        self.registry.clear_connecting();
        self.notices.show_persistent(STATUS_RADIO_OFF);
        self.notices.show_transient(STATUS_RADIO_OFF);
    }

    fn on_background(&mut self) {
        self.foreground = false;

        if self.radio_on {
            self.transport.stop_scan();
            self.notices.show_persistent(STATUS_DONE_SCANNING);
        }
    }

    fn display_name(&self, id: &PeerId) -> String {
        if let Some(device) = self.registry.find(id) {
            return device.name().to_string();
        }

        let name = self.registry.discovered_peer(id).and_then(|peer| peer.name.clone());
        Peer::new(id.clone(), name).display_name().to_string()
    }

    fn persist(&self) {
        self.store.save_saved_devices(self.registry.to_saved());
    }
}
