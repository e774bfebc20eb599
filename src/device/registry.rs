use indexmap::{IndexMap, IndexSet};
use log::warn;

use crate::config::types::SavedDevice;
use crate::device::constants::UNIDENTIFIED_NAME;
use crate::device::types::{DeviceState, Peer, PeerId};
use crate::midi::framer::MessageFramer;

/// A saved peripheral. The identity is persisted, the link and the framer are not.
#[derive(Debug)]
pub struct Device {
    identifier: PeerId,
    name: String,
    // true while the data channel is subscribed
    live: bool,
    framer: MessageFramer,
}

impl Device {
    fn new(identifier: PeerId, name: String) -> Self {
        Device {
            identifier,
            name,
            live: false,
            framer: MessageFramer::new(),
        }
    }

    pub fn identifier(&self) -> &PeerId {
        &self.identifier
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn framer(&self) -> &MessageFramer {
        &self.framer
    }

    pub fn framer_mut(&mut self) -> &mut MessageFramer {
        &mut self.framer
    }
}

/// A peripheral seen during the current activation cycle that is not a saved device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    pub identifier: PeerId,
    pub name: Option<String>,
}

/// Owns the saved, discovered and connecting collections. All mutations go through here so the
/// cross-collection rules hold:
/// - identifiers are unique among saved devices
/// - a saved identifier is never also a discovered peer
/// - a peer is never connecting while its device is live
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    saved: IndexMap<PeerId, Device>,
    discovered: IndexMap<PeerId, DiscoveredPeer>,
    connecting: IndexSet<PeerId>,
}

impl DeviceRegistry {
    pub fn new(saved_devices: Vec<SavedDevice>) -> Self {
        let mut saved = IndexMap::new();

        for saved_device in saved_devices {
            if saved.contains_key(&saved_device.identifier) {
                warn!("Ignoring duplicate saved device {}", saved_device.identifier);
                continue;
            }

            let device = Device::new(saved_device.identifier.clone(), saved_device.name);
            saved.insert(saved_device.identifier, device);
        }

        DeviceRegistry {
            saved,
            discovered: IndexMap::new(),
            connecting: IndexSet::new(),
        }
    }

    pub fn find(&self, identifier: &PeerId) -> Option<&Device> {
        self.saved.get(identifier)
    }

    pub fn find_mut(&mut self, identifier: &PeerId) -> Option<&mut Device> {
        self.saved.get_mut(identifier)
    }

    pub fn saved_devices(&self) -> impl Iterator<Item = &Device> + Clone {
        self.saved.values()
    }

    pub fn discovered_peers(&self) -> impl Iterator<Item = &DiscoveredPeer> + Clone {
        self.discovered.values()
    }

    pub fn discovered_peer(&self, identifier: &PeerId) -> Option<&DiscoveredPeer> {
        self.discovered.get(identifier)
    }

    /// Snapshot of the saved identities, in the order they were added.
    pub fn to_saved(&self) -> Vec<SavedDevice> {
        self.saved
            .values()
            .map(|device| SavedDevice {
                name: device.name.clone(),
                identifier: device.identifier.clone(),
            })
            .collect()
    }

    /// Move a peer into the saved devices. Callers check `find` first; in release builds
    /// promoting an identifier that is already saved returns the existing device untouched.
    pub fn promote(&mut self, peer: &Peer) -> &mut Device {
        debug_assert!(!self.saved.contains_key(&peer.id), "{} is already saved", peer.id);

        let discovered = self.discovered.shift_remove(&peer.id);
        let name = peer
            .name
            .clone()
            .or_else(|| discovered.and_then(|discovered| discovered.name))
            .unwrap_or_else(|| UNIDENTIFIED_NAME.to_string());

        self.saved
            .entry(peer.id.clone())
            .or_insert_with(|| Device::new(peer.id.clone(), name))
    }

    pub fn remove(&mut self, identifier: &PeerId) -> Option<Device> {
        let device = self.saved.shift_remove(identifier)?;
        debug_assert!(!device.is_live(), "removing {} while its link is live", identifier);
        Some(device)
    }

    /// Start of an activation cycle: the discovered set is rebuilt from scratch.
    pub fn reset_activation_cycle(&mut self) {
        self.discovered.clear();
    }

    /// Record an unmatched peer. Returns false if the peer is saved or was already discovered
    /// (the advertised name is refreshed in that case).
    pub fn note_discovered(&mut self, peer: &Peer) -> bool {
        if self.saved.contains_key(&peer.id) {
            return false;
        }

        if let Some(existing) = self.discovered.get_mut(&peer.id) {
            if peer.name.is_some() {
                existing.name = peer.name.clone();
            }
            return false;
        }

        self.discovered.insert(peer.id.clone(), DiscoveredPeer {
            identifier: peer.id.clone(),
            name: peer.name.clone(),
        });
        true
    }

    pub fn is_connecting(&self, identifier: &PeerId) -> bool {
        self.connecting.contains(identifier)
    }

    /// Returns false if the peer is already connecting.
    pub fn begin_connecting(&mut self, identifier: &PeerId) -> bool {
        debug_assert!(
            !self.find(identifier).is_some_and(Device::is_live),
            "{} is live and can not start connecting",
            identifier,
        );
        self.connecting.insert(identifier.clone())
    }

    /// Returns false if the peer was not connecting.
    pub fn finish_connecting(&mut self, identifier: &PeerId) -> bool {
        self.connecting.shift_remove(identifier)
    }

    pub fn clear_connecting(&mut self) {
        self.connecting.clear();
    }

    /// The data channel of a saved device came up. The framer starts from scratch.
    pub fn attach(&mut self, identifier: &PeerId) -> bool {
        debug_assert!(!self.connecting.contains(identifier), "{} is still connecting", identifier);

        match self.saved.get_mut(identifier) {
            Some(device) => {
                device.live = true;
                device.framer.reset();
                true
            },
            None => false,
        }
    }

    /// Returns true if the device had a live link.
    pub fn detach(&mut self, identifier: &PeerId) -> bool {
        match self.saved.get_mut(identifier) {
            Some(device) => std::mem::replace(&mut device.live, false),
            None => false,
        }
    }

    pub fn detach_all(&mut self) {
        for device in self.saved.values_mut() {
            device.live = false;
        }
    }

    /// Rename a saved device. Returns true if the name changed.
    pub fn rename(&mut self, identifier: &PeerId, name: &str) -> bool {
        match self.saved.get_mut(identifier) {
            Some(device) if device.name != name => {
                device.name = name.to_string();
                true
            },
            _ => false,
        }
    }

    pub fn state(&self, identifier: &PeerId) -> DeviceState {
        if self.connecting.contains(identifier) {
            DeviceState::Connecting
        } else if self.find(identifier).is_some_and(Device::is_live) {
            DeviceState::Connected
        } else {
            DeviceState::Idle
        }
    }

    pub fn live_identifiers(&self) -> Vec<PeerId> {
        self.saved
            .values()
            .filter(|device| device.is_live())
            .map(|device| device.identifier.clone())
            .collect()
    }

    pub fn connecting_identifiers(&self) -> Vec<PeerId> {
        self.connecting.iter().cloned().collect()
    }
}
