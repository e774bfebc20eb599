use std::collections::HashSet;
use serde::{Deserialize, Serialize};

use crate::device::types::PeerId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedDevice {
    pub name: String,
    pub identifier: PeerId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub devices: Vec<SavedDevice>,
}

impl Config {
    /// Drop later entries that repeat an identifier; a hand edited config file could contain
    /// duplicates.
    pub fn dedup_devices(&mut self) {
        let mut seen = HashSet::new();
        self.devices.retain(|device| seen.insert(device.identifier.clone()));
    }
}
