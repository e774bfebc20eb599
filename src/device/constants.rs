use std::time::Duration;
use uuid::Uuid;

/**
 * The UUID of the Bluetooth BLE serial service (0xFFE0) advertised by the peripherals.
 */
pub const SERIAL_SERVICE: Uuid = Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb);

/**
 * The UUID of the characteristic on SERIAL_SERVICE (0xFFE1) that notifies the raw MIDI stream.
 */
pub const SERIAL_DATA_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb);

/**
 * How long a connection attempt may take, measured from the connect request until the data
 * characteristic is subscribed.
 */
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/**
 * How often to check the adapter (radio) state and refresh the list of already connected
 * peripherals.
 */
pub const RADIO_POLL_DELAY: Duration = Duration::from_millis(1000);

/**
 * Display name used when a peripheral does not advertise a name.
 */
pub const UNIDENTIFIED_NAME: &str = "Unidentified";
