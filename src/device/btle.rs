use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use futures::StreamExt;
use btleplug::api::{Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::device::constants::{RADIO_POLL_DELAY, SERIAL_DATA_CHARACTERISTIC, SERIAL_SERVICE};
use crate::device::transport::Transport;
use crate::device::types::{DeviceEvent, Peer, PeerId};
use crate::error::DeviceError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn peer_id(id: &PeripheralId) -> PeerId {
    PeerId::new(id.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanCommand {
    Start,
    Stop,
}

fn scan_filter() -> ScanFilter {
    ScanFilter {
        services: vec![SERIAL_SERVICE],
    }
}

/// State shared between the transport handle and its background tasks.
#[derive(Clone, Default)]
struct Shared {
    // None while the radio is off
    adapter: Arc<Mutex<Option<Adapter>>>,
    peripherals: Arc<Mutex<HashMap<PeerId, Peripheral>>>,
    // peripherals with the serial service that are connected at the system level
    reachable: Arc<Mutex<Vec<Peer>>>,
}

impl Shared {
    fn adapter(&self) -> Option<Adapter> {
        lock(&self.adapter).clone()
    }

    fn peripheral(&self, peer: &PeerId) -> Option<Peripheral> {
        lock(&self.peripherals).get(peer).cloned()
    }

    fn remember(&self, peripheral: &Peripheral) -> PeerId {
        let id = peer_id(&peripheral.id());
        lock(&self.peripherals).insert(id.clone(), peripheral.clone());
        id
    }

    fn knows(&self, peer: &PeerId) -> bool {
        lock(&self.peripherals).contains_key(peer)
    }
}

/// `Transport` backed by btleplug. Every operation runs as a tokio task and reports back through
/// the event channel.
pub struct BtleTransport {
    shared: Shared,
    events: UnboundedSender<DeviceEvent>,
    // applied one after the other by the scan task
    scan_commands: UnboundedSender<ScanCommand>,
    cancel: CancellationToken,
    // cancels the connect task and the notification reader of a peer
    links: HashMap<PeerId, CancellationToken>,
}

impl BtleTransport {
    /// Start watching the radio. The returned task reports `RadioStateChanged` on every power
    /// transition, applies scan requests in the order they were made and runs until `cancel` is
    /// cancelled.
    pub fn start(events: UnboundedSender<DeviceEvent>, cancel: CancellationToken) -> (BtleTransport, JoinHandle<()>) {
        let shared = Shared::default();
        let (scan_commands, scan_receiver) = unbounded_channel();

        let radio = radio_task(shared.clone(), events.clone(), cancel.clone());
        let scan = scan_task(scan_receiver, shared.clone(), cancel.clone());
        let handle = spawn(async move {
            tokio::join!(radio, scan);
        });

        let transport = BtleTransport {
            shared,
            events,
            scan_commands,
            cancel,
            links: HashMap::new(),
        };
        (transport, handle)
    }

    fn send(&self, event: DeviceEvent) {
        if self.events.send(event).is_err() {
            debug!("Event channel closed");
        }
    }

    fn request_scan(&self, command: ScanCommand) {
        if self.scan_commands.send(command).is_err() {
            debug!("Scan task stopped, dropping {:?}", command);
        }
    }

    fn link_token(&mut self, peer: &PeerId) -> CancellationToken {
        let cancel = &self.cancel;
        self.links
            .entry(peer.clone())
            .or_insert_with(|| cancel.child_token())
            .clone()
    }
}

impl Transport for BtleTransport {
    fn start_scan(&mut self) {
        self.request_scan(ScanCommand::Start);
    }

    fn stop_scan(&mut self) {
        self.request_scan(ScanCommand::Stop);
    }

    fn connect(&mut self, peer: &PeerId) {
        let Some(peripheral) = self.shared.peripheral(peer) else {
            self.send(DeviceEvent::ConnectFailed(peer.clone(), DeviceError::UnknownPeer { id: peer.to_string() }.to_string()));
            return;
        };

        // a fresh attempt replaces whatever was left of the previous one
        if let Some(previous) = self.links.remove(peer) {
            previous.cancel();
        }
        let cancel = self.link_token(peer);
        let events = self.events.clone();
        let peer = peer.clone();

        spawn(async move {
            info!("Connecting to peripheral {}...", peer);
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Connection attempt to {} cancelled", peer);
                },
                result = peripheral.connect() => {
                    let event = match result {
                        Ok(()) => DeviceEvent::Connected(peer),
                        Err(err) => DeviceEvent::ConnectFailed(peer, DeviceError::from(err).to_string()),
                    };
                    let _ = events.send(event);
                },
            }
        });
    }

    fn cancel_connection(&mut self, peer: &PeerId) {
        if let Some(cancel) = self.links.remove(peer) {
            cancel.cancel();
        }

        let Some(peripheral) = self.shared.peripheral(peer) else {
            return;
        };

        let peer = peer.clone();
        spawn(async move {
            if let Err(err) = peripheral.disconnect().await {
                debug!("Disconnecting {} failed: {:?}", peer, err);
            }
        });
    }

    fn discover_channel(&mut self, peer: &PeerId) {
        let Some(peripheral) = self.shared.peripheral(peer) else {
            self.send(DeviceEvent::ConnectFailed(peer.clone(), DeviceError::UnknownPeer { id: peer.to_string() }.to_string()));
            return;
        };

        let cancel = self.link_token(peer);
        let events = self.events.clone();
        let peer = peer.clone();

        spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = subscribe_data_channel(&peripheral) => result,
            };

            match result {
                Ok(_) => {
                    let name = match peripheral.properties().await {
                        Ok(Some(properties)) => properties.local_name,
                        _ => None,
                    };
                    let _ = events.send(DeviceEvent::ChannelReady(Peer::new(peer.clone(), name)));
                    read_notifications_task(cancel, &peripheral, peer, events);
                },
                Err(err) => {
                    warn!("Subscribing to {} failed: {:?}", peer, err);
                    let _ = events.send(DeviceEvent::ConnectFailed(peer, err.to_string()));
                },
            }
        });
    }

    fn connected_peers(&self) -> Vec<Peer> {
        lock(&self.shared.reachable).clone()
    }
}

async fn subscribe_data_channel(peripheral: &Peripheral) -> Result<Characteristic, DeviceError> {
    info!("Connected; Discovering services...");
    peripheral.discover_services().await?;

    for service in peripheral.services() {
        if !service.uuid.eq(&SERIAL_SERVICE) {
            continue;
        }

        for characteristic in &service.characteristics {
            if !characteristic.uuid.eq(&SERIAL_DATA_CHARACTERISTIC) {
                continue;
            }

            info!("Subscribing to characteristic {:?} {:?}", service.uuid, characteristic.uuid);
            peripheral.subscribe(characteristic).await?;
            return Ok(characteristic.clone());
        }
    }

    Err(DeviceError::MissingCharacteristic)
}

fn read_notifications_task(cancel: CancellationToken, peripheral: &Peripheral, peer: PeerId, events: UnboundedSender<DeviceEvent>) -> JoinHandle<()> {
    let peripheral_clone = peripheral.clone();

    spawn(async move {
        let mut notification_stream = match peripheral_clone.notifications().await {
            Ok(stream) => stream,
            Err(err) => {
                warn!("Failed to read notifications of {}: {:?}", peer, err);
                return;
            },
        };

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                data = notification_stream.next() => match data {
                    Some(data) => {
                        if data.uuid.eq(&SERIAL_DATA_CHARACTERISTIC)
                            && events.send(DeviceEvent::BytesReceived(peer.clone(), data.value)).is_err() {
                            break 'mainloop;
                        }
                    },
                    None => break 'mainloop,
                },
            }
        }

        debug!("Stopped reading notifications of {}", peer);
    })
}

/// Find the first adapter and make sure it answers.
async fn probe_adapter(manager: &Manager) -> Result<(Adapter, Vec<Peripheral>), DeviceError> {
    let adapter = manager.adapters().await?.into_iter().next().ok_or(DeviceError::NoAdapter)?;
    let peripherals = adapter.peripherals().await?;
    Ok((adapter, peripherals))
}

async fn has_serial_service(peripheral: &Peripheral) -> bool {
    let advertised = match peripheral.properties().await {
        Ok(Some(properties)) => properties.services.contains(&SERIAL_SERVICE),
        _ => false,
    };

    advertised || peripheral.services().iter().any(|service| service.uuid == SERIAL_SERVICE)
}

async fn refresh_reachable(shared: &Shared, peripherals: Vec<Peripheral>) {
    let mut reachable = Vec::new();

    for peripheral in peripherals {
        if !peripheral.is_connected().await.unwrap_or(false) || !has_serial_service(&peripheral).await {
            continue;
        }

        let name = match peripheral.properties().await {
            Ok(Some(properties)) => properties.local_name,
            _ => None,
        };
        let id = shared.remember(&peripheral);
        reachable.push(Peer::new(id, name));
    }

    *lock(&shared.reachable) = reachable;
}

async fn apply_scan_command(adapter: Option<Adapter>, command: ScanCommand) {
    let Some(adapter) = adapter else {
        if command == ScanCommand::Start {
            warn!("Can not scan, no adapter available");
        }
        return;
    };

    match command {
        ScanCommand::Start => {
            info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
            if let Err(err) = adapter.start_scan(scan_filter()).await {
                warn!("Scanning failed {:?}", err);
            }
        },
        ScanCommand::Stop => {
            if let Err(err) = adapter.stop_scan().await {
                warn!("Failed to stop scanning {:?}", err);
            }
        },
    }
}

/// Await each command before taking the next one, so a stop never overtakes a later start.
async fn apply_in_order<F, Fut>(mut commands: UnboundedReceiver<ScanCommand>, cancel: CancellationToken, mut apply: F)
where
    F: FnMut(ScanCommand) -> Fut,
    Fut: Future<Output = ()>,
{
    'mainloop: loop {
        let command = tokio::select! {
            _ = cancel.cancelled() => break 'mainloop,
            command = commands.recv() => match command {
                Some(command) => command,
                None => break 'mainloop,
            },
        };

        apply(command).await;
    }
}

async fn scan_task(commands: UnboundedReceiver<ScanCommand>, shared: Shared, cancel: CancellationToken) {
    apply_in_order(commands, cancel, |command| apply_scan_command(shared.adapter(), command)).await;
    debug!("Stopped scan task");
}

async fn radio_task(shared: Shared, events: UnboundedSender<DeviceEvent>, cancel: CancellationToken) {
    let mut manager: Option<Manager> = None;
    let mut powered = false;
    let mut adapter_cancel = cancel.child_token();

    'mainloop: loop {
        if manager.is_none() {
            manager = match Manager::new().await {
                Ok(manager) => Some(manager),
                Err(err) => {
                    warn!("Failed to create bluetooth manager {:?}", err);
                    None
                },
            };
        }

        let probe = match &manager {
            Some(manager) => probe_adapter(manager).await,
            None => Err(DeviceError::NoAdapter),
        };

        let now_powered = match probe {
            Ok((adapter, peripherals)) => {
                if !powered {
                    *lock(&shared.adapter) = Some(adapter.clone());
                    spawn(adapter_events_task(adapter, shared.clone(), events.clone(), adapter_cancel.clone()));
                }
                refresh_reachable(&shared, peripherals).await;
                true
            },
            Err(err) => {
                if powered {
                    warn!("Bluetooth adapter unavailable: {}", err);
                }
                false
            },
        };

        if now_powered != powered {
            powered = now_powered;

            if !powered {
                adapter_cancel.cancel();
                adapter_cancel = cancel.child_token();
                *lock(&shared.adapter) = None;
                lock(&shared.reachable).clear();
            }

            if events.send(DeviceEvent::RadioStateChanged(powered)).is_err() {
                break 'mainloop;
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            _ = sleep(RADIO_POLL_DELAY) => {},
        }
    }

    adapter_cancel.cancel();
}

async fn discovered_peer(adapter: &Adapter, shared: &Shared, id: &PeripheralId, advertised: bool) -> Option<Peer> {
    let peripheral = match adapter.peripheral(id).await {
        Ok(peripheral) => peripheral,
        Err(err) => {
            debug!("Discovered peripheral vanished {:?}", err);
            return None;
        },
    };

    // Some environments ignore the scan filter, so make sure to check the service uuid again
    if !advertised && !has_serial_service(&peripheral).await {
        return None;
    }

    let name = match peripheral.properties().await {
        Ok(Some(properties)) => properties.local_name,
        _ => None,
    };

    Some(Peer::new(shared.remember(&peripheral), name))
}

async fn adapter_events_task(adapter: Adapter, shared: Shared, events: UnboundedSender<DeviceEvent>, cancel: CancellationToken) {
    let mut event_stream = match adapter.events().await {
        Ok(stream) => stream,
        Err(err) => {
            warn!("Failed to listen to adapter events {:?}", err);
            return;
        },
    };

    'mainloop: loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break 'mainloop,
            event = event_stream.next() => match event {
                Some(event) => event,
                None => break 'mainloop,
            },
        };

        let device_event = match event {
            CentralEvent::DeviceDiscovered(id) => {
                discovered_peer(&adapter, &shared, &id, false).await.map(DeviceEvent::Discovered)
            },
            CentralEvent::ServicesAdvertisement { id, services } if services.contains(&SERIAL_SERVICE) => {
                discovered_peer(&adapter, &shared, &id, true).await.map(DeviceEvent::Discovered)
            },
            CentralEvent::DeviceDisconnected(id) => {
                let peer = peer_id(&id);
                shared.knows(&peer).then(|| DeviceEvent::Disconnected(peer, None))
            },
            _ => None,
        };

        if let Some(device_event) = device_event {
            if events.send(device_event).is_err() {
                break 'mainloop;
            }
        }
    }

    debug!("Stopped listening to adapter events");
}
