//! Bluetooth Service Module
//!
//! Coordinates scanning, the per-device connection state machine and the
//! unified data stream.
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──link up──▶ Connected
//!      ▲                        │                       │
//!      └──────── failure ───────┘◀── disconnect / link lost
//! ```

use crate::domain::error::{BridgeError, NativeError};
use crate::domain::models::{BleData, BleDevice, ConnectionEvent, ConnectionState};
use crate::domain::subscription::{lock, Listeners, Subscription};
use crate::infrastructure::bluetooth::codec;
use crate::infrastructure::bluetooth::connection::{ActiveConnection, BleConnector};
use crate::infrastructure::bluetooth::native::{AdapterState, BleManager, DisconnectHandler};
use crate::infrastructure::bluetooth::scanner::BleScanner;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, error, info, warn};

enum Slot {
    Connecting { attempt: u64 },
    Connected { attempt: u64, connection: ActiveConnection },
}

impl Slot {
    fn state(&self) -> ConnectionState {
        match self {
            Self::Connecting { .. } => ConnectionState::Connecting,
            Self::Connected { .. } => ConnectionState::Connected,
        }
    }

    fn attempt(&self) -> u64 {
        match self {
            Self::Connecting { attempt } | Self::Connected { attempt, .. } => *attempt,
        }
    }
}

struct BleInner {
    manager: Arc<dyn BleManager>,
    scanner: BleScanner,
    connector: BleConnector,
    connections: Mutex<HashMap<String, Slot>>,
    next_attempt: AtomicU64,
    connection_listeners: Listeners<ConnectionEvent>,
    data_listeners: Listeners<BleData>,
    destroyed: AtomicBool,
}

impl BleInner {
    /// Unsolicited link loss reported by the native layer
    fn handle_link_lost(&self, device_id: &str, attempt: u64) {
        let slot = {
            let mut table = lock(&self.connections);
            if table.get(device_id).map(Slot::attempt) == Some(attempt) {
                table.remove(device_id)
            } else {
                None
            }
        };

        match slot {
            Some(Slot::Connected { connection, .. }) => {
                info!("Device disconnected: {}", device_id);
                connection.release();
                let mut device = connection.device();
                device.state = ConnectionState::Disconnected;
                self.connection_listeners.notify(&ConnectionEvent {
                    device,
                    is_connected: false,
                });
            }
            Some(Slot::Connecting { .. }) => {
                warn!("Link to {} dropped while connecting", device_id);
            }
            None => debug!("Ignoring stale disconnect for {}", device_id),
        }
    }
}

/// Main Bluetooth service coordinating all BLE operations
#[derive(Clone)]
pub struct BleService {
    inner: Arc<BleInner>,
}

impl BleService {
    pub fn new(manager: Arc<dyn BleManager>) -> Self {
        let data_listeners = Listeners::new();
        Self {
            inner: Arc::new(BleInner {
                scanner: BleScanner::new(manager.clone()),
                connector: BleConnector::new(manager.clone(), data_listeners.clone()),
                manager,
                connections: Mutex::new(HashMap::new()),
                next_attempt: AtomicU64::new(1),
                connection_listeners: Listeners::new(),
                data_listeners,
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    /// Query and log the adapter state
    pub async fn initialize(&self) -> Result<AdapterState, BridgeError> {
        let state = self.inner.manager.state().await.map_err(|e| {
            error!("BLE initialization error: {}", e);
            BridgeError::from(e)
        })?;
        info!("BLE Manager state: {:?}", state);
        if state != AdapterState::PoweredOn {
            warn!("Bluetooth adapter is not powered on ({:?})", state);
        }
        Ok(state)
    }

    fn ensure_alive(&self) -> Result<(), BridgeError> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return Err(NativeError::new("BLE manager has been destroyed").into());
        }
        Ok(())
    }

    /// Start scanning for devices
    pub fn start_scan(&self, service_uuids: Option<Vec<String>>) -> Result<(), BridgeError> {
        self.ensure_alive()?;
        self.inner.scanner.start(service_uuids)
    }

    /// Stop scanning
    pub fn stop_scan(&self) -> Result<(), BridgeError> {
        self.inner.scanner.stop()
    }

    pub fn is_scanning(&self) -> bool {
        self.inner.scanner.is_scanning()
    }

    /// Connect to a device. Only valid from `Disconnected`.
    pub async fn connect(&self, device_id: &str) -> Result<BleDevice, BridgeError> {
        self.ensure_alive()?;
        let attempt = self.inner.next_attempt.fetch_add(1, Ordering::SeqCst);

        {
            let mut table = lock(&self.inner.connections);
            if let Some(slot) = table.get(device_id) {
                let state = slot.state();
                warn!("Rejecting connect to {}: already {}", device_id, state);
                return Err(BridgeError::AlreadyConnected {
                    device_id: device_id.to_string(),
                    state,
                });
            }
            table.insert(device_id.to_string(), Slot::Connecting { attempt });
        }

        let link = match self.inner.connector.establish(device_id).await {
            Ok(link) => link,
            Err(e) => {
                error!("Connect device error: {}", e);
                self.forget_attempt(device_id, attempt);
                return Err(e);
            }
        };

        let disconnect_watch = link
            .peripheral
            .on_disconnected(self.link_lost_handler(device_id, attempt));
        let monitors = self.inner.connector.monitor_notifications(&link);
        let connection = ActiveConnection::new(link.peripheral, monitors, disconnect_watch);
        let device = connection.device();

        // disconnect() or a link loss may have retired this attempt meanwhile
        let aborted = {
            let mut table = lock(&self.inner.connections);
            let pending = matches!(
                table.get(device_id),
                Some(Slot::Connecting { attempt: current }) if *current == attempt
            );
            if pending {
                table.insert(
                    device_id.to_string(),
                    Slot::Connected {
                        attempt,
                        connection,
                    },
                );
                None
            } else {
                Some(connection)
            }
        };

        if let Some(connection) = aborted {
            info!("Connection to {} abandoned before it completed", device_id);
            connection.release();
            if let Err(e) = connection.peripheral.cancel_connection().await {
                warn!("Failed to drop abandoned link {}: {}", device_id, e);
            }
            return Err(BridgeError::ConnectionAborted {
                device_id: device_id.to_string(),
            });
        }

        info!("Connected to {}", device_id);
        self.inner.connection_listeners.notify(&ConnectionEvent {
            device: device.clone(),
            is_connected: true,
        });
        Ok(device)
    }

    fn link_lost_handler(&self, device_id: &str, attempt: u64) -> DisconnectHandler {
        let weak: Weak<BleInner> = Arc::downgrade(&self.inner);
        let device_id = device_id.to_string();
        Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.handle_link_lost(&device_id, attempt);
            }
        })
    }

    fn forget_attempt(&self, device_id: &str, attempt: u64) {
        let mut table = lock(&self.inner.connections);
        if table.get(device_id).map(Slot::attempt) == Some(attempt) {
            table.remove(device_id);
        }
    }

    /// Disconnect from a device. A no-op for an unknown or disconnected id.
    pub async fn disconnect(&self, device_id: &str) -> Result<(), BridgeError> {
        let slot = lock(&self.inner.connections).remove(device_id);

        match slot {
            None => {
                debug!("Disconnect for {} ignored: not connected", device_id);
                Ok(())
            }
            Some(Slot::Connecting { .. }) => {
                info!("Abandoning pending connection to {}", device_id);
                Ok(())
            }
            Some(Slot::Connected { connection, .. }) => {
                connection.release();
                let result = connection.peripheral.cancel_connection().await;
                info!("Disconnected from {}", device_id);

                let mut device = connection.device();
                device.state = ConnectionState::Disconnected;
                self.inner.connection_listeners.notify(&ConnectionEvent {
                    device,
                    is_connected: false,
                });

                result.map_err(|e| {
                    error!("Disconnect device error: {}", e);
                    BridgeError::from(e)
                })
            }
        }
    }

    /// Write page text to a characteristic of a connected device
    pub async fn send_data(
        &self,
        device_id: &str,
        service_uuid: &str,
        characteristic_uuid: &str,
        payload: &str,
    ) -> Result<(), BridgeError> {
        let peripheral = match lock(&self.inner.connections).get(device_id) {
            Some(Slot::Connected { connection, .. }) => connection.peripheral.clone(),
            _ => return Err(BridgeError::DeviceNotConnected),
        };

        let encoded = codec::encode_payload(payload);
        peripheral
            .write_characteristic_with_response(service_uuid, characteristic_uuid, &encoded)
            .await
            .map_err(|e| {
                error!("Send data error: {}", e);
                BridgeError::from(e)
            })?;
        debug!("Data sent successfully to {}", device_id);
        Ok(())
    }

    pub fn connection_state(&self, device_id: &str) -> ConnectionState {
        lock(&self.inner.connections)
            .get(device_id)
            .map(Slot::state)
            .unwrap_or_default()
    }

    /// Whether any device is connecting or connected
    pub fn has_connections(&self) -> bool {
        !lock(&self.inner.connections).is_empty()
    }

    pub fn connected_devices(&self) -> Vec<BleDevice> {
        lock(&self.inner.connections)
            .values()
            .filter_map(|slot| match slot {
                Slot::Connected { connection, .. } => Some(connection.device()),
                Slot::Connecting { .. } => None,
            })
            .collect()
    }

    pub fn subscribe_to_scan<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&BleDevice) + Send + Sync + 'static,
    {
        self.inner.scanner.subscribe(listener)
    }

    pub fn subscribe_to_scan_errors<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&String) + Send + Sync + 'static,
    {
        self.inner.scanner.subscribe_to_errors(listener)
    }

    pub fn subscribe_to_connection<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.inner.connection_listeners.subscribe(listener)
    }

    pub fn subscribe_to_data<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&BleData) + Send + Sync + 'static,
    {
        self.inner.data_listeners.subscribe(listener)
    }

    /// Drop every connection and release the manager. Runs once; later
    /// calls return immediately.
    pub async fn cleanup(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        if self.inner.scanner.is_scanning() {
            if let Err(e) = self.inner.scanner.stop() {
                warn!("Cleanup scan stop error: {}", e);
            }
        }

        let slots: Vec<(String, Slot)> = lock(&self.inner.connections).drain().collect();
        for (device_id, slot) in slots {
            if let Slot::Connected { connection, .. } = slot {
                connection.release();
                if let Err(e) = connection.peripheral.cancel_connection().await {
                    error!("Cleanup error for {}: {}", device_id, e);
                }
            }
        }

        self.inner.manager.destroy();
        self.inner.scanner.clear_listeners();
        self.inner.connection_listeners.clear();
        self.inner.data_listeners.clear();
        info!("BLE service cleaned up");
    }
}
