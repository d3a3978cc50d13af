//! BLE Connection Module
//!
//! Opens a link, discovers the GATT table and wires every notifiable or
//! indicatable characteristic into the service's data stream.

use crate::domain::error::{BridgeError, NativeError};
use crate::domain::models::{BleData, BleDevice, ConnectionState};
use crate::domain::subscription::{Listeners, Subscription};
use crate::infrastructure::bluetooth::codec;
use crate::infrastructure::bluetooth::native::{
    BleManager, BlePeripheral, CharacteristicInfo, ValueHandler,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A freshly opened link, before it is registered with the service
pub struct EstablishedLink {
    pub peripheral: Arc<dyn BlePeripheral>,
    pub characteristics: Vec<CharacteristicInfo>,
}

/// A registered, live connection
pub struct ActiveConnection {
    pub peripheral: Arc<dyn BlePeripheral>,
    monitors: Vec<Subscription>,
    disconnect_watch: Subscription,
}

impl ActiveConnection {
    pub fn new(
        peripheral: Arc<dyn BlePeripheral>,
        monitors: Vec<Subscription>,
        disconnect_watch: Subscription,
    ) -> Self {
        Self {
            peripheral,
            monitors,
            disconnect_watch,
        }
    }

    pub fn device(&self) -> BleDevice {
        BleDevice {
            id: self.peripheral.id().to_string(),
            name: self.peripheral.name(),
            rssi: self.peripheral.rssi(),
            state: ConnectionState::Connected,
        }
    }

    /// Detach every native listener owned by this connection
    pub fn release(&self) {
        self.disconnect_watch.unsubscribe();
        self.monitors.iter().for_each(Subscription::unsubscribe);
    }
}

/// BLE connection handler
pub struct BleConnector {
    manager: Arc<dyn BleManager>,
    data_listeners: Listeners<BleData>,
}

impl BleConnector {
    pub fn new(manager: Arc<dyn BleManager>, data_listeners: Listeners<BleData>) -> Self {
        Self {
            manager,
            data_listeners,
        }
    }

    /// Connect and discover services.
    ///
    /// A discovery failure tears the native link down again before
    /// returning the error.
    pub async fn establish(&self, device_id: &str) -> Result<EstablishedLink, BridgeError> {
        info!("Connecting to BLE device: {}", device_id);

        // Step 1: open the link
        let peripheral = self.manager.connect_to_device(device_id).await?;

        // Step 2: walk the GATT table
        let characteristics = match peripheral.discover_all_services_and_characteristics().await {
            Ok(characteristics) => characteristics,
            Err(e) => {
                error!("Service discovery failed for {}: {}", device_id, e);
                if let Err(cancel_err) = peripheral.cancel_connection().await {
                    warn!("Failed to drop half-open link {}: {}", device_id, cancel_err);
                }
                return Err(e.into());
            }
        };
        info!(
            "Discovered {} characteristics on {}",
            characteristics.len(),
            device_id
        );

        Ok(EstablishedLink {
            peripheral,
            characteristics,
        })
    }

    /// Subscribe to every notifiable/indicatable characteristic.
    ///
    /// Failures are logged and skipped; the connection stands without them.
    pub fn monitor_notifications(&self, link: &EstablishedLink) -> Vec<Subscription> {
        let device_id = link.peripheral.id().to_string();
        let mut monitors = Vec::new();

        for characteristic in link
            .characteristics
            .iter()
            .filter(|c| c.is_notifiable || c.is_indicatable)
        {
            let handler = self.value_handler(&device_id, &characteristic.uuid);
            match link.peripheral.monitor_characteristic(
                &characteristic.service_uuid,
                &characteristic.uuid,
                handler,
            ) {
                Ok(subscription) => {
                    debug!("Monitoring {} on {}", characteristic.uuid, device_id);
                    monitors.push(subscription);
                }
                Err(e) => error!(
                    "Characteristic monitor setup failed for {}: {}",
                    characteristic.uuid, e
                ),
            }
        }

        if monitors.is_empty() {
            warn!("No notifications enabled on {}", device_id);
        }
        monitors
    }

    fn value_handler(&self, device_id: &str, characteristic_uuid: &str) -> ValueHandler {
        let listeners = self.data_listeners.clone();
        let device_id = device_id.to_string();
        let characteristic_uuid = characteristic_uuid.to_string();

        Arc::new(move |value: Result<String, NativeError>| {
            let value = match value {
                Ok(value) => value,
                Err(e) => {
                    error!("Characteristic monitor error ({}): {}", characteristic_uuid, e);
                    return;
                }
            };
            match codec::decode_notification(&value) {
                Ok(data) => listeners.notify(&BleData {
                    device_id: device_id.clone(),
                    data,
                }),
                Err(e) => warn!(
                    "Dropping undecodable value from {}: {}",
                    characteristic_uuid, e
                ),
            }
        })
    }
}
