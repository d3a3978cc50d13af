//! BLE Scanner Module
//!
//! Device discovery. At most one native scan runs at a time; unnamed
//! peripherals never reach subscribers.

use crate::domain::error::{BridgeError, NativeError};
use crate::domain::models::{BleDevice, ConnectionState};
use crate::domain::subscription::{lock, Listeners, Subscription};
use crate::infrastructure::bluetooth::native::{Advertisement, BleManager, ScanHandler};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Default)]
struct ScanState {
    scanning: bool,
    /// Bumped on every start so callbacks from an older scan are ignored
    generation: u64,
}

pub struct BleScanner {
    manager: Arc<dyn BleManager>,
    state: Arc<Mutex<ScanState>>,
    device_listeners: Listeners<BleDevice>,
    error_listeners: Listeners<String>,
}

impl BleScanner {
    pub fn new(manager: Arc<dyn BleManager>) -> Self {
        Self {
            manager,
            state: Arc::new(Mutex::new(ScanState::default())),
            device_listeners: Listeners::new(),
            error_listeners: Listeners::new(),
        }
    }

    /// Start scanning, optionally restricted to the given service UUIDs.
    /// Calling this while a scan is running is a no-op.
    pub fn start(&self, service_uuids: Option<Vec<String>>) -> Result<(), BridgeError> {
        let generation = {
            let mut state = lock(&self.state);
            if state.scanning {
                warn!("Scan already in progress");
                return Ok(());
            }
            state.scanning = true;
            state.generation += 1;
            state.generation
        };

        info!("Starting BLE scan (service filter: {:?})", service_uuids);

        let handler = self.scan_handler(generation);
        if let Err(e) = self
            .manager
            .start_device_scan(service_uuids.as_deref(), handler)
        {
            error!("Start scan error: {}", e);
            self.reset(generation);
            return Err(e.into());
        }
        Ok(())
    }

    fn scan_handler(&self, generation: u64) -> ScanHandler {
        let state = Arc::clone(&self.state);
        let devices = self.device_listeners.clone();
        let errors = self.error_listeners.clone();

        Arc::new(move |outcome: Result<Advertisement, NativeError>| {
            {
                let mut state = lock(&state);
                if !state.scanning || state.generation != generation {
                    return;
                }
                if outcome.is_err() {
                    state.scanning = false;
                }
            }

            match outcome {
                Ok(Advertisement {
                    id,
                    name: Some(name),
                    rssi,
                }) if !name.is_empty() => {
                    debug!("Device found: {} {}", id, name);
                    devices.notify(&BleDevice {
                        id,
                        name: Some(name),
                        rssi,
                        state: ConnectionState::Disconnected,
                    });
                }
                Ok(advertisement) => trace!("Skipping unnamed device {}", advertisement.id),
                Err(e) => {
                    error!("Scan error: {}", e);
                    errors.notify(&e.message);
                }
            }
        })
    }

    fn reset(&self, generation: u64) {
        let mut state = lock(&self.state);
        if state.generation == generation {
            state.scanning = false;
        }
    }

    /// Stop scanning
    pub fn stop(&self) -> Result<(), BridgeError> {
        lock(&self.state).scanning = false;
        info!("Stopping BLE scan...");
        self.manager.stop_device_scan().map_err(|e| {
            error!("Stop scan error: {}", e);
            BridgeError::from(e)
        })
    }

    /// Check if currently scanning
    pub fn is_scanning(&self) -> bool {
        lock(&self.state).scanning
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&BleDevice) + Send + Sync + 'static,
    {
        self.device_listeners.subscribe(listener)
    }

    pub fn subscribe_to_errors<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&String) + Send + Sync + 'static,
    {
        self.error_listeners.subscribe(listener)
    }

    pub(crate) fn clear_listeners(&self) {
        self.device_listeners.clear();
        self.error_listeners.clear();
    }
}
