//! Native BLE ports
//!
//! The platform BLE stack as seen by [`super::BleService`]. Characteristic
//! values cross this boundary base64-encoded, as the mobile BLE bridges
//! deliver them.

use crate::domain::error::NativeError;
use crate::domain::subscription::Subscription;
use async_trait::async_trait;
use std::sync::Arc;

/// One advertisement received while scanning
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    pub id: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

/// A GATT characteristic exposed by a connected peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub service_uuid: String,
    pub uuid: String,
    pub is_notifiable: bool,
    pub is_indicatable: bool,
}

pub type ScanHandler = Arc<dyn Fn(Result<Advertisement, NativeError>) + Send + Sync>;
/// Receives base64 characteristic values
pub type ValueHandler = Arc<dyn Fn(Result<String, NativeError>) + Send + Sync>;
pub type DisconnectHandler = Arc<dyn Fn() + Send + Sync>;

/// The platform BLE manager. One per process.
#[async_trait]
pub trait BleManager: Send + Sync {
    async fn state(&self) -> Result<AdapterState, NativeError>;

    fn start_device_scan(
        &self,
        service_uuids: Option<&[String]>,
        handler: ScanHandler,
    ) -> Result<(), NativeError>;

    fn stop_device_scan(&self) -> Result<(), NativeError>;

    async fn connect_to_device(&self, device_id: &str)
        -> Result<Arc<dyn BlePeripheral>, NativeError>;

    /// Release the manager. Called once, at teardown.
    fn destroy(&self);
}

/// A connected peripheral handle
#[async_trait]
pub trait BlePeripheral: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> Option<String>;
    fn rssi(&self) -> Option<i16>;

    async fn discover_all_services_and_characteristics(
        &self,
    ) -> Result<Vec<CharacteristicInfo>, NativeError>;

    /// Fires when the link drops for any reason other than `cancel_connection`
    fn on_disconnected(&self, handler: DisconnectHandler) -> Subscription;

    fn monitor_characteristic(
        &self,
        service_uuid: &str,
        characteristic_uuid: &str,
        handler: ValueHandler,
    ) -> Result<Subscription, NativeError>;

    async fn write_characteristic_with_response(
        &self,
        service_uuid: &str,
        characteristic_uuid: &str,
        value_base64: &str,
    ) -> Result<(), NativeError>;

    async fn cancel_connection(&self) -> Result<(), NativeError>;
}
