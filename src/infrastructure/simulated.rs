//! In-memory native ports
//!
//! Deterministic stand-ins for the platform BLE stack, geolocation,
//! permission table and push messaging. The stdio host runs on them. Test
//! builds add inspection and fault-injection knobs. Handlers are always
//! invoked with no internal lock held.

use crate::domain::error::NativeError;
use crate::domain::models::PushMessage;
use crate::domain::settings::LocationSettings;
use crate::domain::subscription::{lock, Listeners, Subscription};
use crate::infrastructure::bluetooth::native::{
    AdapterState, Advertisement, BleManager, BlePeripheral, CharacteristicInfo,
    DisconnectHandler, ScanHandler, ValueHandler,
};
use crate::infrastructure::location::{Geolocation, Position, PositionHandler, WatchId};
use crate::infrastructure::permissions::{Permission, PermissionBackend, PermissionStatus};
use crate::infrastructure::push::{
    AuthorizationStatus, MessageHandler, NotificationPresenter, PushMessaging, TokenHandler,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// BLE
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PeripheralState {
    writes: Vec<(String, String, String)>,
    cancellations: usize,
    cancel_error: Option<String>,
    monitor_error: Option<String>,
    monitors: HashMap<String, Listeners<String>>,
}

pub struct SimulatedPeripheral {
    id: String,
    name: Option<String>,
    rssi: Option<i16>,
    characteristics: Vec<CharacteristicInfo>,
    disconnect_listeners: Listeners<()>,
    state: Mutex<PeripheralState>,
}

impl SimulatedPeripheral {
    pub fn new(id: &str, name: Option<&str>, characteristics: Vec<CharacteristicInfo>) -> Self {
        Self {
            id: id.to_string(),
            name: name.map(str::to_string),
            rssi: Some(-60),
            characteristics,
            disconnect_listeners: Listeners::new(),
            state: Mutex::new(PeripheralState::default()),
        }
    }

    fn advertisement(&self) -> Advertisement {
        Advertisement {
            id: self.id.clone(),
            name: self.name.clone(),
            rssi: self.rssi,
        }
    }
}

#[cfg(test)]
impl SimulatedPeripheral {
    /// Push a base64 value out of a monitored characteristic
    pub fn notify(&self, characteristic_uuid: &str, value_base64: &str) {
        let listeners = lock(&self.state).monitors.get(characteristic_uuid).cloned();
        if let Some(listeners) = listeners {
            listeners.notify(&value_base64.to_string());
        }
    }

    /// Simulate a peer-initiated disconnect or link loss
    pub fn drop_link(&self) {
        self.disconnect_listeners.notify(&());
    }

    /// Characteristic UUIDs with at least one live monitor, sorted
    pub fn monitored(&self) -> Vec<String> {
        let mut uuids: Vec<String> = lock(&self.state)
            .monitors
            .iter()
            .filter(|(_, listeners)| !listeners.is_empty())
            .map(|(uuid, _)| uuid.clone())
            .collect();
        uuids.sort();
        uuids
    }

    /// `(service, characteristic, base64 value)` for every write
    pub fn writes(&self) -> Vec<(String, String, String)> {
        lock(&self.state).writes.clone()
    }

    pub fn cancellations(&self) -> usize {
        lock(&self.state).cancellations
    }

    pub fn fail_cancellation(&self, message: &str) {
        lock(&self.state).cancel_error = Some(message.to_string());
    }

    pub fn fail_monitoring(&self, message: &str) {
        lock(&self.state).monitor_error = Some(message.to_string());
    }
}

#[async_trait]
impl BlePeripheral for SimulatedPeripheral {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    async fn discover_all_services_and_characteristics(
        &self,
    ) -> Result<Vec<CharacteristicInfo>, NativeError> {
        Ok(self.characteristics.clone())
    }

    fn on_disconnected(&self, handler: DisconnectHandler) -> Subscription {
        self.disconnect_listeners.subscribe(move |_| handler())
    }

    fn monitor_characteristic(
        &self,
        _service_uuid: &str,
        characteristic_uuid: &str,
        handler: ValueHandler,
    ) -> Result<Subscription, NativeError> {
        let mut state = lock(&self.state);
        if let Some(message) = &state.monitor_error {
            return Err(NativeError::new(message.clone()));
        }
        let listeners = state
            .monitors
            .entry(characteristic_uuid.to_string())
            .or_default()
            .clone();
        drop(state);
        Ok(listeners.subscribe(move |value: &String| handler(Ok(value.clone()))))
    }

    async fn write_characteristic_with_response(
        &self,
        service_uuid: &str,
        characteristic_uuid: &str,
        value_base64: &str,
    ) -> Result<(), NativeError> {
        lock(&self.state).writes.push((
            service_uuid.to_string(),
            characteristic_uuid.to_string(),
            value_base64.to_string(),
        ));
        Ok(())
    }

    async fn cancel_connection(&self) -> Result<(), NativeError> {
        let mut state = lock(&self.state);
        state.cancellations += 1;
        match &state.cancel_error {
            Some(message) => Err(NativeError::new(message.clone())),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
struct ManagerState {
    peripherals: BTreeMap<String, Arc<SimulatedPeripheral>>,
    scan_handler: Option<ScanHandler>,
    scan_starts: usize,
    connect_attempts: usize,
    destroy_calls: usize,
}

pub struct SimulatedBleManager {
    state: Mutex<ManagerState>,
    /// `true` while connections may complete
    gate: watch::Sender<bool>,
}

impl Default for SimulatedBleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBleManager {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            state: Mutex::new(ManagerState::default()),
            gate,
        }
    }

    /// Register a peripheral. It advertises to a running scan right away,
    /// to every later scan on start, and can be connected to.
    pub fn add_peripheral(&self, peripheral: SimulatedPeripheral) {
        let advertisement = peripheral.advertisement();
        let handler = {
            let mut state = lock(&self.state);
            state
                .peripherals
                .insert(peripheral.id.clone(), Arc::new(peripheral));
            state.scan_handler.clone()
        };
        if let Some(handler) = handler {
            handler(Ok(advertisement));
        }
    }

    fn find(&self, id: &str) -> Option<Arc<SimulatedPeripheral>> {
        lock(&self.state).peripherals.get(id).cloned()
    }
}

#[cfg(test)]
impl SimulatedBleManager {
    pub fn peripheral(&self, id: &str) -> Option<Arc<SimulatedPeripheral>> {
        self.find(id)
    }

    /// Park every connect until [`Self::release_connections`]
    pub fn hold_connections(&self) {
        self.gate.send_replace(false);
    }

    pub fn release_connections(&self) {
        self.gate.send_replace(true);
    }

    pub fn current_scan_handler(&self) -> Option<ScanHandler> {
        lock(&self.state).scan_handler.clone()
    }

    /// Deliver one advertisement to the running scan
    pub fn advertise(&self, advertisement: Advertisement) {
        if let Some(handler) = self.current_scan_handler() {
            handler(Ok(advertisement));
        }
    }

    pub fn fail_scan(&self, error: NativeError) {
        if let Some(handler) = self.current_scan_handler() {
            handler(Err(error));
        }
    }

    pub fn scan_starts(&self) -> usize {
        lock(&self.state).scan_starts
    }

    pub fn connect_attempts(&self) -> usize {
        lock(&self.state).connect_attempts
    }

    pub fn destroy_calls(&self) -> usize {
        lock(&self.state).destroy_calls
    }
}

#[async_trait]
impl BleManager for SimulatedBleManager {
    async fn state(&self) -> Result<AdapterState, NativeError> {
        Ok(AdapterState::PoweredOn)
    }

    fn start_device_scan(
        &self,
        _service_uuids: Option<&[String]>,
        handler: ScanHandler,
    ) -> Result<(), NativeError> {
        let advertisements: Vec<Advertisement> = {
            let mut state = lock(&self.state);
            state.scan_starts += 1;
            state.scan_handler = Some(handler.clone());
            state
                .peripherals
                .values()
                .map(|p| p.advertisement())
                .collect()
        };
        for advertisement in advertisements {
            handler(Ok(advertisement));
        }
        Ok(())
    }

    fn stop_device_scan(&self) -> Result<(), NativeError> {
        lock(&self.state).scan_handler = None;
        Ok(())
    }

    async fn connect_to_device(
        &self,
        device_id: &str,
    ) -> Result<Arc<dyn BlePeripheral>, NativeError> {
        lock(&self.state).connect_attempts += 1;

        let mut gate = self.gate.subscribe();
        if gate.wait_for(|open| *open).await.is_err() {
            return Err(NativeError::new("BLE manager shut down"));
        }

        match self.find(device_id) {
            Some(peripheral) => {
                debug!("Simulated link up: {}", device_id);
                Ok(peripheral)
            }
            None => Err(NativeError::new(format!("Device {} was not found", device_id))),
        }
    }

    fn destroy(&self) {
        let mut state = lock(&self.state);
        state.destroy_calls += 1;
        state.scan_handler = None;
    }
}

// ---------------------------------------------------------------------------
// Geolocation
// ---------------------------------------------------------------------------

struct GeolocationState {
    position: Result<Position, NativeError>,
    next_watch: u64,
    watches: BTreeMap<u64, PositionHandler>,
}

pub struct SimulatedGeolocation {
    state: Mutex<GeolocationState>,
}

impl SimulatedGeolocation {
    pub fn new(position: Position) -> Self {
        Self {
            state: Mutex::new(GeolocationState {
                position: Ok(position),
                next_watch: 1,
                watches: BTreeMap::new(),
            }),
        }
    }
}

#[cfg(test)]
impl SimulatedGeolocation {
    /// Result returned by subsequent single-shot queries
    pub fn set_current(&self, position: Result<Position, NativeError>) {
        lock(&self.state).position = position;
    }

    pub fn active_watches(&self) -> usize {
        lock(&self.state).watches.len()
    }

    /// Deliver a reading to every active watch
    pub fn emit(&self, reading: Result<Position, NativeError>) {
        let handlers: Vec<PositionHandler> = lock(&self.state).watches.values().cloned().collect();
        for handler in handlers {
            handler(reading.clone());
        }
    }
}

#[async_trait]
impl Geolocation for SimulatedGeolocation {
    async fn current_position(&self, _options: &LocationSettings) -> Result<Position, NativeError> {
        lock(&self.state).position.clone()
    }

    fn watch_position(
        &self,
        options: &LocationSettings,
        handler: PositionHandler,
    ) -> Result<WatchId, NativeError> {
        let mut state = lock(&self.state);
        let id = state.next_watch;
        state.next_watch += 1;
        state.watches.insert(id, handler);
        debug!(
            "Simulated watch {} (interval {} ms, distance filter {} m)",
            id, options.interval_ms, options.distance_filter_m
        );
        Ok(WatchId(id))
    }

    fn clear_watch(&self, watch: WatchId) {
        lock(&self.state).watches.remove(&watch.0);
    }
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PermissionTable {
    statuses: HashMap<Permission, PermissionStatus>,
    request_results: HashMap<Permission, PermissionStatus>,
    requested: Vec<Permission>,
    grant_all: bool,
    failure: Option<String>,
}

/// Permission table. Unknown permissions read as denied and a request is
/// answered with the configured result (denied by default).
#[derive(Default)]
pub struct SimulatedPermissions {
    table: Mutex<PermissionTable>,
}

impl SimulatedPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every permission is granted up front
    pub fn granting_all() -> Self {
        let permissions = Self::new();
        lock(&permissions.table).grant_all = true;
        permissions
    }
}

#[cfg(test)]
impl SimulatedPermissions {
    pub fn grant(&self, permission: Permission) {
        lock(&self.table)
            .statuses
            .insert(permission, PermissionStatus::Granted);
    }

    pub fn set_request_result(&self, permission: Permission, status: PermissionStatus) {
        lock(&self.table).request_results.insert(permission, status);
    }

    pub fn fail_with(&self, message: &str) {
        lock(&self.table).failure = Some(message.to_string());
    }

    /// Every permission that went through `request`, in order
    pub fn requested(&self) -> Vec<Permission> {
        lock(&self.table).requested.clone()
    }
}

#[async_trait]
impl PermissionBackend for SimulatedPermissions {
    async fn check(&self, permission: Permission) -> Result<PermissionStatus, NativeError> {
        let table = lock(&self.table);
        if let Some(message) = &table.failure {
            return Err(NativeError::new(message.clone()));
        }
        if table.grant_all {
            return Ok(PermissionStatus::Granted);
        }
        Ok(table
            .statuses
            .get(&permission)
            .copied()
            .unwrap_or(PermissionStatus::Denied))
    }

    async fn request(&self, permission: Permission) -> Result<PermissionStatus, NativeError> {
        let mut table = lock(&self.table);
        if let Some(message) = &table.failure {
            return Err(NativeError::new(message.clone()));
        }
        table.requested.push(permission);
        if table.grant_all {
            return Ok(PermissionStatus::Granted);
        }
        let status = table
            .request_results
            .get(&permission)
            .or_else(|| table.statuses.get(&permission))
            .copied()
            .unwrap_or(PermissionStatus::Denied);
        table.statuses.insert(permission, status);
        Ok(status)
    }
}

// ---------------------------------------------------------------------------
// Push messaging
// ---------------------------------------------------------------------------

struct MessagingState {
    token: String,
    initial: Option<PushMessage>,
    token_requests: usize,
    permission_requests: usize,
    initial_checks: usize,
}

pub struct SimulatedMessaging {
    state: Mutex<MessagingState>,
    /// `true` while token requests may complete
    token_gate: watch::Sender<bool>,
    refresh_listeners: Listeners<String>,
    message_listeners: Listeners<PushMessage>,
    opened_listeners: Listeners<PushMessage>,
}

impl SimulatedMessaging {
    pub fn new(token: &str) -> Self {
        let (token_gate, _) = watch::channel(true);
        Self {
            state: Mutex::new(MessagingState {
                token: token.to_string(),
                initial: None,
                token_requests: 0,
                permission_requests: 0,
                initial_checks: 0,
            }),
            token_gate,
            refresh_listeners: Listeners::new(),
            message_listeners: Listeners::new(),
            opened_listeners: Listeners::new(),
        }
    }
}

#[cfg(test)]
impl SimulatedMessaging {
    pub fn rotate_token(&self, token: &str) {
        lock(&self.state).token = token.to_string();
        self.refresh_listeners.notify(&token.to_string());
    }

    pub fn deliver_foreground(&self, message: PushMessage) {
        self.message_listeners.notify(&message);
    }

    /// Simulate a tap on a notification while the app was backgrounded
    pub fn open_notification(&self, message: PushMessage) {
        self.opened_listeners.notify(&message);
    }

    pub fn set_initial_notification(&self, message: PushMessage) {
        lock(&self.state).initial = Some(message);
    }

    /// Park every token request until [`Self::release_token`]
    pub fn hold_token(&self) {
        self.token_gate.send_replace(false);
    }

    pub fn release_token(&self) {
        self.token_gate.send_replace(true);
    }

    pub fn foreground_handlers(&self) -> usize {
        self.message_listeners.len()
    }

    pub fn token_requests(&self) -> usize {
        lock(&self.state).token_requests
    }

    pub fn permission_requests(&self) -> usize {
        lock(&self.state).permission_requests
    }

    pub fn initial_checks(&self) -> usize {
        lock(&self.state).initial_checks
    }
}

#[async_trait]
impl PushMessaging for SimulatedMessaging {
    async fn request_permission(&self) -> Result<AuthorizationStatus, NativeError> {
        lock(&self.state).permission_requests += 1;
        Ok(AuthorizationStatus::Authorized)
    }

    async fn get_token(&self) -> Result<String, NativeError> {
        lock(&self.state).token_requests += 1;

        let mut gate = self.token_gate.subscribe();
        if gate.wait_for(|open| *open).await.is_err() {
            return Err(NativeError::new("Messaging shut down"));
        }
        Ok(lock(&self.state).token.clone())
    }

    fn on_token_refresh(&self, handler: TokenHandler) -> Subscription {
        self.refresh_listeners
            .subscribe(move |token: &String| handler(token.clone()))
    }

    fn on_message(&self, handler: MessageHandler) -> Subscription {
        self.message_listeners
            .subscribe(move |message: &PushMessage| handler(message.clone()))
    }

    fn on_notification_opened_app(&self, handler: MessageHandler) -> Subscription {
        self.opened_listeners
            .subscribe(move |message: &PushMessage| handler(message.clone()))
    }

    async fn initial_notification(&self) -> Result<Option<PushMessage>, NativeError> {
        let mut state = lock(&self.state);
        state.initial_checks += 1;
        Ok(state.initial.clone())
    }
}

/// Writes local notifications to the log
pub struct LoggingPresenter;

impl NotificationPresenter for LoggingPresenter {
    fn show_notification(&self, title: &str, body: &str) {
        info!("Local notification: {} - {}", title, body);
    }
}

/// Keeps every local notification it was asked to show
#[cfg(test)]
#[derive(Default)]
pub struct RecordingPresenter {
    shown: Mutex<Vec<(String, String)>>,
}

#[cfg(test)]
impl RecordingPresenter {
    pub fn shown(&self) -> Vec<(String, String)> {
        lock(&self.shown).clone()
    }
}

#[cfg(test)]
impl NotificationPresenter for RecordingPresenter {
    fn show_notification(&self, title: &str, body: &str) {
        lock(&self.shown).push((title.to_string(), body.to_string()));
    }
}
