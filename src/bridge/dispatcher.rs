//! Bridge Dispatcher
//!
//! Routes page requests to the capability services and sends exactly one
//! response per request id back through the browser host. Streaming methods
//! additionally keep one event listener per stream kind alive until the
//! matching stop call.
//!
//! Requests go through a single queue. Each one runs until its first native
//! suspension (permission prompt, connect, GATT write) before the next one
//! is taken, so state changes happen in arrival order while slow native
//! calls still overlap.

use crate::bridge::host::BrowserHost;
use crate::bridge::protocol::{
    parse_params, DeviceParams, Method, NativeEvent, Request, Response, ScanParams,
    SendDataParams,
};
use crate::domain::error::BridgeError;
use crate::domain::settings::BridgeSettings;
use crate::domain::subscription::{lock, Subscription};
use crate::infrastructure::bluetooth::BleService;
use crate::infrastructure::location::LocationService;
use crate::infrastructure::permissions::PermissionService;
use crate::infrastructure::push::PushTokenService;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Wake, Waker};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

/// The services a dispatcher routes to
#[derive(Clone)]
pub struct Capabilities {
    pub location: LocationService,
    pub ble: BleService,
    pub push: PushTokenService,
    pub permissions: PermissionService,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum StreamKind {
    Location,
    Scan,
    BleData,
}

type Outcome = Result<Option<Value>, BridgeError>;
type Call = Pin<Box<dyn Future<Output = Outcome> + Send>>;

/// Script delivery into the page
#[derive(Clone)]
struct Outbox {
    host: Arc<dyn BrowserHost>,
    global_name: Arc<str>,
}

impl Outbox {
    fn emit(&self, event: NativeEvent) {
        match event.to_script(&self.global_name) {
            Ok(script) => self.inject(&script),
            Err(e) => error!("Failed to serialize {} event: {}", event.handler_name(), e),
        }
    }

    fn inject(&self, script: &str) {
        if let Err(e) = self.host.inject_script(script) {
            error!("Script injection failed: {}", e);
        }
    }
}

struct DispatcherInner {
    services: Capabilities,
    outbox: Outbox,
    streams: Mutex<HashMap<StreamKind, Subscription>>,
    /// Ids accepted but not yet answered
    in_flight: Mutex<HashSet<String>>,
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
    queue: mpsc::UnboundedSender<Request>,
}

impl Dispatcher {
    /// Must be called from within a tokio runtime. The request queue is
    /// drained by a task that lives until the last clone is dropped.
    pub fn new(
        services: Capabilities,
        host: Arc<dyn BrowserHost>,
        settings: &BridgeSettings,
    ) -> Self {
        let inner = Arc::new(DispatcherInner {
            services,
            outbox: Outbox {
                host,
                global_name: Arc::from(settings.global_name.as_str()),
            },
            streams: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
        });

        let (queue, requests) = mpsc::unbounded_channel();
        tokio::spawn(drain_requests(inner.clone(), requests));

        Self { inner, queue }
    }

    /// Accept one raw page message. Returns immediately; the response is
    /// injected once the operation completes.
    pub fn handle(&self, raw: &str) {
        let request: Request = match serde_json::from_str(raw) {
            Ok(request) => request,
            Err(e) => {
                warn!("{}", BridgeError::MalformedMessage(e.to_string()));
                return;
            }
        };

        debug!("WebView message received: {}", request.method);
        if self.queue.send(request).is_err() {
            error!("Bridge request queue is closed");
        }
    }

    /// A freshly loaded page restarts its request ids. Answers still owed
    /// to the previous page are dropped.
    pub fn reset_session(&self) {
        lock(&self.inner.in_flight).clear();
    }

    /// Revoke every stream listener
    pub fn cleanup(&self) {
        let streams: Vec<Subscription> = lock(&self.inner.streams)
            .drain()
            .map(|(_, subscription)| subscription)
            .collect();
        streams.iter().for_each(Subscription::unsubscribe);
        self.reset_session();
        info!("Bridge dispatcher cleaned up");
    }
}

async fn drain_requests(
    inner: Arc<DispatcherInner>,
    mut requests: mpsc::UnboundedReceiver<Request>,
) {
    let waker = Waker::from(Arc::new(Unparked));
    while let Some(request) = requests.recv().await {
        inner.accept(request, &waker);
    }
    debug!("Bridge request queue drained");
}

/// Waker for the first in-line poll. A call that suspends is handed to its
/// own task, which polls it again with a real waker.
struct Unparked;

impl Wake for Unparked {
    fn wake(self: Arc<Self>) {}
}

impl DispatcherInner {
    fn accept(self: &Arc<Self>, request: Request, waker: &Waker) {
        let Request { id, method, params } = request;

        if !lock(&self.in_flight).insert(id.clone()) {
            warn!("Request {} is already in flight; duplicate dropped", id);
            return;
        }

        let mut call: Call = match method.parse::<Method>() {
            Ok(known) => Box::pin(Arc::clone(self).invoke(known, params)),
            Err(e) => return self.respond(id, method, Err(e)),
        };

        let mut cx = Context::from_waker(waker);
        match panic::catch_unwind(AssertUnwindSafe(|| call.as_mut().poll(&mut cx))) {
            Ok(Poll::Ready(outcome)) => self.respond(id, method, outcome),
            Ok(Poll::Pending) => {
                let inner = Arc::clone(self);
                tokio::spawn(async move {
                    let outcome = tokio::spawn(call)
                        .await
                        .unwrap_or_else(|e| Err(BridgeError::Internal(join_error_message(e))));
                    inner.respond(id, method, outcome);
                });
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                self.respond(id, method, Err(BridgeError::Internal(message)));
            }
        }
    }

    fn respond(&self, id: String, method: String, outcome: Outcome) {
        if !lock(&self.in_flight).remove(&id) {
            debug!("Dropping response for {} from a previous page", id);
            return;
        }

        let response = match outcome {
            Ok(result) => Response::success(id, method, result),
            Err(e) => {
                warn!(kind = ?e.kind(), "{} failed: {}", method, e);
                Response::failure(id, method, e.to_string())
            }
        };

        match response.to_script(&self.outbox.global_name) {
            Ok(script) => self.outbox.inject(&script),
            Err(e) => error!("Failed to serialize response {}: {}", response.id, e),
        }
    }

    async fn invoke(self: Arc<Self>, method: Method, params: Option<Value>) -> Outcome {
        let services = &self.services;

        match method {
            Method::GetFcmToken => to_result(&services.push.token()),
            Method::GetCurrentLocation => {
                let sample = services.location.get_current_location().await?;
                to_result(&sample)
            }
            Method::StartLocationTracking => {
                let outbox = self.outbox.clone();
                self.open_stream(StreamKind::Location, || {
                    services.location.subscribe_to_location_updates(move |sample| {
                        outbox.emit(NativeEvent::LocationUpdate(sample.clone()))
                    })
                });
                if let Err(e) = services.location.start_tracking().await {
                    self.close_stream(StreamKind::Location);
                    return Err(e);
                }
                Ok(None)
            }
            Method::StopLocationTracking => {
                services.location.stop_tracking();
                self.close_stream(StreamKind::Location);
                Ok(None)
            }
            Method::RequestLocationPermission => {
                to_result(&services.permissions.request_location_permission().await)
            }
            Method::StartBleScan => {
                let ScanParams { service_uuids } = parse_params(params)?;
                self.open_scan_stream();
                if let Err(e) = services.ble.start_scan(service_uuids) {
                    self.close_stream(StreamKind::Scan);
                    return Err(e);
                }
                Ok(None)
            }
            Method::StopBleScan => {
                let result = services.ble.stop_scan();
                self.close_stream(StreamKind::Scan);
                result.map(|()| None)
            }
            Method::ConnectBleDevice => {
                let device_id = parse_params::<DeviceParams>(params)?.require_device_id()?;
                let outbox = self.outbox.clone();
                self.open_stream(StreamKind::BleData, || {
                    services.ble.subscribe_to_data(move |chunk| {
                        outbox.emit(NativeEvent::BleDataReceived(chunk.data.clone()))
                    })
                });
                if let Err(e) = services.ble.connect(&device_id).await {
                    if !services.ble.has_connections() {
                        self.close_stream(StreamKind::BleData);
                    }
                    return Err(e);
                }
                Ok(None)
            }
            Method::DisconnectBleDevice => {
                let device_id = parse_params::<DeviceParams>(params)?.require_device_id()?;
                let result = services.ble.disconnect(&device_id).await;
                if !services.ble.has_connections() {
                    self.close_stream(StreamKind::BleData);
                }
                result.map(|()| None)
            }
            Method::SendBleData => {
                let write = parse_params::<SendDataParams>(params)?.into_write()?;
                services
                    .ble
                    .send_data(
                        &write.device_id,
                        &write.service_uuid,
                        &write.characteristic_uuid,
                        &write.data,
                    )
                    .await?;
                Ok(None)
            }
            Method::RequestBluetoothPermission => {
                to_result(&services.permissions.request_bluetooth_permission().await)
            }
            Method::RequestCameraPermission => {
                to_result(&services.permissions.request_camera_permission().await)
            }
            Method::RequestPhotoLibraryPermission => {
                to_result(&services.permissions.request_photo_library_permission().await)
            }
        }
    }

    /// Device fan-out plus a scan-error watch that drops the stream once
    /// the native scan has died
    fn open_scan_stream(self: &Arc<Self>) {
        let outbox = self.outbox.clone();
        let weak = Arc::downgrade(self);
        self.open_stream(StreamKind::Scan, || {
            let devices = self.services.ble.subscribe_to_scan(move |device| {
                outbox.emit(NativeEvent::BleDeviceFound(device.clone()))
            });
            let errors = self.services.ble.subscribe_to_scan_errors(move |message| {
                if let Some(inner) = weak.upgrade() {
                    warn!("BLE scan ended by native error: {}", message);
                    inner.close_stream(StreamKind::Scan);
                }
            });
            Subscription::new(move || {
                devices.unsubscribe();
                errors.unsubscribe();
            })
        });
    }

    /// Replace the listener for `kind`. The previous one is revoked before
    /// the new one is registered.
    fn open_stream<F>(&self, kind: StreamKind, subscribe: F)
    where
        F: FnOnce() -> Subscription,
    {
        self.close_stream(kind);
        let subscription = subscribe();
        let stale = lock(&self.streams).insert(kind, subscription);
        if let Some(stale) = stale {
            stale.unsubscribe();
        }
        debug!("{:?} stream listener installed", kind);
    }

    fn close_stream(&self, kind: StreamKind) {
        let previous = lock(&self.streams).remove(&kind);
        if let Some(previous) = previous {
            previous.unsubscribe();
            debug!("{:?} stream listener removed", kind);
        }
    }
}

fn to_result<T: Serialize>(value: &T) -> Outcome {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|e| BridgeError::Internal(e.to_string()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string())
}

fn join_error_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => panic_message(payload.as_ref()),
        Err(err) => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::host::ChannelHost;
    use crate::bridge::protocol::decode_script;
    use crate::domain::error::NativeError;
    use crate::domain::settings::{LocationSettings, Os, PlatformSettings};
    use crate::infrastructure::bluetooth::codec;
    use crate::infrastructure::bluetooth::native::{Advertisement, CharacteristicInfo};
    use crate::infrastructure::location::{
        Coordinates, Geolocation, Position, PositionHandler, WatchId,
    };
    use crate::infrastructure::simulated::{
        RecordingPresenter, SimulatedBleManager, SimulatedGeolocation, SimulatedMessaging,
        SimulatedPeripheral, SimulatedPermissions,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    const FIXED_TIMESTAMP: i64 = 1_700_000_000_000;

    fn fixed_position() -> Position {
        Position {
            coords: Coordinates {
                latitude: 1.0,
                longitude: 2.0,
                accuracy: 5.0,
                altitude: None,
                speed: None,
                heading: None,
            },
            timestamp: Some(FIXED_TIMESTAMP),
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        ble: Arc<SimulatedBleManager>,
        geolocation: Arc<SimulatedGeolocation>,
        scripts: UnboundedReceiver<String>,
    }

    fn harness_with(
        geolocation: Arc<dyn Geolocation>,
    ) -> (Dispatcher, Arc<SimulatedBleManager>, UnboundedReceiver<String>) {
        let ble = Arc::new(SimulatedBleManager::new());
        let permissions = PermissionService::new(
            Arc::new(SimulatedPermissions::granting_all()),
            PlatformSettings::default(),
        );
        let services = Capabilities {
            location: LocationService::new(
                geolocation,
                permissions.clone(),
                LocationSettings::default(),
            ),
            ble: BleService::new(ble.clone()),
            push: PushTokenService::new(
                Arc::new(SimulatedMessaging::new("token-1")),
                Arc::new(RecordingPresenter::default()),
                Os::Android,
            ),
            permissions,
        };
        let (host, scripts) = ChannelHost::new();
        let dispatcher = Dispatcher::new(services, Arc::new(host), &BridgeSettings::default());
        (dispatcher, ble, scripts)
    }

    fn harness() -> Harness {
        let geolocation = Arc::new(SimulatedGeolocation::new(fixed_position()));
        let (dispatcher, ble, scripts) = harness_with(geolocation.clone());
        Harness {
            dispatcher,
            ble,
            geolocation,
            scripts,
        }
    }

    async fn next_script(scripts: &mut UnboundedReceiver<String>) -> (String, Value) {
        let script = tokio::time::timeout(Duration::from_secs(1), scripts.recv())
            .await
            .expect("no script injected")
            .expect("host closed");
        decode_script(&script)
    }

    async fn next_response(scripts: &mut UnboundedReceiver<String>) -> Value {
        let (handler, payload) = next_script(scripts).await;
        assert_eq!(handler, "handleNativeResponse");
        payload
    }

    fn assert_quiet(scripts: &mut UnboundedReceiver<String>) {
        assert!(scripts.try_recv().is_err(), "unexpected script injected");
    }

    #[tokio::test]
    async fn test_current_location_end_to_end() {
        let mut h = harness();
        h.dispatcher.handle(r#"{"id":"1","method":"getCurrentLocation"}"#);

        assert_eq!(
            next_response(&mut h.scripts).await,
            json!({
                "id": "1",
                "method": "getCurrentLocation",
                "success": true,
                "result": {
                    "latitude": 1.0,
                    "longitude": 2.0,
                    "accuracy": 5.0,
                    "altitude": null,
                    "speed": null,
                    "heading": null,
                    "timestamp": FIXED_TIMESTAMP
                }
            })
        );
        assert_quiet(&mut h.scripts);
    }

    #[tokio::test]
    async fn test_scan_end_to_end_filters_unnamed_devices() {
        let mut h = harness();
        h.dispatcher.handle(r#"{"id":"2","method":"startBLEScan","params":{}}"#);
        assert_eq!(
            next_response(&mut h.scripts).await,
            json!({"id": "2", "method": "startBLEScan", "success": true})
        );

        h.ble.advertise(Advertisement {
            id: "A".to_string(),
            name: Some("Sensor-A".to_string()),
            rssi: Some(-50),
        });
        h.ble.advertise(Advertisement {
            id: "B".to_string(),
            name: None,
            rssi: Some(-70),
        });

        let (handler, payload) = next_script(&mut h.scripts).await;
        assert_eq!(handler, "handleBLEDeviceFound");
        assert_eq!(payload, json!({"id": "A", "name": "Sensor-A", "rssi": -50}));
        assert_quiet(&mut h.scripts);
    }

    #[tokio::test]
    async fn test_unknown_method_keeps_request_id() {
        let mut h = harness();
        h.dispatcher.handle(r#"{"id":"abc","method":"foo","params":{"x":1}}"#);

        assert_eq!(
            next_response(&mut h.scripts).await,
            json!({"id": "abc", "method": "foo", "success": false, "error": "Method not found"})
        );
    }

    #[tokio::test]
    async fn test_failure_yields_exactly_one_response() {
        let mut h = harness();
        h.ble.add_peripheral(SimulatedPeripheral::new("X", Some("Sensor"), vec![]));
        h.dispatcher.handle(
            r#"{"id":"3","method":"sendBLEData","params":{"deviceId":"X","serviceUUID":"s","characteristicUUID":"c","data":"hi"}}"#,
        );

        assert_eq!(
            next_response(&mut h.scripts).await,
            json!({"id": "3", "method": "sendBLEData", "success": false, "error": "Device not connected"})
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_quiet(&mut h.scripts);
        assert!(h.ble.peripheral("X").unwrap().writes().is_empty());
    }

    #[tokio::test]
    async fn test_second_scan_keeps_a_single_fan_out() {
        let mut h = harness();
        h.dispatcher.handle(r#"{"id":"s1","method":"startBLEScan"}"#);
        next_response(&mut h.scripts).await;
        h.dispatcher.handle(r#"{"id":"s2","method":"startBLEScan"}"#);
        next_response(&mut h.scripts).await;

        assert_eq!(h.ble.scan_starts(), 1);
        h.ble.advertise(Advertisement {
            id: "A".to_string(),
            name: Some("Sensor-A".to_string()),
            rssi: None,
        });

        let (handler, _) = next_script(&mut h.scripts).await;
        assert_eq!(handler, "handleBLEDeviceFound");
        assert_quiet(&mut h.scripts);
    }

    #[tokio::test]
    async fn test_malformed_message_is_dropped() {
        let mut h = harness();
        h.dispatcher.handle("{not json");
        h.dispatcher.handle(r#"{"method":"getFCMToken"}"#);
        h.dispatcher.handle(r#"{"id":"4","method":"getFCMToken"}"#);

        let response = next_response(&mut h.scripts).await;
        assert_eq!(response["id"], "4");
        assert_eq!(response["result"], Value::Null);
    }

    #[tokio::test]
    async fn test_duplicate_in_flight_id_is_not_run_again() {
        let mut h = harness();
        h.ble.add_peripheral(SimulatedPeripheral::new("X", Some("Sensor"), vec![]));
        h.ble.hold_connections();

        let connect = r#"{"id":"d","method":"connectBLEDevice","params":{"deviceId":"X"}}"#;
        h.dispatcher.handle(connect);
        h.dispatcher.handle(connect);
        h.dispatcher.handle(r#"{"id":"e","method":"stopBLEScan"}"#);
        assert_eq!(next_response(&mut h.scripts).await["id"], "e");

        h.ble.release_connections();
        let response = next_response(&mut h.scripts).await;
        assert_eq!(response["id"], "d");
        assert_eq!(response["success"], true);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_quiet(&mut h.scripts);
        assert_eq!(h.ble.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_answered_ids_are_forgotten() {
        let mut h = harness();
        for _ in 0..3 {
            h.dispatcher.handle(r#"{"id":"poll","method":"getCurrentLocation"}"#);
            assert_eq!(next_response(&mut h.scripts).await["success"], true);
        }
        assert!(lock(&h.dispatcher.inner.in_flight).is_empty());
    }

    #[tokio::test]
    async fn test_reload_drops_answers_owed_to_previous_page() {
        let mut h = harness();
        h.ble.add_peripheral(SimulatedPeripheral::new("X", Some("Sensor"), vec![]));
        h.ble.hold_connections();
        h.dispatcher.handle(r#"{"id":"old","method":"connectBLEDevice","params":{"deviceId":"X"}}"#);
        tokio::time::sleep(Duration::from_millis(20)).await;

        h.dispatcher.reset_session();
        h.ble.release_connections();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_quiet(&mut h.scripts);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_scan_start_then_stop_runs_in_arrival_order() {
        let mut h = harness();
        for round in 0..200 {
            h.dispatcher
                .handle(&format!(r#"{{"id":"start-{round}","method":"startBLEScan"}}"#));
            h.dispatcher
                .handle(&format!(r#"{{"id":"stop-{round}","method":"stopBLEScan"}}"#));

            assert_eq!(next_response(&mut h.scripts).await["id"], format!("start-{round}"));
            assert_eq!(next_response(&mut h.scripts).await["id"], format!("stop-{round}"));
            assert!(!h.dispatcher.inner.services.ble.is_scanning());
            assert!(!lock(&h.dispatcher.inner.streams).contains_key(&StreamKind::Scan));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_tracking_start_then_stop_leaves_no_watch() {
        let mut h = harness();
        for round in 0..100 {
            h.dispatcher
                .handle(&format!(r#"{{"id":"on-{round}","method":"startLocationTracking"}}"#));
            h.dispatcher
                .handle(&format!(r#"{{"id":"off-{round}","method":"stopLocationTracking"}}"#));

            next_response(&mut h.scripts).await;
            next_response(&mut h.scripts).await;
            assert_eq!(h.geolocation.active_watches(), 0);
        }
    }

    #[tokio::test]
    async fn test_scan_error_closes_scan_stream() {
        let mut h = harness();
        h.dispatcher.handle(r#"{"id":"s","method":"startBLEScan"}"#);
        next_response(&mut h.scripts).await;
        assert!(lock(&h.dispatcher.inner.streams).contains_key(&StreamKind::Scan));

        h.ble.fail_scan(NativeError::new("Bluetooth is powered off"));

        assert!(!h.dispatcher.inner.services.ble.is_scanning());
        assert!(!lock(&h.dispatcher.inner.streams).contains_key(&StreamKind::Scan));

        // a fresh scan installs a working stream again
        h.dispatcher.handle(r#"{"id":"t","method":"startBLEScan"}"#);
        assert_eq!(next_response(&mut h.scripts).await["success"], true);
        h.ble.advertise(Advertisement {
            id: "A".to_string(),
            name: Some("Sensor-A".to_string()),
            rssi: None,
        });
        assert_eq!(next_script(&mut h.scripts).await.0, "handleBLEDeviceFound");
    }

    #[tokio::test]
    async fn test_connect_requires_device_id() {
        let mut h = harness();
        h.dispatcher.handle(r#"{"id":"5","method":"connectBLEDevice","params":{}}"#);

        assert_eq!(next_response(&mut h.scripts).await["error"], "Device ID required");
    }

    #[tokio::test]
    async fn test_connected_device_data_reaches_page() {
        let mut h = harness();
        h.ble.add_peripheral(SimulatedPeripheral::new(
            "X",
            Some("Sensor"),
            vec![CharacteristicInfo {
                service_uuid: "180d".to_string(),
                uuid: "2a37".to_string(),
                is_notifiable: true,
                is_indicatable: false,
            }],
        ));

        h.dispatcher.handle(r#"{"id":"6","method":"connectBLEDevice","params":{"deviceId":"X"}}"#);
        assert_eq!(next_response(&mut h.scripts).await["success"], true);

        let peripheral = h.ble.peripheral("X").unwrap();
        peripheral.notify("2a37", &codec::encode_payload("hello"));
        assert_eq!(
            next_script(&mut h.scripts).await,
            ("handleBLEDataReceived".to_string(), json!("hello"))
        );

        h.dispatcher.handle(r#"{"id":"7","method":"disconnectBLEDevice","params":{"deviceId":"X"}}"#);
        assert_eq!(next_response(&mut h.scripts).await["success"], true);
        peripheral.notify("2a37", &codec::encode_payload("late"));
        assert_quiet(&mut h.scripts);
    }

    #[tokio::test]
    async fn test_tracking_stream_stops_with_stop_call() {
        let mut h = harness();
        h.dispatcher.handle(r#"{"id":"8","method":"startLocationTracking"}"#);
        assert_eq!(next_response(&mut h.scripts).await["success"], true);

        h.geolocation.emit(Ok(fixed_position()));
        let (handler, payload) = next_script(&mut h.scripts).await;
        assert_eq!(handler, "handleLocationUpdate");
        assert_eq!(payload["latitude"], 1.0);

        h.dispatcher.handle(r#"{"id":"9","method":"stopLocationTracking"}"#);
        next_response(&mut h.scripts).await;
        h.geolocation.emit(Ok(fixed_position()));
        assert_quiet(&mut h.scripts);
    }

    struct PanickingGeolocation;

    #[async_trait]
    impl Geolocation for PanickingGeolocation {
        async fn current_position(&self, _: &LocationSettings) -> Result<Position, NativeError> {
            panic!("provider crashed")
        }

        fn watch_position(
            &self,
            _: &LocationSettings,
            _: PositionHandler,
        ) -> Result<WatchId, NativeError> {
            Err(NativeError::new("unsupported"))
        }

        fn clear_watch(&self, _: WatchId) {}
    }

    #[tokio::test]
    async fn test_panicking_handler_still_gets_a_response() {
        let (dispatcher, _, mut scripts) = harness_with(Arc::new(PanickingGeolocation));
        dispatcher.handle(r#"{"id":"p","method":"getCurrentLocation"}"#);

        let response = next_response(&mut scripts).await;
        assert_eq!(response["success"], false);
        assert_eq!(response["error"], "Internal error: provider crashed");

        dispatcher.handle(r#"{"id":"q","method":"getFCMToken"}"#);
        assert_eq!(next_response(&mut scripts).await["id"], "q");
    }

    #[tokio::test]
    async fn test_cleanup_revokes_streams() {
        let mut h = harness();
        h.dispatcher.handle(r#"{"id":"10","method":"startBLEScan"}"#);
        next_response(&mut h.scripts).await;

        h.dispatcher.cleanup();
        h.ble.advertise(Advertisement {
            id: "A".to_string(),
            name: Some("Sensor-A".to_string()),
            rssi: None,
        });
        assert_quiet(&mut h.scripts);
    }
}
