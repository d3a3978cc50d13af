//! Native shell
//!
//! Owns the capability services and the dispatcher for one browser view.
//! Lifecycle: [`NativeShell::start`] once, [`NativeShell::on_page_loaded`]
//! after every page load, [`NativeShell::handle_message`] per page message
//! and [`NativeShell::shutdown`] at teardown.

use crate::bridge::client::client_script;
use crate::bridge::host::{BrowserHost, HostError};
use crate::bridge::{Capabilities, Dispatcher};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::native::{BleManager, CharacteristicInfo};
use crate::infrastructure::bluetooth::BleService;
use crate::infrastructure::location::{Coordinates, Geolocation, LocationService, Position};
use crate::infrastructure::permissions::{PermissionBackend, PermissionService};
use crate::infrastructure::push::{NotificationPresenter, PushMessaging, PushTokenService};
use crate::infrastructure::simulated::{
    LoggingPresenter, SimulatedBleManager, SimulatedGeolocation, SimulatedMessaging,
    SimulatedPeripheral, SimulatedPermissions,
};
use std::sync::Arc;
use tracing::{error, info};

/// Platform implementations of every native capability
pub struct NativePorts {
    pub ble: Arc<dyn BleManager>,
    pub geolocation: Arc<dyn Geolocation>,
    pub permissions: Arc<dyn PermissionBackend>,
    pub messaging: Arc<dyn PushMessaging>,
    pub presenter: Arc<dyn NotificationPresenter>,
}

impl NativePorts {
    /// In-memory ports with one advertising heart-rate sensor
    pub fn simulated() -> Self {
        let ble = SimulatedBleManager::new();
        ble.add_peripheral(SimulatedPeripheral::new(
            "00:11:22:33:44:55",
            Some("Demo Sensor"),
            vec![
                CharacteristicInfo {
                    service_uuid: "0000180d-0000-1000-8000-00805f9b34fb".to_string(),
                    uuid: "00002a37-0000-1000-8000-00805f9b34fb".to_string(),
                    is_notifiable: true,
                    is_indicatable: false,
                },
                CharacteristicInfo {
                    service_uuid: "0000180d-0000-1000-8000-00805f9b34fb".to_string(),
                    uuid: "00002a39-0000-1000-8000-00805f9b34fb".to_string(),
                    is_notifiable: false,
                    is_indicatable: false,
                },
            ],
        ));

        let position = Position {
            coords: Coordinates {
                latitude: 37.5665,
                longitude: 126.978,
                accuracy: 10.0,
                altitude: Some(38.0),
                speed: None,
                heading: None,
            },
            timestamp: None,
        };

        Self {
            ble: Arc::new(ble),
            geolocation: Arc::new(SimulatedGeolocation::new(position)),
            permissions: Arc::new(SimulatedPermissions::granting_all()),
            messaging: Arc::new(SimulatedMessaging::new("simulated-push-token")),
            presenter: Arc::new(LoggingPresenter),
        }
    }
}

pub struct NativeShell {
    settings: Settings,
    services: Capabilities,
    dispatcher: Dispatcher,
    host: Arc<dyn BrowserHost>,
}

impl NativeShell {
    pub fn new(settings: Settings, ports: NativePorts, host: Arc<dyn BrowserHost>) -> Self {
        let permissions = PermissionService::new(ports.permissions, settings.platform.clone());
        let services = Capabilities {
            location: LocationService::new(
                ports.geolocation,
                permissions.clone(),
                settings.location.clone(),
            ),
            ble: BleService::new(ports.ble),
            push: PushTokenService::new(ports.messaging, ports.presenter, settings.platform.os),
            permissions,
        };
        let dispatcher = Dispatcher::new(services.clone(), host.clone(), &settings.bridge);

        Self {
            settings,
            services,
            dispatcher,
            host,
        }
    }

    /// Bring up push messaging and the BLE manager. Failures are logged;
    /// the bridge runs without the affected capability.
    pub async fn start(&self) {
        if let Err(e) = self.services.push.initialize().await {
            error!("Push messaging unavailable: {}", e);
        }
        if let Err(e) = self.services.ble.initialize().await {
            error!("BLE unavailable: {}", e);
        }
        info!("Native shell started for {}", self.settings.bridge.web_url);
    }

    pub fn web_url(&self) -> &str {
        &self.settings.bridge.web_url
    }

    /// Inject the in-page client into a freshly loaded page
    pub fn on_page_loaded(&self) -> Result<(), HostError> {
        self.dispatcher.reset_session();
        self.host.inject_script(&client_script(&self.settings.bridge))?;
        info!("Bridge client injected");
        Ok(())
    }

    /// Forward one message posted by the page
    pub fn handle_message(&self, raw: &str) {
        self.dispatcher.handle(raw);
    }

    pub fn services(&self) -> &Capabilities {
        &self.services
    }

    pub async fn shutdown(&self) {
        info!("Shutting down native shell...");
        self.dispatcher.cleanup();
        self.services.ble.cleanup().await;
        self.services.location.cleanup();
        self.services.push.cleanup();
        info!("Native shell stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::host::ChannelHost;
    use crate::bridge::protocol::decode_script;
    use crate::domain::subscription::lock;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn test_start_acquires_push_token() {
        let (host, _scripts) = ChannelHost::new();
        let shell = NativeShell::new(Settings::default(), NativePorts::simulated(), Arc::new(host));

        shell.start().await;
        assert_eq!(
            shell.services().push.token().as_deref(),
            Some("simulated-push-token")
        );
    }

    #[tokio::test]
    async fn test_page_load_injects_client() {
        let (host, mut scripts) = ChannelHost::new();
        let shell = NativeShell::new(Settings::default(), NativePorts::simulated(), Arc::new(host));

        shell.on_page_loaded().unwrap();
        let script = scripts.try_recv().unwrap();
        assert!(script.contains("window.__nativebridge = {"));
    }

    #[tokio::test]
    async fn test_message_round_trip_through_shell() {
        let (host, mut scripts) = ChannelHost::new();
        let shell = NativeShell::new(Settings::default(), NativePorts::simulated(), Arc::new(host));
        shell.start().await;

        shell.handle_message(r#"{"id":"msg_1","method":"getFCMToken","params":{}}"#);
        let script = tokio::time::timeout(Duration::from_secs(1), scripts.recv())
            .await
            .unwrap()
            .unwrap();
        let (_, response) = decode_script(&script);
        assert_eq!(response["result"], "simulated-push-token");
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_devices() {
        let (host, _scripts) = ChannelHost::new();
        let shell = NativeShell::new(Settings::default(), NativePorts::simulated(), Arc::new(host));
        shell.start().await;

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let _sub = shell
            .services()
            .ble
            .subscribe_to_connection(move |event| lock(&sink).push(event.is_connected));
        shell
            .services()
            .ble
            .connect("00:11:22:33:44:55")
            .await
            .unwrap();
        shell.services().location.start_tracking().await.unwrap();

        shell.shutdown().await;

        assert!(shell.services().ble.connected_devices().is_empty());
        assert!(!shell.services().location.is_tracking());
        assert_eq!(shell.services().push.token(), None);
        assert_eq!(lock(&events).as_slice(), [true]);
    }
}
