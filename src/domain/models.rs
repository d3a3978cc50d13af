use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Connection state of a single peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(label)
    }
}

/// A BLE peripheral as seen by the page.
///
/// Only `id`, `name` and `rssi` cross the bridge; the connection state is
/// local bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BleDevice {
    pub id: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    #[serde(skip)]
    pub state: ConnectionState,
}

/// Emitted whenever a peripheral connects or goes away
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionEvent {
    pub device: BleDevice,
    pub is_connected: bool,
}

/// One decoded notification chunk from a connected peripheral
#[derive(Debug, Clone, PartialEq)]
pub struct BleData {
    pub device_id: String,
    pub data: String,
}

/// Canonical location sample. Optional readings are always present on the
/// wire, as `null` when the platform did not supply them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    /// Unix milliseconds
    pub timestamp: i64,
}

/// Capability domains guarded by runtime permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Location,
    BackgroundLocation,
    Bluetooth,
    Camera,
    PhotoLibrary,
    Notifications,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Location => "Location",
            Self::BackgroundLocation => "Background location",
            Self::Bluetooth => "Bluetooth",
            Self::Camera => "Camera",
            Self::PhotoLibrary => "Photo library",
            Self::Notifications => "Notification",
        };
        f.write_str(label)
    }
}

/// Current push token and when it was obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushToken {
    pub token: String,
    pub acquired_at: i64,
}

/// A remote push message as delivered by the messaging layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub message_id: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    #[serde(default)]
    pub data: HashMap<String, String>,
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_sample_keeps_null_fields() {
        let sample = LocationSample {
            latitude: 1.0,
            longitude: 2.0,
            accuracy: 5.0,
            altitude: None,
            speed: None,
            heading: None,
            timestamp: 42,
        };
        let json = serde_json::to_value(&sample).unwrap();
        assert!(json["altitude"].is_null());
        assert!(json.as_object().unwrap().contains_key("heading"));
    }

    #[test]
    fn test_ble_device_wire_shape() {
        let device = BleDevice {
            id: "AA:BB".to_string(),
            name: Some("Sensor-A".to_string()),
            rssi: Some(-60),
            state: ConnectionState::Connected,
        };
        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": "AA:BB", "name": "Sensor-A", "rssi": -60})
        );
    }
}
