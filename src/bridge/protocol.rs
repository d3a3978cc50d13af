//! Bridge wire format
//!
//! Browser → native: one JSON [`Request`] per message.
//! Native → browser: a short script that hands a [`Response`] or a
//! [`NativeEvent`] payload to one of the in-page client's global handlers.

use crate::domain::error::BridgeError;
use crate::domain::models::{BleDevice, LocationSample};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub id: String,
    pub method: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// `result` of `None` is a bare acknowledgement; `Some(Value::Null)`
    /// is an explicit null result.
    pub fn success(id: String, method: String, result: Option<Value>) -> Self {
        Self {
            id,
            method,
            success: true,
            result,
            error: None,
        }
    }

    pub fn failure(id: String, method: String, error: String) -> Self {
        Self {
            id,
            method,
            success: false,
            result: None,
            error: Some(error),
        }
    }

    pub fn to_script(&self, global_name: &str) -> Result<String, serde_json::Error> {
        let payload = serde_json::to_string(self)?;
        Ok(render_script(global_name, "handleNativeResponse", &payload))
    }
}

/// RPC method catalogue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    GetFcmToken,
    GetCurrentLocation,
    StartLocationTracking,
    StopLocationTracking,
    RequestLocationPermission,
    StartBleScan,
    StopBleScan,
    ConnectBleDevice,
    DisconnectBleDevice,
    SendBleData,
    RequestBluetoothPermission,
    RequestCameraPermission,
    RequestPhotoLibraryPermission,
}

impl Method {
    pub const ALL: [Method; 13] = [
        Method::GetFcmToken,
        Method::GetCurrentLocation,
        Method::StartLocationTracking,
        Method::StopLocationTracking,
        Method::RequestLocationPermission,
        Method::StartBleScan,
        Method::StopBleScan,
        Method::ConnectBleDevice,
        Method::DisconnectBleDevice,
        Method::SendBleData,
        Method::RequestBluetoothPermission,
        Method::RequestCameraPermission,
        Method::RequestPhotoLibraryPermission,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GetFcmToken => "getFCMToken",
            Method::GetCurrentLocation => "getCurrentLocation",
            Method::StartLocationTracking => "startLocationTracking",
            Method::StopLocationTracking => "stopLocationTracking",
            Method::RequestLocationPermission => "requestLocationPermission",
            Method::StartBleScan => "startBLEScan",
            Method::StopBleScan => "stopBLEScan",
            Method::ConnectBleDevice => "connectBLEDevice",
            Method::DisconnectBleDevice => "disconnectBLEDevice",
            Method::SendBleData => "sendBLEData",
            Method::RequestBluetoothPermission => "requestBluetoothPermission",
            Method::RequestCameraPermission => "requestCameraPermission",
            Method::RequestPhotoLibraryPermission => "requestPhotoLibraryPermission",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = BridgeError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|method| method.as_str() == name)
            .ok_or(BridgeError::MethodNotFound)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ScanParams {
    #[serde(rename = "serviceUUIDs", default)]
    pub service_uuids: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeviceParams {
    #[serde(rename = "deviceId", default)]
    pub device_id: Option<String>,
}

impl DeviceParams {
    pub fn require_device_id(self) -> Result<String, BridgeError> {
        self.device_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| BridgeError::InvalidParams("Device ID required".to_string()))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SendDataParams {
    #[serde(rename = "deviceId", default)]
    pub device_id: Option<String>,
    #[serde(rename = "serviceUUID", default)]
    pub service_uuid: Option<String>,
    #[serde(rename = "characteristicUUID", default)]
    pub characteristic_uuid: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

/// A fully specified characteristic write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataWrite {
    pub device_id: String,
    pub service_uuid: String,
    pub characteristic_uuid: String,
    pub data: String,
}

impl SendDataParams {
    /// Every field is required and must be non-empty
    pub fn into_write(self) -> Result<DataWrite, BridgeError> {
        let present = |field: Option<String>| field.filter(|value| !value.is_empty());
        match (
            present(self.device_id),
            present(self.service_uuid),
            present(self.characteristic_uuid),
            present(self.data),
        ) {
            (Some(device_id), Some(service_uuid), Some(characteristic_uuid), Some(data)) => {
                Ok(DataWrite {
                    device_id,
                    service_uuid,
                    characteristic_uuid,
                    data,
                })
            }
            _ => Err(BridgeError::InvalidParams(
                "Missing required parameters for BLE data send".to_string(),
            )),
        }
    }
}

/// Decode method params. Absent or `null` params yield the defaults.
pub fn parse_params<T>(params: Option<Value>) -> Result<T, BridgeError>
where
    T: DeserializeOwned + Default,
{
    match params {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => {
            serde_json::from_value(value).map_err(|e| BridgeError::InvalidParams(e.to_string()))
        }
    }
}

/// Unsolicited native → browser push
#[derive(Debug, Clone, PartialEq)]
pub enum NativeEvent {
    LocationUpdate(LocationSample),
    BleDeviceFound(BleDevice),
    BleDataReceived(String),
}

impl NativeEvent {
    pub fn handler_name(&self) -> &'static str {
        match self {
            NativeEvent::LocationUpdate(_) => "handleLocationUpdate",
            NativeEvent::BleDeviceFound(_) => "handleBLEDeviceFound",
            NativeEvent::BleDataReceived(_) => "handleBLEDataReceived",
        }
    }

    pub fn to_script(&self, global_name: &str) -> Result<String, serde_json::Error> {
        let payload = match self {
            NativeEvent::LocationUpdate(sample) => serde_json::to_string(sample)?,
            NativeEvent::BleDeviceFound(device) => serde_json::to_string(device)?,
            NativeEvent::BleDataReceived(data) => serde_json::to_string(data)?,
        };
        Ok(render_script(global_name, self.handler_name(), &payload))
    }
}

fn render_script(global_name: &str, handler: &str, payload: &str) -> String {
    format!(
        "if (window.{global}) {{ window.{global}.{handler}({payload}); }}\ntrue;",
        global = global_name,
        handler = handler,
        payload = payload,
    )
}

/// Split an injected script back into `(handler, payload)`
#[cfg(test)]
pub(crate) fn decode_script(script: &str) -> (String, Value) {
    let start = script.find(".handle").expect("no handler call") + 1;
    let open = start + script[start..].find('(').expect("no argument list");
    let close = script.rfind("); }").expect("unterminated call");
    let payload = serde_json::from_str(&script[open + 1..close]).expect("payload is not JSON");
    (script[start..open].to_string(), payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ConnectionState;
    use serde_json::json;

    #[test]
    fn test_request_params_are_optional() {
        let request: Request = serde_json::from_str(r#"{"id":"7","method":"stopBLEScan"}"#).unwrap();
        assert_eq!(request.params, None);
        assert!(serde_json::from_str::<Request>(r#"{"method":"stopBLEScan"}"#).is_err());
    }

    #[test]
    fn test_method_names_round_trip() {
        for method in Method::ALL {
            assert_eq!(method.as_str().parse::<Method>().unwrap(), method);
        }
        assert_eq!("foo".parse::<Method>().unwrap_err(), BridgeError::MethodNotFound);
    }

    #[test]
    fn test_ack_omits_result_but_null_result_is_kept() {
        let ack = Response::success("1".into(), "stopBLEScan".into(), None);
        assert_eq!(
            serde_json::to_value(&ack).unwrap(),
            json!({"id": "1", "method": "stopBLEScan", "success": true})
        );

        let null = Response::success("2".into(), "getFCMToken".into(), Some(Value::Null));
        assert_eq!(
            serde_json::to_value(&null).unwrap(),
            json!({"id": "2", "method": "getFCMToken", "success": true, "result": null})
        );
    }

    #[test]
    fn test_send_data_params_reject_empty_fields() {
        let params: SendDataParams = parse_params(Some(json!({
            "deviceId": "X",
            "serviceUUID": "180d",
            "characteristicUUID": "2a39",
            "data": ""
        })))
        .unwrap();
        assert_eq!(
            params.into_write().unwrap_err().to_string(),
            "Missing required parameters for BLE data send"
        );
    }

    #[test]
    fn test_device_params_require_id() {
        let params: DeviceParams = parse_params(None).unwrap();
        assert_eq!(params.require_device_id().unwrap_err().to_string(), "Device ID required");
    }

    #[test]
    fn test_event_script_calls_global_handler() {
        let event = NativeEvent::BleDeviceFound(BleDevice {
            id: "A".into(),
            name: Some("Sensor-A".into()),
            rssi: Some(-40),
            state: ConnectionState::Disconnected,
        });
        let script = event.to_script("__nativebridge").unwrap();

        assert!(script.starts_with("if (window.__nativebridge) {"));
        assert!(script.ends_with("\ntrue;"));
        let (handler, payload) = decode_script(&script);
        assert_eq!(handler, "handleBLEDeviceFound");
        assert_eq!(payload, json!({"id": "A", "name": "Sensor-A", "rssi": -40}));
    }

    #[test]
    fn test_data_payload_is_escaped() {
        let event = NativeEvent::BleDataReceived("it's \"quoted\"\n".into());
        let (_, payload) = decode_script(&event.to_script("__nativebridge").unwrap());
        assert_eq!(payload, json!("it's \"quoted\"\n"));
    }
}
