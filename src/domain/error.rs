use crate::domain::models::{Capability, ConnectionState};
use thiserror::Error;

/// Failure reported by a native capability port.
///
/// The message is the platform's own text and is forwarded to the page
/// unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct NativeError {
    pub message: String,
}

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Coarse classification of a [`BridgeError`], used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PermissionDenied,
    DeviceNotConnected,
    AlreadyConnected,
    MethodNotFound,
    InvalidParams,
    MalformedMessage,
    NativeOperationFailed,
    Internal,
}

/// Error type shared by the capability services and the dispatcher.
///
/// The `Display` text is exactly what the page receives in a failed
/// response's `error` field.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("{capability} permission denied")]
    PermissionDenied { capability: Capability },

    #[error("Device not connected")]
    DeviceNotConnected,

    #[error("Device {device_id} is already {state}")]
    AlreadyConnected {
        device_id: String,
        state: ConnectionState,
    },

    #[error("Connection to {device_id} was aborted")]
    ConnectionAborted { device_id: String },

    #[error("Method not found")]
    MethodNotFound,

    #[error("{0}")]
    InvalidParams(String),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error(transparent)]
    Native(#[from] NativeError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::DeviceNotConnected => ErrorKind::DeviceNotConnected,
            Self::AlreadyConnected { .. } => ErrorKind::AlreadyConnected,
            Self::MethodNotFound => ErrorKind::MethodNotFound,
            Self::InvalidParams(_) => ErrorKind::InvalidParams,
            Self::MalformedMessage(_) => ErrorKind::MalformedMessage,
            Self::ConnectionAborted { .. } | Self::Native(_) => ErrorKind::NativeOperationFailed,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}
