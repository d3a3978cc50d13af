//! Permission Service
//!
//! Query/request façade over the platform permission API. Each capability
//! maps to one or more concrete platform permissions; a capability counts as
//! granted only when every one of them is granted. Backend failures are
//! logged and reported as "not granted". There is no retry.

use crate::domain::error::NativeError;
use crate::domain::models::Capability;
use crate::domain::settings::{Os, PlatformSettings};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Concrete platform permission identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    IosLocationWhenInUse,
    IosLocationAlways,
    IosBluetoothPeripheral,
    IosCamera,
    IosPhotoLibrary,
    AndroidAccessFineLocation,
    AndroidAccessBackgroundLocation,
    AndroidBluetoothScan,
    AndroidBluetoothConnect,
    AndroidCamera,
    AndroidReadExternalStorage,
    AndroidPostNotifications,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Limited,
    Denied,
    Blocked,
    Unavailable,
}

/// Native permission primitives
#[async_trait]
pub trait PermissionBackend: Send + Sync {
    /// Read the current status without prompting
    async fn check(&self, permission: Permission) -> Result<PermissionStatus, NativeError>;
    /// Ask for the permission, possibly showing a system prompt
    async fn request(&self, permission: Permission) -> Result<PermissionStatus, NativeError>;
}

/// Platform permissions backing a capability. An empty list means the
/// capability needs no runtime grant on this platform.
pub fn permissions_for(capability: Capability, platform: &PlatformSettings) -> Vec<Permission> {
    use Permission::*;

    match (platform.os, capability) {
        (Os::Ios, Capability::Location) => vec![IosLocationWhenInUse],
        (Os::Ios, Capability::BackgroundLocation) => vec![IosLocationAlways],
        (Os::Ios, Capability::Bluetooth) => vec![IosBluetoothPeripheral],
        (Os::Ios, Capability::Camera) => vec![IosCamera],
        (Os::Ios, Capability::PhotoLibrary) => vec![IosPhotoLibrary],
        // Notification authorisation on iOS goes through the push layer
        (Os::Ios, Capability::Notifications) => vec![],

        (Os::Android, Capability::Location) => vec![AndroidAccessFineLocation],
        (Os::Android, Capability::BackgroundLocation) => vec![AndroidAccessBackgroundLocation],
        (Os::Android, Capability::Bluetooth) if platform.api_level >= 31 => {
            vec![AndroidBluetoothScan, AndroidBluetoothConnect]
        }
        (Os::Android, Capability::Bluetooth) => vec![AndroidAccessFineLocation],
        (Os::Android, Capability::Camera) => vec![AndroidCamera],
        (Os::Android, Capability::PhotoLibrary) => vec![AndroidReadExternalStorage],
        (Os::Android, Capability::Notifications) if platform.api_level >= 33 => {
            vec![AndroidPostNotifications]
        }
        (Os::Android, Capability::Notifications) => vec![],
    }
}

#[derive(Clone)]
pub struct PermissionService {
    backend: Arc<dyn PermissionBackend>,
    platform: PlatformSettings,
}

impl PermissionService {
    pub fn new(backend: Arc<dyn PermissionBackend>, platform: PlatformSettings) -> Self {
        Self { backend, platform }
    }

    /// Non-mutating status query; never prompts
    pub async fn check(&self, capability: Capability) -> bool {
        for permission in permissions_for(capability, &self.platform) {
            match self.backend.check(permission).await {
                Ok(PermissionStatus::Granted) => {}
                Ok(status) => {
                    debug!("{:?} is {:?}", permission, status);
                    return false;
                }
                Err(e) => {
                    error!("Check {} permission error: {}", capability, e);
                    return false;
                }
            }
        }
        true
    }

    /// Request every constituent permission; granted only if all are granted.
    /// A refusal does not stop the remaining requests.
    pub async fn request(&self, capability: Capability) -> bool {
        let mut granted = true;
        for permission in permissions_for(capability, &self.platform) {
            match self.backend.request(permission).await {
                Ok(PermissionStatus::Granted) => {}
                Ok(status) => {
                    info!("{:?} request answered with {:?}", permission, status);
                    granted = false;
                }
                Err(e) => {
                    error!("Request {} permission error: {}", capability, e);
                    granted = false;
                }
            }
        }
        granted
    }

    pub async fn check_location_permission(&self) -> bool {
        self.check(Capability::Location).await
    }

    pub async fn request_location_permission(&self) -> bool {
        self.request(Capability::Location).await
    }

    pub async fn check_background_location_permission(&self) -> bool {
        self.check(Capability::BackgroundLocation).await
    }

    pub async fn request_background_location_permission(&self) -> bool {
        self.request(Capability::BackgroundLocation).await
    }

    pub async fn check_bluetooth_permission(&self) -> bool {
        self.check(Capability::Bluetooth).await
    }

    pub async fn request_bluetooth_permission(&self) -> bool {
        self.request(Capability::Bluetooth).await
    }

    pub async fn check_camera_permission(&self) -> bool {
        self.check(Capability::Camera).await
    }

    pub async fn request_camera_permission(&self) -> bool {
        self.request(Capability::Camera).await
    }

    pub async fn check_photo_library_permission(&self) -> bool {
        self.check(Capability::PhotoLibrary).await
    }

    pub async fn request_photo_library_permission(&self) -> bool {
        self.request(Capability::PhotoLibrary).await
    }

    pub async fn check_notification_permission(&self) -> bool {
        self.check(Capability::Notifications).await
    }

    pub async fn request_notification_permission(&self) -> bool {
        self.request(Capability::Notifications).await
    }

    pub fn platform(&self) -> &PlatformSettings {
        &self.platform
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::simulated::SimulatedPermissions;

    fn android(api_level: u32) -> PlatformSettings {
        PlatformSettings {
            os: Os::Android,
            api_level,
        }
    }

    #[test]
    fn test_bluetooth_permissions_depend_on_api_level() {
        assert_eq!(
            permissions_for(Capability::Bluetooth, &android(31)),
            vec![Permission::AndroidBluetoothScan, Permission::AndroidBluetoothConnect]
        );
        assert_eq!(
            permissions_for(Capability::Bluetooth, &android(30)),
            vec![Permission::AndroidAccessFineLocation]
        );
    }

    #[tokio::test]
    async fn test_bluetooth_requires_every_constituent() {
        let backend = Arc::new(SimulatedPermissions::new());
        backend.set_request_result(Permission::AndroidBluetoothScan, PermissionStatus::Granted);
        backend.set_request_result(Permission::AndroidBluetoothConnect, PermissionStatus::Denied);
        let service = PermissionService::new(backend.clone(), android(33));

        assert!(!service.request_bluetooth_permission().await);
        assert_eq!(
            backend.requested(),
            vec![Permission::AndroidBluetoothScan, Permission::AndroidBluetoothConnect]
        );

        backend.set_request_result(Permission::AndroidBluetoothConnect, PermissionStatus::Granted);
        assert!(service.request_bluetooth_permission().await);
    }

    #[tokio::test]
    async fn test_check_never_prompts() {
        let backend = Arc::new(SimulatedPermissions::new());
        let service = PermissionService::new(backend.clone(), android(33));

        assert!(!service.check_camera_permission().await);
        assert!(backend.requested().is_empty());
    }

    #[tokio::test]
    async fn test_backend_error_reads_as_denied() {
        let backend = Arc::new(SimulatedPermissions::new());
        backend.fail_with("permission module unavailable");
        let service = PermissionService::new(backend, android(33));

        assert!(!service.request_location_permission().await);
        assert!(!service.check_location_permission().await);
    }

    #[tokio::test]
    async fn test_ios_notifications_need_no_runtime_grant() {
        let backend = Arc::new(SimulatedPermissions::new());
        let platform = PlatformSettings {
            os: Os::Ios,
            api_level: 0,
        };
        let service = PermissionService::new(backend, platform);

        assert!(service.check_notification_permission().await);
    }
}
