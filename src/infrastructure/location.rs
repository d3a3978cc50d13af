//! Location Service
//!
//! Single-shot position queries and one continuous tracking stream. The
//! location permission is checked (and requested) on first use only.

use crate::domain::error::{BridgeError, NativeError};
use crate::domain::models::{now_millis, Capability, LocationSample};
use crate::domain::settings::{LocationSettings, Os};
use crate::domain::subscription::{lock, Listeners, Subscription};
use crate::infrastructure::permissions::PermissionService;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, Weak};
use tracing::{error, info, warn};

/// Raw reading from the platform provider
#[derive(Debug, Clone, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub coords: Coordinates,
    /// Unix milliseconds, if the provider reports one
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

pub type PositionHandler = Arc<dyn Fn(Result<Position, NativeError>) + Send + Sync>;

/// Native geolocation primitives
#[async_trait]
pub trait Geolocation: Send + Sync {
    async fn current_position(&self, options: &LocationSettings) -> Result<Position, NativeError>;
    fn watch_position(
        &self,
        options: &LocationSettings,
        handler: PositionHandler,
    ) -> Result<WatchId, NativeError>;
    fn clear_watch(&self, watch: WatchId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackingState {
    Idle,
    Starting,
    Watching(WatchId),
}

struct LocationInner {
    geolocation: Arc<dyn Geolocation>,
    permissions: PermissionService,
    options: LocationSettings,
    tracking: Mutex<TrackingState>,
    location_listeners: Listeners<LocationSample>,
    error_listeners: Listeners<String>,
}

#[derive(Clone)]
pub struct LocationService {
    inner: Arc<LocationInner>,
}

impl LocationService {
    pub fn new(
        geolocation: Arc<dyn Geolocation>,
        permissions: PermissionService,
        options: LocationSettings,
    ) -> Self {
        Self {
            inner: Arc::new(LocationInner {
                geolocation,
                permissions,
                options,
                tracking: Mutex::new(TrackingState::Idle),
                location_listeners: Listeners::new(),
                error_listeners: Listeners::new(),
            }),
        }
    }

    /// Resolve one position fix
    pub async fn get_current_location(&self) -> Result<LocationSample, BridgeError> {
        let result = match self.ensure_permission().await {
            Ok(()) => self
                .inner
                .geolocation
                .current_position(&self.inner.options)
                .await
                .map(normalize)
                .map_err(BridgeError::from),
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            error!("Get current location error: {}", e);
            self.inner.error_listeners.notify(&e.to_string());
        }
        result
    }

    /// Start the tracking stream. A second call while tracking is a no-op.
    pub async fn start_tracking(&self) -> Result<(), BridgeError> {
        {
            let mut state = lock(&self.inner.tracking);
            if *state != TrackingState::Idle {
                warn!("Location tracking already active");
                return Ok(());
            }
            *state = TrackingState::Starting;
        }

        match self.start_watch().await {
            Ok(watch) => {
                let mut state = lock(&self.inner.tracking);
                if *state == TrackingState::Starting {
                    *state = TrackingState::Watching(watch);
                    info!("Location tracking started");
                } else {
                    // stop_tracking ran while we were waiting on the permission prompt
                    drop(state);
                    self.inner.geolocation.clear_watch(watch);
                }
                Ok(())
            }
            Err(e) => {
                let mut state = lock(&self.inner.tracking);
                if *state == TrackingState::Starting {
                    *state = TrackingState::Idle;
                }
                drop(state);
                error!("Start location tracking error: {}", e);
                self.inner.error_listeners.notify(&e.to_string());
                Err(e)
            }
        }
    }

    async fn start_watch(&self) -> Result<WatchId, BridgeError> {
        self.ensure_permission().await?;

        if self.inner.permissions.platform().os == Os::Ios
            && !self.inner.permissions.check_background_location_permission().await
        {
            warn!("Background location permission not granted (iOS)");
        }

        let weak: Weak<LocationInner> = Arc::downgrade(&self.inner);
        let handler: PositionHandler = Arc::new(move |reading: Result<Position, NativeError>| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match reading {
                Ok(position) => inner.location_listeners.notify(&normalize(position)),
                Err(e) => {
                    error!("Location tracking error: {}", e);
                    inner.error_listeners.notify(&e.message);
                }
            }
        });

        let watch = self
            .inner
            .geolocation
            .watch_position(&self.inner.options, handler)?;
        Ok(watch)
    }

    /// Stop the tracking stream; a no-op when not tracking
    pub fn stop_tracking(&self) {
        let previous = std::mem::replace(&mut *lock(&self.inner.tracking), TrackingState::Idle);
        if let TrackingState::Watching(watch) = previous {
            self.inner.geolocation.clear_watch(watch);
            info!("Location tracking stopped");
        }
    }

    pub fn is_tracking(&self) -> bool {
        matches!(*lock(&self.inner.tracking), TrackingState::Watching(_))
    }

    pub fn subscribe_to_location_updates<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&LocationSample) + Send + Sync + 'static,
    {
        self.inner.location_listeners.subscribe(listener)
    }

    pub fn subscribe_to_location_errors<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&String) + Send + Sync + 'static,
    {
        self.inner.error_listeners.subscribe(listener)
    }

    /// Stop tracking and drop every listener
    pub fn cleanup(&self) {
        self.stop_tracking();
        self.inner.location_listeners.clear();
        self.inner.error_listeners.clear();
    }

    async fn ensure_permission(&self) -> Result<(), BridgeError> {
        let permissions = &self.inner.permissions;
        if permissions.check_location_permission().await
            || permissions.request_location_permission().await
        {
            Ok(())
        } else {
            Err(BridgeError::PermissionDenied {
                capability: Capability::Location,
            })
        }
    }
}

/// Map a provider reading onto the canonical sample shape
fn normalize(position: Position) -> LocationSample {
    let finite = |value: Option<f64>| value.filter(|v| v.is_finite());
    let Position { coords, timestamp } = position;

    LocationSample {
        latitude: coords.latitude,
        longitude: coords.longitude,
        accuracy: coords.accuracy,
        altitude: finite(coords.altitude),
        speed: finite(coords.speed),
        heading: finite(coords.heading),
        timestamp: timestamp.filter(|t| *t > 0).unwrap_or_else(now_millis),
    }
}
