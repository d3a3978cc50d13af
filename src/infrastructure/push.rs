//! Push-Token Service
//!
//! Holds the current push token for the process. The token is fetched on
//! the first `initialize()`, replaced in place on every native rotation and
//! dropped on `cleanup()`.

use crate::domain::error::{BridgeError, NativeError};
use crate::domain::models::{now_millis, PushMessage, PushToken};
use crate::domain::settings::Os;
use crate::domain::subscription::{lock, Listeners, Subscription};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    NotDetermined,
    Denied,
    Authorized,
    Provisional,
}

pub type TokenHandler = Arc<dyn Fn(String) + Send + Sync>;
pub type MessageHandler = Arc<dyn Fn(PushMessage) + Send + Sync>;

/// Native push-messaging registration
#[async_trait]
pub trait PushMessaging: Send + Sync {
    async fn request_permission(&self) -> Result<AuthorizationStatus, NativeError>;
    async fn get_token(&self) -> Result<String, NativeError>;
    fn on_token_refresh(&self, handler: TokenHandler) -> Subscription;
    /// Messages arriving while the app is in the foreground
    fn on_message(&self, handler: MessageHandler) -> Subscription;
    /// Notification tapped while the app was in the background
    fn on_notification_opened_app(&self, handler: MessageHandler) -> Subscription;
    /// Notification that launched the app from a terminated state
    async fn initial_notification(&self) -> Result<Option<PushMessage>, NativeError>;
}

/// Displays a local notification
pub trait NotificationPresenter: Send + Sync {
    fn show_notification(&self, title: &str, body: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Initializing,
    Ready,
}

struct PushState {
    lifecycle: Lifecycle,
    token: Option<PushToken>,
    native: Vec<Subscription>,
    initial_checked: bool,
}

struct PushInner {
    messaging: Arc<dyn PushMessaging>,
    presenter: Arc<dyn NotificationPresenter>,
    os: Os,
    state: Mutex<PushState>,
    token_listeners: Listeners<String>,
    message_listeners: Listeners<PushMessage>,
    tap_listeners: Listeners<PushMessage>,
}

impl PushInner {
    fn store_token(&self, token: String) {
        lock(&self.state).token = Some(PushToken {
            token,
            acquired_at: now_millis(),
        });
    }

    fn handle_foreground(&self, message: PushMessage) {
        debug!("Foreground message received: {:?}", message.message_id);
        let title = message.title.as_deref().unwrap_or("Notification");
        let body = message.body.as_deref().unwrap_or("");
        self.presenter.show_notification(title, body);
        self.message_listeners.notify(&message);
    }

    fn handle_tap(&self, message: PushMessage) {
        info!("Handling notification tap with data: {:?}", message.data);
        self.tap_listeners.notify(&message);
    }
}

#[derive(Clone)]
pub struct PushTokenService {
    inner: Arc<PushInner>,
}

impl PushTokenService {
    pub fn new(
        messaging: Arc<dyn PushMessaging>,
        presenter: Arc<dyn NotificationPresenter>,
        os: Os,
    ) -> Self {
        Self {
            inner: Arc::new(PushInner {
                messaging,
                presenter,
                os,
                state: Mutex::new(PushState {
                    lifecycle: Lifecycle::Uninitialized,
                    token: None,
                    native: Vec::new(),
                    initial_checked: false,
                }),
                token_listeners: Listeners::new(),
                message_listeners: Listeners::new(),
                tap_listeners: Listeners::new(),
            }),
        }
    }

    /// Fetch the token and register native listeners. Idempotent.
    pub async fn initialize(&self) -> Result<(), BridgeError> {
        {
            let mut state = lock(&self.inner.state);
            if state.lifecycle != Lifecycle::Uninitialized {
                debug!("Push messaging already initialized");
                return Ok(());
            }
            state.lifecycle = Lifecycle::Initializing;
        }

        let (token, subscriptions) = match self.setup().await {
            Ok(registered) => registered,
            Err(e) => {
                error!("Push messaging initialization error: {}", e);
                let mut state = lock(&self.inner.state);
                if state.lifecycle == Lifecycle::Initializing {
                    state.lifecycle = Lifecycle::Uninitialized;
                }
                return Err(e);
            }
        };

        {
            let mut state = lock(&self.inner.state);
            if state.lifecycle != Lifecycle::Initializing {
                // cleanup() ran while the token request was pending
                drop(state);
                subscriptions.iter().for_each(Subscription::unsubscribe);
                return Ok(());
            }
            state.lifecycle = Lifecycle::Ready;
            state.native = subscriptions;
            // a rotation during setup already stored a newer token
            if state.token.is_none() {
                state.token = Some(token);
            }
        }

        self.check_initial_notification().await;
        info!("Push messaging initialized");
        Ok(())
    }

    async fn setup(&self) -> Result<(PushToken, Vec<Subscription>), BridgeError> {
        let messaging = &self.inner.messaging;

        if self.inner.os == Os::Ios {
            let status = messaging.request_permission().await?;
            if !matches!(
                status,
                AuthorizationStatus::Authorized | AuthorizationStatus::Provisional
            ) {
                warn!("iOS notification permissions not granted");
            }
        }

        let token = messaging.get_token().await?;
        debug!("Push token acquired ({} chars)", token.len());
        let token = PushToken {
            token,
            acquired_at: now_millis(),
        };

        let weak: Weak<PushInner> = Arc::downgrade(&self.inner);
        let foreground = {
            let weak = weak.clone();
            messaging.on_message(Arc::new(move |message: PushMessage| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_foreground(message);
                }
            }))
        };
        let opened = {
            let weak = weak.clone();
            messaging.on_notification_opened_app(Arc::new(move |message: PushMessage| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_tap(message);
                }
            }))
        };
        let refresh = messaging.on_token_refresh(Arc::new(move |token: String| {
            if let Some(inner) = weak.upgrade() {
                info!("Push token refreshed");
                inner.store_token(token.clone());
                inner.token_listeners.notify(&token);
            }
        }));

        Ok((token, vec![foreground, opened, refresh]))
    }

    /// Runs at most once per process, even across cleanup and re-initialize
    async fn check_initial_notification(&self) {
        {
            let mut state = lock(&self.inner.state);
            if state.initial_checked {
                return;
            }
            state.initial_checked = true;
        }

        match self.inner.messaging.initial_notification().await {
            Ok(Some(message)) => {
                info!("App launched from terminated state by a notification");
                self.inner.handle_tap(message);
            }
            Ok(None) => {}
            Err(e) => warn!("Initial notification check failed: {}", e),
        }
    }

    /// Current token, if one has been acquired
    pub fn token(&self) -> Option<String> {
        lock(&self.inner.state).token.as_ref().map(|t| t.token.clone())
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.inner.state).lifecycle == Lifecycle::Ready
    }

    pub fn subscribe_to_token_changes<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&String) + Send + Sync + 'static,
    {
        self.inner.token_listeners.subscribe(listener)
    }

    pub fn subscribe_to_messages<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&PushMessage) + Send + Sync + 'static,
    {
        self.inner.message_listeners.subscribe(listener)
    }

    pub fn subscribe_to_notification_taps<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&PushMessage) + Send + Sync + 'static,
    {
        self.inner.tap_listeners.subscribe(listener)
    }

    /// Unregister native listeners and forget the token
    pub fn cleanup(&self) {
        let native = {
            let mut state = lock(&self.inner.state);
            state.lifecycle = Lifecycle::Uninitialized;
            state.token = None;
            std::mem::take(&mut state.native)
        };
        native.iter().for_each(Subscription::unsubscribe);
        self.inner.token_listeners.clear();
        self.inner.message_listeners.clear();
        self.inner.tap_listeners.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::simulated::{RecordingPresenter, SimulatedMessaging};

    fn service(os: Os) -> (PushTokenService, Arc<SimulatedMessaging>, Arc<RecordingPresenter>) {
        let messaging = Arc::new(SimulatedMessaging::new("token-1"));
        let presenter = Arc::new(RecordingPresenter::default());
        let service = PushTokenService::new(messaging.clone(), presenter.clone(), os);
        (service, messaging, presenter)
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (service, messaging, _) = service(Os::Android);
        assert_eq!(service.token(), None);

        service.initialize().await.unwrap();
        service.initialize().await.unwrap();

        assert_eq!(service.token().as_deref(), Some("token-1"));
        assert_eq!(messaging.foreground_handlers(), 1);
        assert_eq!(messaging.token_requests(), 1);
    }

    #[tokio::test]
    async fn test_rotation_replaces_token() {
        let (service, messaging, _) = service(Os::Android);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = service.subscribe_to_token_changes(move |token| lock(&sink).push(token.clone()));

        service.initialize().await.unwrap();
        messaging.rotate_token("token-2");

        assert_eq!(service.token().as_deref(), Some("token-2"));
        assert_eq!(lock(&seen).as_slice(), ["token-2"]);
    }

    #[tokio::test]
    async fn test_foreground_message_is_shown_and_fanned_out() {
        let (service, messaging, presenter) = service(Os::Android);
        let seen = Arc::new(Mutex::new(0));
        let sink = seen.clone();
        let _sub = service.subscribe_to_messages(move |_| *lock(&sink) += 1);

        service.initialize().await.unwrap();
        messaging.deliver_foreground(PushMessage {
            body: Some("hello".to_string()),
            ..Default::default()
        });

        assert_eq!(
            presenter.shown(),
            vec![("Notification".to_string(), "hello".to_string())]
        );
        assert_eq!(*lock(&seen), 1);
    }

    #[tokio::test]
    async fn test_initial_notification_checked_once() {
        let (service, messaging, _) = service(Os::Ios);
        messaging.set_initial_notification(PushMessage {
            message_id: Some("launch".to_string()),
            ..Default::default()
        });
        let taps = Arc::new(Mutex::new(Vec::new()));
        let sink = taps.clone();
        let _sub = service.subscribe_to_notification_taps(move |message| {
            lock(&sink).push(message.message_id.clone());
        });

        service.initialize().await.unwrap();
        assert_eq!(lock(&taps).as_slice(), [Some("launch".to_string())]);

        service.cleanup();
        let sink = taps.clone();
        let _sub = service.subscribe_to_notification_taps(move |message| {
            lock(&sink).push(message.message_id.clone());
        });
        service.initialize().await.unwrap();

        assert_eq!(messaging.initial_checks(), 1);
        assert_eq!(messaging.permission_requests(), 2);
        assert_eq!(lock(&taps).len(), 1);
    }

    #[tokio::test]
    async fn test_background_tap_reaches_listeners() {
        let (service, messaging, presenter) = service(Os::Android);
        let taps = Arc::new(Mutex::new(Vec::new()));
        let sink = taps.clone();
        let _sub = service.subscribe_to_notification_taps(move |message| {
            lock(&sink).push(message.data.clone());
        });

        service.initialize().await.unwrap();
        let mut data = std::collections::HashMap::new();
        data.insert("screen".to_string(), "orders".to_string());
        messaging.open_notification(PushMessage {
            data: data.clone(),
            ..Default::default()
        });

        assert_eq!(lock(&taps).as_slice(), [data]);
        assert!(presenter.shown().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_during_token_request_wins() {
        let (service, messaging, _) = service(Os::Android);
        messaging.hold_token();

        let pending = tokio::spawn({
            let service = service.clone();
            async move { service.initialize().await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        service.cleanup();
        messaging.release_token();
        pending.await.unwrap().unwrap();

        assert_eq!(service.token(), None);
        assert!(!service.is_initialized());
        assert_eq!(messaging.foreground_handlers(), 0);

        service.initialize().await.unwrap();
        assert_eq!(service.token().as_deref(), Some("token-1"));
    }

    #[tokio::test]
    async fn test_cleanup_tears_down_listeners() {
        let (service, messaging, _) = service(Os::Android);
        service.initialize().await.unwrap();
        service.cleanup();

        assert_eq!(service.token(), None);
        assert!(!service.is_initialized());
        assert_eq!(messaging.foreground_handlers(), 0);
    }
}
