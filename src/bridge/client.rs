//! In-page client module
//!
//! The page-side half of the bridge. Turns promise-based calls into
//! [`super::protocol::Request`] messages, settles them from
//! `handleNativeResponse` and rejects a call with a `Timeout` error when no
//! response arrives in time. Injecting it twice is harmless: a client of the
//! same version already present is left in place.

use crate::domain::settings::BridgeSettings;

pub const CLIENT_VERSION: &str = "1.0.0";

const TEMPLATE: &str = include_str!("../../assets/bridge_client.js");

/// Render the client for injection after a page load
pub fn client_script(settings: &BridgeSettings) -> String {
    let mut script = TEMPLATE
        .replace("__GLOBAL__", &settings.global_name)
        .replace("__TIMEOUT_MS__", &settings.client_timeout_ms.to_string())
        .replace("__BRIDGE_VERSION__", CLIENT_VERSION);
    script.push_str("\ntrue;");
    script
}
