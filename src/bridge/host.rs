//! Browser host seam
//!
//! The embedded browser view delivers page messages to the dispatcher and
//! runs the scripts the dispatcher hands back. Only script injection is
//! modelled here; inbound messages arrive through `Dispatcher::handle`.

use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("browser view is not attached")]
    Detached,

    #[error("script injection failed: {0}")]
    Injection(String),
}

pub trait BrowserHost: Send + Sync {
    /// Evaluate `script` in the page context. Fire-and-forget.
    fn inject_script(&self, script: &str) -> Result<(), HostError>;
}

/// Host that forwards every injected script to a channel
pub struct ChannelHost {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelHost {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl BrowserHost for ChannelHost {
    fn inject_script(&self, script: &str) -> Result<(), HostError> {
        self.tx
            .send(script.to_string())
            .map_err(|_| HostError::Detached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_channel_reports_detached() {
        let (host, rx) = ChannelHost::new();
        host.inject_script("true;").unwrap();
        drop(rx);
        assert!(matches!(host.inject_script("true;"), Err(HostError::Detached)));
    }
}
