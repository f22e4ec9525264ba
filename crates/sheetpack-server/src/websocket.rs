//! WebSocket-based hot module replacement.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Messages sent to clients for hot reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HmrMessage {
    /// Connection established
    Connected,

    /// Full page reload
    Reload,

    /// Replace module factories
    Update {
        /// Linked module bodies keyed by module id
        modules: BTreeMap<String, String>,
    },

    /// Reload the stylesheet
    CssUpdate {
        /// Path of the stylesheet, e.g. `/bundle.css`
        href: String,
    },

    /// The last rebuild failed
    Error {
        message: String,
    },
}

/// Hub for broadcasting HMR messages to all connected clients.
#[derive(Debug, Clone)]
pub struct HmrHub {
    sender: broadcast::Sender<HmrMessage>,
}

impl HmrHub {
    /// Create a new HMR hub.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    /// Send a message to all connected clients.
    pub fn send(&self, msg: HmrMessage) {
        // No receivers is fine
        let _ = self.sender.send(msg);
    }

    /// Subscribe to HMR messages.
    pub fn subscribe(&self) -> broadcast::Receiver<HmrMessage> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Wait for the next message for one client. A client that fell behind
/// lost updates it cannot replay, so it is told to reload. `None` once the
/// hub is gone.
pub async fn next_message(rx: &mut broadcast::Receiver<HmrMessage>) -> Option<HmrMessage> {
    match rx.recv().await {
        Ok(message) => Some(message),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            tracing::warn!("HMR client missed {} updates, forcing reload", skipped);
            Some(HmrMessage::Reload)
        }
        Err(broadcast::error::RecvError::Closed) => None,
    }
}

impl Default for HmrHub {
    fn default() -> Self {
        Self::new()
    }
}
