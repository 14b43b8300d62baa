//! Fan-out of state mutations to connected editors.
//!
//! Every committed mutation is mirrored as one text line; the websocket
//! layer forwards them verbatim. Stateless: subscribers joining late get a
//! fresh snapshot from the session instead of history.

use tokio::sync::broadcast;
use tracing::trace;

const CHANNEL_DEPTH: usize = 512;

/// Clonable sender handle; dropping every subscriber is fine.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<String>,
}

impl Broadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_DEPTH);
        Self { tx }
    }

    /// Mirror one mutation. Lagging or absent subscribers are not an error.
    pub fn send(&self, msg: impl Into<String>) {
        let msg = msg.into();
        trace!(%msg, "broadcast");
        let _ = self.tx.send(msg);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}
