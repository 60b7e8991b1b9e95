//! Playlist rebuild events.

use tokio::sync::broadcast;

/// Events broadcast by the playlist cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistEvent {
    /// A new entry was published.
    Rebuilt { source_key: String, channels: usize },
    /// Every attempt failed; the previous entry is still served.
    RebuildFailed { source_key: String, reason: String },
}

impl PlaylistEvent {
    pub fn description(&self) -> String {
        match self {
            Self::Rebuilt {
                source_key,
                channels,
            } => format!("Playlist rebuilt from {source_key} ({channels} channels)"),
            Self::RebuildFailed { source_key, reason } => {
                format!("Playlist rebuild from {source_key} failed: {reason}")
            }
        }
    }
}

const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Broadcaster for playlist events.
#[derive(Clone)]
pub struct PlaylistEventBroadcaster {
    sender: broadcast::Sender<PlaylistEvent>,
}

impl PlaylistEventBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaylistEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: PlaylistEvent) -> usize {
        tracing::debug!("Publishing playlist event: {}", event.description());
        self.sender.send(event).unwrap_or(0)
    }
}

impl Default for PlaylistEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
