//! Generator lifecycle events.
//!
//! Other services subscribe to react to produced output, most notably the
//! playlist cache rebuilding from a fresh generator document.

use tokio::sync::broadcast;

use super::role::GeneratorRole;

/// Events broadcast by managed generators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratorEvent {
    /// A new artifact was installed.
    ArtifactInstalled {
        role: GeneratorRole,
        source_url: String,
    },
    /// An execution without arguments finished and produced output.
    OutputProduced { role: GeneratorRole },
    /// An execution failed.
    ExecutionFailed { role: GeneratorRole, reason: String },
}

impl GeneratorEvent {
    /// Get a description of the event for logging.
    pub fn description(&self) -> String {
        match self {
            Self::ArtifactInstalled { role, source_url } => {
                format!("{role} artifact installed from {source_url}")
            }
            Self::OutputProduced { role } => format!("{role} generator produced output"),
            Self::ExecutionFailed { role, reason } => {
                format!("{role} generator failed: {reason}")
            }
        }
    }
}

/// Default channel capacity for generator events.
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Broadcaster for generator events.
#[derive(Clone)]
pub struct GeneratorEventBroadcaster {
    sender: broadcast::Sender<GeneratorEvent>,
}

impl GeneratorEventBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GeneratorEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; returns the number of receivers.
    pub fn publish(&self, event: GeneratorEvent) -> usize {
        tracing::debug!("Publishing generator event: {}", event.description());
        // send() returns Err if there are no receivers, which is fine
        self.sender.send(event).unwrap_or(0)
    }
}

impl Default for GeneratorEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
