//! Owner of the two generator instances.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::GeneratorConfig;
use crate::utils::fs;

use super::events::GeneratorEventBroadcaster;
use super::managed::ManagedGenerator;
use super::role::GeneratorRole;
use super::state::GeneratorStatus;

/// Holds the playlist and resolver generators.
///
/// Both share one HTTP client, one event channel and one root cancellation
/// token; cancelling the token stops every installed schedule.
pub struct GeneratorRegistry {
    playlist: Arc<ManagedGenerator>,
    resolver: Arc<ManagedGenerator>,
    events: GeneratorEventBroadcaster,
    cancellation_token: CancellationToken,
}

impl GeneratorRegistry {
    pub fn new(
        config: &GeneratorConfig,
        http: reqwest::Client,
        cancellation_token: CancellationToken,
    ) -> Self {
        let events = GeneratorEventBroadcaster::new();
        let build = |role| {
            Arc::new(ManagedGenerator::new(
                role,
                config.clone(),
                http.clone(),
                cancellation_token.child_token(),
                events.clone(),
            ))
        };

        Self {
            playlist: build(GeneratorRole::Playlist),
            resolver: build(GeneratorRole::Resolver),
            events,
            cancellation_token,
        }
    }

    /// Create the data directory and drop temp files left by an interrupted
    /// install.
    pub async fn prepare(config: &GeneratorConfig) -> crate::Result<()> {
        fs::ensure_dir_all_with_op("creating data directory", &config.data_dir).await?;
        let removed = fs::cleanup_temp_files(&config.data_dir).await?;
        if removed > 0 {
            info!(removed, "Removed stale temporary artifacts");
        }
        Ok(())
    }

    pub fn get(&self, role: GeneratorRole) -> &Arc<ManagedGenerator> {
        match role {
            GeneratorRole::Playlist => &self.playlist,
            GeneratorRole::Resolver => &self.resolver,
        }
    }

    pub fn playlist(&self) -> &Arc<ManagedGenerator> {
        &self.playlist
    }

    pub fn resolver(&self) -> &Arc<ManagedGenerator> {
        &self.resolver
    }

    pub fn events(&self) -> &GeneratorEventBroadcaster {
        &self.events
    }

    pub fn statuses(&self) -> Vec<GeneratorStatus> {
        GeneratorRole::ALL
            .iter()
            .map(|role| self.get(*role).status())
            .collect()
    }

    /// Stop every schedule.
    pub fn shutdown(&self) {
        for role in GeneratorRole::ALL {
            self.get(role).cancel_schedule();
        }
        self.cancellation_token.cancel();
        info!("Generator schedules stopped");
    }
}
