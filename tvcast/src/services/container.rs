//! Service container for dependency injection.
//!
//! The ServiceContainer holds references to all application services
//! and manages their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::config::{AddonConfig, AppConfig};
use crate::generator::{GeneratorEvent, GeneratorRegistry, GeneratorRole, GeneratorStatus};
use crate::logging::LoggingConfig;
use crate::playlist::{
    IngestionClient, M3uParser, PlaylistCache, PlaylistSource, PlaylistStatus, RebuildOptions,
    RebuildOutcome,
};
use crate::resolution::{ResolutionCache, ResolutionService, ResolutionStatus};
use crate::utils::http_client::build_http_client;

/// Default shutdown timeout.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Service container holding all application services.
pub struct ServiceContainer {
    pub config: AppConfig,
    /// Shared HTTP client.
    pub http: reqwest::Client,
    /// Playlist and resolver generators.
    pub generators: Arc<GeneratorRegistry>,
    pub playlist: Arc<PlaylistCache>,
    pub resolution: Arc<ResolutionService>,
    logging: Option<Arc<LoggingConfig>>,
    /// Background tasks started by `start`.
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Cancellation token for graceful shutdown.
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Build every service from `config`.
    ///
    /// Creates the data directory and removes temporary artifact files left
    /// by an interrupted install.
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("Initializing service container");

        GeneratorRegistry::prepare(&config.generator).await?;

        let http = build_http_client(&config.user_agent, config.http_timeout);
        let cancellation_token = CancellationToken::new();

        let generators = Arc::new(GeneratorRegistry::new(
            &config.generator,
            http.clone(),
            cancellation_token.child_token(),
        ));

        let fetcher = IngestionClient::new(http.clone())
            .with_generator(Arc::clone(generators.playlist()));
        let playlist = Arc::new(PlaylistCache::new(
            config.playlist.clone(),
            Arc::new(fetcher),
            Arc::new(M3uParser),
        ));

        let resolution = Arc::new(ResolutionService::new(
            ResolutionCache::new(config.resolution.ttl),
            generators.resolver().clone(),
            Arc::clone(&playlist),
        ));

        if let Some(url) = &config.initial_playlist_url {
            playlist.set_source(PlaylistSource::Url(url.clone()));
        }

        info!("Service container initialized");

        Ok(Self {
            config,
            http,
            generators,
            playlist,
            resolution,
            logging: None,
            tasks: Mutex::new(Vec::new()),
            cancellation_token,
        })
    }

    /// Attach the logging handle so its retention task runs with the
    /// container.
    pub fn with_logging(mut self, logging: Arc<LoggingConfig>) -> Self {
        self.logging = Some(logging);
        self
    }

    pub fn logging(&self) -> Option<&Arc<LoggingConfig>> {
        self.logging.as_ref()
    }

    /// Start background work: playlist refresh, the generator event
    /// listener, resolution cache cleanup and log retention.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        tasks.push(
            self.playlist
                .start_background_refresh(self.cancellation_token.child_token()),
        );
        tasks.push(self.spawn_generator_listener());
        tasks.push(self.spawn_resolution_cleanup());
        if let Some(logging) = &self.logging {
            tasks.push(logging.start_retention_cleanup(self.cancellation_token.child_token()));
        }
        info!(tasks = tasks.len(), "Background services started");
    }

    /// Rebuild the playlist whenever the playlist generator produces a new
    /// document and the catalog is sourced from it.
    fn spawn_generator_listener(&self) -> JoinHandle<()> {
        let playlist = Arc::clone(&self.playlist);
        let mut receiver = self.generators.events().subscribe();
        let cancellation_token = self.cancellation_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        debug!("Generator event handler shutting down");
                        break;
                    }
                    result = receiver.recv() => {
                        match result {
                            Ok(GeneratorEvent::OutputProduced { role: GeneratorRole::Playlist }) => {
                                if playlist.configured_source() != Some(PlaylistSource::GeneratorOutput) {
                                    continue;
                                }
                                if let Err(e) = playlist
                                    .rebuild(PlaylistSource::GeneratorOutput, RebuildOptions::forced())
                                    .await
                                {
                                    warn!(error = %e, "Failed to rebuild playlist from generator output");
                                }
                            }
                            Ok(event) => debug!("Generator event: {}", event.description()),
                            Err(RecvError::Lagged(skipped)) => {
                                warn!(skipped, "Generator event handler lagged");
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                }
            }
        })
    }

    fn spawn_resolution_cleanup(&self) -> JoinHandle<()> {
        let resolution = Arc::clone(&self.resolution);
        let cancellation_token = self.cancellation_token.clone();
        let period = resolution.cache().ttl().max(Duration::from_secs(1));

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => break,
                    _ = tokio::time::sleep(period) => {
                        let removed = resolution.cache().cleanup_expired();
                        if removed > 0 {
                            debug!(removed, "Evicted expired resolutions");
                        }
                    }
                }
            }
        })
    }

    /// Apply a per-user addon configuration.
    ///
    /// A playlist generator script takes precedence over a playlist URL.
    /// Each step is independent; failures are collected in the report
    /// instead of aborting the remaining steps.
    pub async fn apply_addon_config(&self, addon: &AddonConfig) -> ConfigureReport {
        let mut report = ConfigureReport::default();

        if let Some(script_url) = &addon.python_script_url {
            self.configure_playlist_generator(addon, script_url, &mut report)
                .await;
        } else if let Some(m3u) = &addon.m3u {
            let source = PlaylistSource::Url(m3u.clone());
            match self.playlist.rebuild(source, RebuildOptions::default()).await {
                Ok(RebuildOutcome::Rebuilt(_)) => report.done("playlist rebuilt"),
                Ok(RebuildOutcome::Skipped(_)) => report.done("playlist unchanged"),
                Ok(RebuildOutcome::Superseded(_)) => report.superseded(),
                Err(e) => report.failed("playlist", e),
            }
        }

        if addon.resolver_enabled {
            if let Some(script_url) = &addon.resolver_script {
                self.configure_resolver(addon, script_url, &mut report).await;
            }
        }

        info!(
            applied = report.applied.len(),
            errors = report.errors.len(),
            "Addon configuration applied"
        );
        report
    }

    async fn configure_playlist_generator(
        &self,
        addon: &AddonConfig,
        script_url: &str,
        report: &mut ConfigureReport,
    ) {
        let generator = self.generators.playlist();

        if generator.source_url().as_deref() != Some(script_url) {
            if let Err(e) = generator.acquire(script_url).await {
                report.failed("generator download", e);
                return;
            }
            report.done("generator script installed");
        }

        self.playlist.set_source(PlaylistSource::GeneratorOutput);
        match generator.execute(&[]).await {
            Ok(_) => report.done("generator executed"),
            Err(e) if e.is_already_running() => report.done("generator already running"),
            Err(e) => report.failed("generator execution", e),
        }

        match self
            .playlist
            .rebuild(PlaylistSource::GeneratorOutput, RebuildOptions::forced())
            .await
        {
            Ok(RebuildOutcome::Superseded(_)) => report.superseded(),
            Ok(_) => report.done("playlist rebuilt from generator output"),
            Err(e) => report.failed("playlist", e),
        }

        if let Some(interval) = addon.python_update_interval {
            generator.schedule(interval);
            report.done(format!("generator scheduled every {interval}"));
        }
    }

    async fn configure_resolver(
        &self,
        addon: &AddonConfig,
        script_url: &str,
        report: &mut ConfigureReport,
    ) {
        let resolver = self.generators.resolver();

        if resolver.source_url().as_deref() != Some(script_url) {
            match resolver.acquire(script_url).await {
                Ok(()) => {
                    report.done("resolver script installed");
                    self.resolution.clear_cache();
                }
                Err(e) => {
                    report.failed("resolver download", e);
                    return;
                }
            }
        }

        match resolver.validate().await {
            Ok(true) => report.done("resolver health check passed"),
            Ok(false) => report.errors.push(format!(
                "resolver health check failed: {}",
                resolver.status().last_error.unwrap_or_default()
            )),
            Err(e) => report.failed("resolver health check", e),
        }

        if let Some(interval) = addon.resolver_update_interval {
            resolver.schedule(interval);
            report.done(format!("resolver scheduled every {interval}"));
        }
    }

    /// Shutdown all services gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Shutdown all services gracefully with a custom timeout.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        info!("Shutting down services (timeout: {:?})", timeout);

        // Signal all background tasks to stop
        self.cancellation_token.cancel();
        self.generators.shutdown();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        let shutdown_result = tokio::time::timeout(timeout, futures::future::join_all(tasks)).await;

        if shutdown_result.is_err() {
            warn!("Shutdown timeout reached, forcing shutdown");
        }

        info!("Services shut down");
        Ok(())
    }

    /// Get the cancellation token for external use.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Check if shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            generators: self.generators.statuses(),
            playlist: self.playlist.status(),
            resolution: self.resolution.status(),
        }
    }
}

/// What `apply_addon_config` did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigureReport {
    pub applied: Vec<String>,
    pub errors: Vec<String>,
}

impl ConfigureReport {
    fn done(&mut self, step: impl Into<String>) {
        self.applied.push(step.into());
    }

    fn failed(&mut self, step: &str, error: crate::Error) {
        warn!(step, error = %error, "Configuration step failed");
        self.errors.push(format!("{step}: {error}"));
    }

    /// A later rebuild for another source was published instead.
    fn superseded(&mut self) {
        warn!("Playlist rebuild superseded by a newer request");
        self.errors
            .push("playlist: superseded by a newer rebuild of another source".to_string());
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Service statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub generators: Vec<GeneratorStatus>,
    pub playlist: PlaylistStatus,
    pub resolution: ResolutionStatus,
}
