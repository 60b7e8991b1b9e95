use std::sync::Arc;

use tracing::{info, warn};

use tvcast::api::{ApiServer, ApiServerConfig, AppState};
use tvcast::config::AppConfig;
use tvcast::logging::init_logging;
use tvcast::playlist::{PlaylistSource, RebuildOptions};
use tvcast::services::ServiceContainer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;

    // Keep the guard alive so buffered log lines are flushed on exit.
    let (logging, _log_guard) = init_logging(&config.log_dir)?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting tvcast");

    let bind_address = config.bind_address.clone();
    let initial_playlist = config.initial_playlist_url.clone();

    let services = Arc::new(ServiceContainer::new(config).await?.with_logging(logging));
    services.start();

    if let Some(url) = initial_playlist {
        let services = Arc::clone(&services);
        tokio::spawn(async move {
            if let Err(e) = services
                .playlist
                .rebuild(PlaylistSource::Url(url), RebuildOptions::default())
                .await
            {
                warn!(error = %e, "Initial playlist load failed");
            }
        });
    }

    let server = ApiServer::new(
        ApiServerConfig {
            bind_address,
            enable_cors: true,
        },
        AppState::new(Arc::clone(&services)),
    );

    let cancel = server.cancel_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
        cancel.cancel();
    });

    server.run().await?;
    services.shutdown().await?;

    info!("tvcast stopped");
    Ok(())
}
