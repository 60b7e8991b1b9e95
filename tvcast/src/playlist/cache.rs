//! Playlist cache.
//!
//! Holds the single current catalog entry. Rebuilds fetch and parse the
//! configured source with a fixed retry policy and swap the entry in whole;
//! a failed rebuild leaves the previous entry in place so readers keep
//! getting stale data instead of nothing.
//!
//! Rebuilds are tracked per source. Concurrent requests for one source share
//! a single fetch, while different sources run side by side. Each request
//! takes a ticket, a running rebuild carries the ticket of its latest
//! request, and a finished rebuild is only published if no later request
//! has been published before it.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::entry::{CatalogSnapshot, PlaylistEntry};
use super::events::{PlaylistEvent, PlaylistEventBroadcaster};
use super::parser::PlaylistParser;
use super::source::{DocumentFetcher, PlaylistSource};
use crate::config::PlaylistCacheConfig;
use crate::utils::in_flight::{InFlight, InFlightState};
use crate::{Error, Result};

/// Options for [`PlaylistCache::rebuild`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RebuildOptions {
    /// Rebuild even if the current entry came from the same source.
    pub force: bool,
}

impl RebuildOptions {
    pub fn forced() -> Self {
        Self { force: true }
    }
}

/// What a rebuild call did.
#[derive(Debug, Clone)]
pub enum RebuildOutcome {
    /// A new entry was built and published.
    Rebuilt(Arc<PlaylistEntry>),
    /// The current entry already came from this source.
    Skipped(Arc<PlaylistEntry>),
    /// Built, but a later request for another source was published first.
    Superseded(Arc<PlaylistEntry>),
}

impl RebuildOutcome {
    pub fn entry(&self) -> &Arc<PlaylistEntry> {
        match self {
            Self::Rebuilt(entry) | Self::Skipped(entry) | Self::Superseded(entry) => entry,
        }
    }

    pub fn was_rebuilt(&self) -> bool {
        matches!(self, Self::Rebuilt(_))
    }
}

/// Error shared with every caller collapsed onto one rebuild.
#[derive(Debug, Clone)]
struct RebuildFailure {
    attempts: u32,
    reason: String,
}

/// Result of one rebuild and whether it became the current entry.
#[derive(Debug, Clone)]
struct Built {
    entry: Arc<PlaylistEntry>,
    published: bool,
}

type PendingRebuild = InFlight<Built, RebuildFailure>;

/// A running rebuild of one source.
///
/// `ticket` moves forward whenever another request joins, so the rebuild
/// competes for the swap as the latest of its requests.
struct InFlightRebuild {
    pending: PendingRebuild,
    ticket: AtomicU64,
}

/// The published entry and the ticket of the request that built it.
#[derive(Default)]
struct Current {
    entry: Option<Arc<PlaylistEntry>>,
    ticket: u64,
}

/// Serializable summary of the cache.
#[derive(Debug, Clone, Serialize)]
pub struct PlaylistStatus {
    pub source_key: Option<String>,
    pub configured_source: Option<String>,
    pub channels: usize,
    pub genres: usize,
    pub built_at: Option<chrono::DateTime<chrono::Utc>>,
    pub stale: bool,
    /// Sources with a rebuild in progress.
    pub rebuilding: Vec<String>,
}

pub struct PlaylistCache {
    config: PlaylistCacheConfig,
    fetcher: Arc<dyn DocumentFetcher>,
    parser: Arc<dyn PlaylistParser>,
    current: RwLock<Current>,
    /// Source used by background refresh.
    configured: RwLock<Option<PlaylistSource>>,
    in_flight: Mutex<HashMap<String, Arc<InFlightRebuild>>>,
    next_ticket: AtomicU64,
    events: PlaylistEventBroadcaster,
}

impl PlaylistCache {
    pub fn new(
        config: PlaylistCacheConfig,
        fetcher: Arc<dyn DocumentFetcher>,
        parser: Arc<dyn PlaylistParser>,
    ) -> Self {
        Self {
            config,
            fetcher,
            parser,
            current: RwLock::new(Current::default()),
            configured: RwLock::new(None),
            in_flight: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
            events: PlaylistEventBroadcaster::new(),
        }
    }

    pub fn events(&self) -> &PlaylistEventBroadcaster {
        &self.events
    }

    /// Current entry and its staleness flag. Never blocks on a rebuild.
    pub fn get(&self) -> CatalogSnapshot {
        let entry = self.current();
        let stale = entry.as_deref().is_some_and(PlaylistEntry::is_stale);
        CatalogSnapshot { entry, stale }
    }

    pub fn current(&self) -> Option<Arc<PlaylistEntry>> {
        self.current.read().entry.clone()
    }

    pub fn configured_source(&self) -> Option<PlaylistSource> {
        self.configured.read().clone()
    }

    /// Point background refresh at `source` without rebuilding now.
    pub fn set_source(&self, source: PlaylistSource) {
        *self.configured.write() = Some(source);
    }

    /// Sources with a rebuild in progress, sorted.
    pub fn rebuilding(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.in_flight.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn status(&self) -> PlaylistStatus {
        let snapshot = self.get();
        let entry = snapshot.entry.as_deref();
        PlaylistStatus {
            source_key: entry.map(|e| e.source_key.clone()),
            configured_source: self.configured_source().map(|s| s.key().to_string()),
            channels: entry.map_or(0, |e| e.channels.len()),
            genres: entry.map_or(0, |e| e.genres.len()),
            built_at: entry.map(|e| e.built_at),
            stale: snapshot.stale,
            rebuilding: self.rebuilding(),
        }
    }

    /// Rebuild the catalog from `source`.
    ///
    /// A request for the source of the current entry is skipped unless
    /// forced. Concurrent requests for the same source share one rebuild.
    /// When rebuilds for different sources overlap, the most recently
    /// started one wins the swap.
    pub async fn rebuild(
        self: &Arc<Self>,
        source: PlaylistSource,
        options: RebuildOptions,
    ) -> Result<RebuildOutcome> {
        let source_key = source.key().to_string();

        if !options.force {
            if let Some(entry) = self.current().filter(|e| e.source_key == source_key) {
                debug!(source = %source_key, "Playlist already built from source, skipping");
                return Ok(RebuildOutcome::Skipped(entry));
            }
        }

        // Tickets are taken under the lock so they follow request order.
        let (running, leader) = {
            let mut in_flight = self.in_flight.lock();
            let ticket = self.next_ticket.fetch_add(1, Ordering::AcqRel);
            match in_flight.get(&source_key) {
                Some(running) => {
                    running.ticket.store(ticket, Ordering::Release);
                    (Arc::clone(running), false)
                }
                None => {
                    let running = Arc::new(InFlightRebuild {
                        pending: Arc::new(InFlightState::new()),
                        ticket: AtomicU64::new(ticket),
                    });
                    in_flight.insert(source_key.clone(), Arc::clone(&running));
                    (running, true)
                }
            }
        };

        if leader {
            let cache = Arc::clone(self);
            let task_running = Arc::clone(&running);
            tokio::spawn(async move {
                let result = AssertUnwindSafe(cache.run_rebuild(&source))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        Err(RebuildFailure {
                            attempts: 1,
                            reason: "playlist rebuild panicked".to_string(),
                        })
                    });
                cache.finish_rebuild(source, &task_running, result);
            });
        } else {
            debug!(source = %source_key, "Joining in-flight playlist rebuild");
        }

        running
            .pending
            .wait()
            .await
            .map(|built| {
                if built.published {
                    RebuildOutcome::Rebuilt(built.entry)
                } else {
                    RebuildOutcome::Superseded(built.entry)
                }
            })
            .map_err(|failure| Error::Rebuild {
                source_key,
                attempts: failure.attempts,
                reason: failure.reason,
            })
    }

    async fn run_rebuild(
        &self,
        source: &PlaylistSource,
    ) -> std::result::Result<Arc<PlaylistEntry>, RebuildFailure> {
        let attempts = self.config.retry_attempts.max(1);
        let mut reason = String::new();

        for attempt in 1..=attempts {
            match self.attempt(source).await {
                Ok(entry) => {
                    info!(
                        source = %source,
                        attempt,
                        channels = entry.channels.len(),
                        genres = entry.genres.len(),
                        "Playlist rebuilt"
                    );
                    return Ok(entry);
                }
                Err(e) => {
                    warn!(source = %source, attempt, attempts, error = %e, "Playlist rebuild attempt failed");
                    reason = e.to_string();
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }

        Err(RebuildFailure { attempts, reason })
    }

    async fn attempt(&self, source: &PlaylistSource) -> Result<Arc<PlaylistEntry>> {
        let raw = self.fetcher.fetch(source).await?;
        let parsed = self.parser.parse(&raw)?;
        if parsed.channels.is_empty() {
            return Err(Error::validation("playlist contains no channels"));
        }
        Ok(Arc::new(PlaylistEntry::new(
            source.key(),
            parsed,
            self.config.max_age,
        )))
    }

    /// Publish the outcome: swap the entry, release the slot, wake waiters.
    ///
    /// The swap and the slot release happen under the in-flight lock, so a
    /// request either joined before the ticket was read or starts a new
    /// rebuild.
    fn finish_rebuild(
        &self,
        source: PlaylistSource,
        running: &Arc<InFlightRebuild>,
        result: std::result::Result<Arc<PlaylistEntry>, RebuildFailure>,
    ) {
        let source_key = source.key().to_string();

        let published = {
            let mut in_flight = self.in_flight.lock();
            let published = match &result {
                Ok(entry) => {
                    let ticket = running.ticket.load(Ordering::Acquire);
                    let published = self.publish(entry, ticket);
                    if published {
                        *self.configured.write() = Some(source);
                    }
                    published
                }
                Err(_) => false,
            };
            if in_flight
                .get(&source_key)
                .is_some_and(|current| Arc::ptr_eq(current, running))
            {
                in_flight.remove(&source_key);
            }
            published
        };

        let result = match result {
            Ok(entry) => {
                if published {
                    self.events.publish(PlaylistEvent::Rebuilt {
                        source_key: source_key.clone(),
                        channels: entry.channels.len(),
                    });
                } else {
                    debug!(source = %source_key, "Newer playlist already published, discarding rebuild");
                }
                Ok(Built { entry, published })
            }
            Err(failure) => {
                if let Some(entry) = self.current() {
                    warn!(built_at = %entry.built_at, "Serving cached playlist after failed rebuild");
                }
                self.events.publish(PlaylistEvent::RebuildFailed {
                    source_key: source_key.clone(),
                    reason: failure.reason.clone(),
                });
                Err(failure)
            }
        };

        running.pending.set_result(result);
    }

    /// Swap in `entry` unless a later ticket is already current.
    fn publish(&self, entry: &Arc<PlaylistEntry>, ticket: u64) -> bool {
        let mut current = self.current.write();
        if ticket < current.ticket {
            return false;
        }
        current.entry = Some(Arc::clone(entry));
        current.ticket = ticket;
        true
    }

    /// Force-rebuild the configured source every `update_interval` until
    /// `token` is cancelled.
    pub fn start_background_refresh(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let period = self.config.update_interval;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = period.as_secs(), "Playlist background refresh started");

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Playlist background refresh stopped");
                        break;
                    }
                    _ = ticker.tick() => cache.refresh_configured().await,
                }
            }
        })
    }

    async fn refresh_configured(self: &Arc<Self>) {
        let Some(source) = self.configured_source() else {
            debug!("No playlist source configured, skipping refresh");
            return;
        };

        match self.rebuild(source, RebuildOptions::forced()).await {
            Ok(RebuildOutcome::Superseded(_)) => debug!("Refresh superseded by a newer rebuild"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Background playlist refresh failed"),
        }
    }
}
