//! Resolution cache.
//!
//! Thread-safe map from stream identifier to resolved URL with TTL-based
//! eviction and request deduplication: concurrent lookups of the same
//! identifier share one backend call.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use serde::Serialize;
use tracing::debug;

use super::backend::{ResolveRequest, StreamResolverBackend};
use crate::utils::in_flight::{InFlight, InFlightState};
use crate::{Error, Result};

/// A resolved URL with its expiry.
#[derive(Debug, Clone)]
struct CacheEntry {
    url: Arc<str>,
    resolved_at: DateTime<Utc>,
    expires_at: Instant,
    /// Cache epoch at the time the resolution started.
    epoch: u64,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

type InFlightRequest = InFlight<Arc<str>, String>;
type InFlightResult = std::result::Result<Arc<str>, String>;

/// Snapshot of the resolution cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionStatus {
    pub cached_entries: usize,
    pub in_flight: usize,
    pub ttl_ms: u64,
}

/// Cached view of one resolved identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResolution {
    pub url: Arc<str>,
    pub resolved_at: DateTime<Utc>,
}

/// Deduplicating TTL cache in front of a [`StreamResolverBackend`].
#[derive(Clone)]
pub struct ResolutionCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    in_flight: Arc<DashMap<String, InFlightRequest>>,
    /// Bumped by `clear_cache`; entries from an older epoch are never served.
    epoch: Arc<AtomicU64>,
    ttl: Duration,
}

impl ResolutionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            in_flight: Arc::new(DashMap::new()),
            epoch: Arc::new(AtomicU64::new(0)),
            ttl,
        }
    }

    /// Resolve `request.id`, reusing a live entry or an in-flight call.
    ///
    /// The backend runs in its own task, so dropping this future never
    /// strands other callers waiting on the same identifier. Every waiter
    /// observes the same outcome. Failures are not cached.
    pub async fn resolve(
        &self,
        request: ResolveRequest,
        backend: Arc<dyn StreamResolverBackend>,
    ) -> Result<Arc<str>> {
        let id = request.id.clone();

        if let Some(hit) = self.get(&id) {
            debug!(id = %id, "Resolution cache hit");
            return Ok(hit.url);
        }

        let (pending, is_new) = self.get_or_create_in_flight(&id);
        if is_new {
            // A leader may have finished between the lookup and registration.
            if let Some(hit) = self.get(&id) {
                self.release_in_flight(&id, &pending, Ok(hit.url.clone()));
                return Ok(hit.url);
            }

            let epoch = self.epoch.load(Ordering::Acquire);
            let cache = self.clone();
            let leader = Arc::clone(&pending);
            debug!(id = %id, "Starting resolution");
            tokio::spawn(async move {
                let outcome = AssertUnwindSafe(backend.resolve(&request))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(Error::Other("resolver backend panicked".into())));

                match outcome {
                    Ok(url) => cache.complete_in_flight(&request.id, &leader, url.into(), epoch),
                    Err(e) => cache.release_in_flight(&request.id, &leader, Err(failure_reason(e))),
                }
            });
        } else {
            debug!(id = %id, "Joining in-flight resolution");
        }

        pending
            .wait()
            .await
            .map_err(|reason| Error::resolution(id, reason))
    }

    /// Live cached entry for `id`; expired entries are evicted here.
    pub fn get(&self, id: &str) -> Option<CachedResolution> {
        let epoch = self.epoch.load(Ordering::Acquire);
        let entry = self.entries.get(id)?;

        if entry.is_expired() || entry.epoch != epoch {
            drop(entry);
            self.entries
                .remove_if(id, |_, e| e.is_expired() || e.epoch != epoch);
            return None;
        }

        Some(CachedResolution {
            url: entry.url.clone(),
            resolved_at: entry.resolved_at,
        })
    }

    /// Drop every cached entry.
    ///
    /// In-flight resolutions keep running and are delivered to their
    /// waiters, but their results are not cached.
    pub fn clear_cache(&self) -> usize {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let cleared = self.entries.len();
        self.entries.clear();
        debug!(cleared, "Resolution cache cleared");
        cleared
    }

    /// Remove all expired entries.
    pub fn cleanup_expired(&self) -> usize {
        let before = self.entries.len();
        let epoch = self.epoch.load(Ordering::Acquire);
        self.entries
            .retain(|_, entry| !entry.is_expired() && entry.epoch == epoch);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn status(&self) -> ResolutionStatus {
        ResolutionStatus {
            cached_entries: self.len(),
            in_flight: self.in_flight.len(),
            ttl_ms: self.ttl.as_millis() as u64,
        }
    }

    pub fn has_in_flight(&self, id: &str) -> bool {
        self.in_flight.contains_key(id)
    }

    // ========== Request Deduplication ==========

    fn get_or_create_in_flight(&self, id: &str) -> (InFlightRequest, bool) {
        if let Some(existing) = self.in_flight.get(id) {
            return (existing.clone(), false);
        }

        match self.in_flight.entry(id.to_string()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let request = Arc::new(InFlightState::new());
                entry.insert(request.clone());
                (request, true)
            }
        }
    }

    /// Cache a successful result, then release its waiters.
    ///
    /// The entry is written before the marker is removed so a concurrent
    /// caller always sees one or the other.
    fn complete_in_flight(&self, id: &str, request: &InFlightRequest, url: Arc<str>, epoch: u64) {
        if epoch == self.epoch.load(Ordering::Acquire) {
            self.entries.insert(
                id.to_string(),
                CacheEntry {
                    url: url.clone(),
                    resolved_at: Utc::now(),
                    expires_at: Instant::now() + self.ttl,
                    epoch,
                },
            );
        } else {
            debug!(id = %id, "Cache cleared during resolution, result not cached");
        }
        self.release_in_flight(id, request, Ok(url));
    }

    fn release_in_flight(&self, id: &str, request: &InFlightRequest, result: InFlightResult) {
        self.in_flight
            .remove_if(id, |_, current| Arc::ptr_eq(current, request));
        request.set_result(result);
    }
}

fn failure_reason(error: Error) -> String {
    match error {
        Error::Resolution { reason, .. } => reason,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    use super::*;

    /// Backend that counts calls and blocks until released.
    struct CountingBackend {
        calls: AtomicUsize,
        gate: Semaphore,
        fail: bool,
    }

    impl CountingBackend {
        fn new(open: bool, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                gate: Semaphore::new(if open { Semaphore::MAX_PERMITS } else { 0 }),
                fail,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StreamResolverBackend for CountingBackend {
        async fn resolve(&self, request: &ResolveRequest) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let _permit = self.gate.acquire().await.map_err(|e| Error::Other(e.to_string()))?;
            if self.fail {
                return Err(Error::execution("resolver", "exited with code 1"));
            }
            Ok(format!("http://cdn.example.com/{}/{n}", request.id))
        }
    }

    async fn wait_for_calls(backend: &CountingBackend, n: usize) {
        while backend.calls() < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_same_id_invokes_backend_once() {
        let cache = ResolutionCache::new(Duration::from_secs(60));
        let backend = CountingBackend::new(false, false);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let backend: Arc<dyn StreamResolverBackend> = backend.clone();
            handles.push(tokio::spawn(async move {
                cache.resolve(ResolveRequest::new("chan-1"), backend).await
            }));
        }

        wait_for_calls(&backend, 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        backend.gate.add_permits(Semaphore::MAX_PERMITS);

        let mut urls = Vec::new();
        for handle in handles {
            urls.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(backend.calls(), 1);
        assert!(urls.iter().all(|u| u.as_ref() == "http://cdn.example.com/chan-1/1"));
        assert_eq!(cache.status().cached_entries, 1);
        assert_eq!(cache.status().in_flight, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_distinct_ids_do_not_block_each_other() {
        let cache = ResolutionCache::new(Duration::from_secs(60));
        let backend = CountingBackend::new(false, false);

        let a = {
            let cache = cache.clone();
            let backend: Arc<dyn StreamResolverBackend> = backend.clone();
            tokio::spawn(async move { cache.resolve(ResolveRequest::new("a"), backend).await })
        };
        let b = {
            let cache = cache.clone();
            let backend: Arc<dyn StreamResolverBackend> = backend.clone();
            tokio::spawn(async move { cache.resolve(ResolveRequest::new("b"), backend).await })
        };

        // Both backend calls start before either is allowed to finish.
        wait_for_calls(&backend, 2).await;
        assert!(cache.has_in_flight("a"));
        assert!(cache.has_in_flight("b"));

        backend.gate.add_permits(2);
        assert!(a.await.unwrap().unwrap().starts_with("http://cdn.example.com/a/"));
        assert!(b.await.unwrap().unwrap().starts_with("http://cdn.example.com/b/"));
    }

    #[tokio::test]
    async fn test_hit_skips_backend() {
        let cache = ResolutionCache::new(Duration::from_secs(60));
        let backend = CountingBackend::new(true, false);

        let first = cache
            .resolve(ResolveRequest::new("chan-1"), backend.clone())
            .await
            .unwrap();
        let second = cache
            .resolve(ResolveRequest::new("chan-1"), backend.clone())
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(backend.calls(), 1);
        assert!(cache.get("chan-1").is_some());
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let cache = ResolutionCache::new(Duration::from_secs(60));
        let backend = CountingBackend::new(true, true);

        let err = cache
            .resolve(ResolveRequest::new("chan-1"), backend.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
        assert!(err.to_string().starts_with("No playable stream available for chan-1"));
        assert!(cache.is_empty());
        assert!(!cache.has_in_flight("chan-1"));

        let _ = cache
            .resolve(ResolveRequest::new("chan-1"), backend.clone())
            .await;
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_clear_does_not_cache_in_flight_result() {
        let cache = ResolutionCache::new(Duration::from_secs(60));
        let backend = CountingBackend::new(false, false);

        let pending = {
            let cache = cache.clone();
            let backend: Arc<dyn StreamResolverBackend> = backend.clone();
            tokio::spawn(async move { cache.resolve(ResolveRequest::new("chan-1"), backend).await })
        };
        wait_for_calls(&backend, 1).await;

        cache.clear_cache();
        backend.gate.add_permits(1);

        let url = pending.await.unwrap().unwrap();
        assert_eq!(url.as_ref(), "http://cdn.example.com/chan-1/1");
        assert!(cache.get("chan-1").is_none());
        assert_eq!(cache.status().cached_entries, 0);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = ResolutionCache::new(Duration::from_millis(20));
        let backend = CountingBackend::new(true, false);

        cache
            .resolve(ResolveRequest::new("chan-1"), backend.clone())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(cache.get("chan-1").is_none());
        cache
            .resolve(ResolveRequest::new("chan-1"), backend.clone())
            .await
            .unwrap();
        assert_eq!(backend.calls(), 2);
        assert_eq!(cache.status().ttl_ms, 20);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let cache = ResolutionCache::new(Duration::from_millis(10));
        let backend = CountingBackend::new(true, false);
        for id in ["a", "b"] {
            cache
                .resolve(ResolveRequest::new(id), backend.clone())
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.cleanup_expired(), 2);
        assert!(cache.is_empty());
    }
}
