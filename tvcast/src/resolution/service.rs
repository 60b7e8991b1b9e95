//! Stream resolution against the current catalog.

use std::sync::Arc;

use tracing::debug;

use super::backend::{ResolveRequest, StreamResolverBackend};
use super::cache::{ResolutionCache, ResolutionStatus};
use crate::playlist::PlaylistCache;
use crate::{Error, Result};

/// Resolves catalog channels through the cache and a backend.
pub struct ResolutionService {
    cache: ResolutionCache,
    backend: Arc<dyn StreamResolverBackend>,
    playlist: Arc<PlaylistCache>,
}

impl ResolutionService {
    pub fn new(
        cache: ResolutionCache,
        backend: Arc<dyn StreamResolverBackend>,
        playlist: Arc<PlaylistCache>,
    ) -> Self {
        Self {
            cache,
            backend,
            playlist,
        }
    }

    /// Resolve `id` to a playable URL.
    ///
    /// When a catalog is loaded the identifier must be one of its channels,
    /// and the channel's stream reference is handed to the backend.
    pub async fn resolve(&self, id: &str) -> Result<Arc<str>> {
        let mut request = ResolveRequest::new(id);

        if let Some(entry) = self.playlist.current() {
            let channel = entry
                .channel(id)
                .ok_or_else(|| Error::resolution(id, "unknown channel"))?;
            request = request.with_stream_url(channel.stream_url.clone());
        } else {
            debug!(id = %id, "No catalog loaded, resolving without stream hint");
        }

        self.cache.resolve(request, Arc::clone(&self.backend)).await
    }

    pub fn clear_cache(&self) -> usize {
        self.cache.clear_cache()
    }

    pub fn status(&self) -> ResolutionStatus {
        self.cache.status()
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::config::PlaylistCacheConfig;
    use crate::playlist::{
        DocumentFetcher, M3uParser, PlaylistSource, RebuildOptions,
    };

    struct StaticFetcher;

    #[async_trait]
    impl DocumentFetcher for StaticFetcher {
        async fn fetch(&self, _source: &PlaylistSource) -> Result<String> {
            Ok("#EXTM3U\n#EXTINF:-1 tvg-id=\"chan-1\",One\nhttp://origin/one.m3u8\n".into())
        }
    }

    struct EchoBackend;

    #[async_trait]
    impl StreamResolverBackend for EchoBackend {
        async fn resolve(&self, request: &ResolveRequest) -> Result<String> {
            request
                .stream_url
                .clone()
                .ok_or_else(|| Error::resolution(&request.id, "no hint"))
        }
    }

    fn service() -> (ResolutionService, Arc<PlaylistCache>) {
        let playlist = Arc::new(PlaylistCache::new(
            PlaylistCacheConfig::default(),
            Arc::new(StaticFetcher),
            Arc::new(M3uParser),
        ));
        let service = ResolutionService::new(
            ResolutionCache::new(Duration::from_secs(60)),
            Arc::new(EchoBackend),
            Arc::clone(&playlist),
        );
        (service, playlist)
    }

    #[tokio::test]
    async fn test_passes_catalog_stream_url() {
        let (service, playlist) = service();
        playlist
            .rebuild(PlaylistSource::Url("http://list".into()), RebuildOptions::default())
            .await
            .unwrap();

        let url = service.resolve("chan-1").await.unwrap();
        assert_eq!(url.as_ref(), "http://origin/one.m3u8");
        assert_eq!(service.status().cached_entries, 1);
        assert_eq!(service.clear_cache(), 1);
    }

    #[tokio::test]
    async fn test_unknown_channel_is_rejected() {
        let (service, playlist) = service();
        playlist
            .rebuild(PlaylistSource::Url("http://list".into()), RebuildOptions::default())
            .await
            .unwrap();

        let err = service.resolve("missing").await.unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
    }
}
