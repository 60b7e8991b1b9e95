//! Pluggable resolution backends.

use async_trait::async_trait;

use crate::generator::{GeneratorRole, ManagedGenerator};
use crate::{Error, Result};

/// A request to turn a stream identifier into a playable URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveRequest {
    pub id: String,
    /// Stream reference from the catalog, passed to the resolver as a hint.
    pub stream_url: Option<String>,
}

impl ResolveRequest {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stream_url: None,
        }
    }

    pub fn with_stream_url(mut self, stream_url: impl Into<String>) -> Self {
        self.stream_url = Some(stream_url.into());
        self
    }
}

/// Something that can resolve a stream identifier.
///
/// Implementations may be slow; callers go through
/// [`ResolutionCache`](super::ResolutionCache) to deduplicate and cache.
#[async_trait]
pub trait StreamResolverBackend: Send + Sync {
    async fn resolve(&self, request: &ResolveRequest) -> Result<String>;
}

/// The resolver-role generator is invoked as `<artifact> <id> [<stream url>]`
/// and must print the playable URL as its first non-empty line.
#[async_trait]
impl StreamResolverBackend for ManagedGenerator {
    async fn resolve(&self, request: &ResolveRequest) -> Result<String> {
        if self.role() != GeneratorRole::Resolver {
            return Err(Error::resolution(
                &request.id,
                format!("{} generator cannot resolve streams", self.role()),
            ));
        }
        if !self.has_artifact() {
            return Err(Error::resolution(&request.id, "no resolver script configured"));
        }

        let mut args = vec![request.id.clone()];
        args.extend(request.stream_url.clone());

        let stdout = self.execute(&args).await?;
        let line = stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| Error::resolution(&request.id, "resolver printed nothing"))?;

        url::Url::parse(line).map_err(|e| {
            Error::resolution(&request.id, format!("resolver printed an invalid URL: {e}"))
        })?;

        Ok(line.to_string())
    }
}
