//! Ingestion sources and the fetcher that reads them.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::generator::ManagedGenerator;
use crate::{Error, Result};

/// Where the catalog comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlaylistSource {
    /// A remote playlist document.
    Url(String),
    /// The latest document printed by the playlist generator.
    GeneratorOutput,
}

impl PlaylistSource {
    pub const GENERATOR_OUTPUT_KEY: &'static str = "generator-output";

    /// Stable identity used to recognize same-source rebuilds.
    pub fn key(&self) -> &str {
        match self {
            Self::Url(url) => url,
            Self::GeneratorOutput => Self::GENERATOR_OUTPUT_KEY,
        }
    }

    pub fn from_key(key: &str) -> Self {
        if key == Self::GENERATOR_OUTPUT_KEY {
            Self::GeneratorOutput
        } else {
            Self::Url(key.to_string())
        }
    }
}

impl fmt::Display for PlaylistSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Reads the raw document for a source.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, source: &PlaylistSource) -> Result<String>;
}

/// Default fetcher: HTTP for URLs, the playlist generator for generated
/// documents.
pub struct IngestionClient {
    http: reqwest::Client,
    generator: Option<Arc<ManagedGenerator>>,
}

impl IngestionClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            generator: None,
        }
    }

    pub fn with_generator(mut self, generator: Arc<ManagedGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    async fn fetch_url(&self, url: &str) -> Result<String> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        let body = response.text().await?;
        debug!(url = %url, bytes = body.len(), "Fetched playlist document");
        Ok(body)
    }

    /// Latest generator document, running the generator once if it has
    /// not produced anything yet.
    async fn fetch_generated(&self) -> Result<String> {
        let generator = self
            .generator
            .as_ref()
            .ok_or_else(|| Error::Other("no playlist generator attached".into()))?;

        if let Some(output) = generator.last_output() {
            return Ok(output.to_string());
        }
        generator.execute(&[]).await
    }
}

#[async_trait]
impl DocumentFetcher for IngestionClient {
    async fn fetch(&self, source: &PlaylistSource) -> Result<String> {
        match source {
            PlaylistSource::Url(url) => self.fetch_url(url).await,
            PlaylistSource::GeneratorOutput => self.fetch_generated().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_keys() {
        let url = PlaylistSource::Url("http://host/a.m3u".into());
        assert_eq!(url.key(), "http://host/a.m3u");
        assert_eq!(PlaylistSource::from_key("generator-output"), PlaylistSource::GeneratorOutput);
        assert_eq!(PlaylistSource::from_key(url.key()), url);
    }

    #[tokio::test]
    async fn test_generated_source_without_generator_fails() {
        let client = IngestionClient::new(reqwest::Client::new());
        assert!(client.fetch(&PlaylistSource::GeneratorOutput).await.is_err());
    }
}
