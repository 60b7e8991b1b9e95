//! Per-user addon configuration carried in request paths.
//!
//! Clients encode their settings as a base64 query string
//! (`m3u=...&resolver_script=...`). Only recognized keys are kept and every
//! value is validated here so the core never sees raw request parameters.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ScheduleInterval;
use crate::{Error, Result};

/// Validated addon configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonConfig {
    /// Playlist URL to ingest.
    pub m3u: Option<String>,
    /// Generator-role script location.
    pub python_script_url: Option<String>,
    pub python_update_interval: Option<ScheduleInterval>,
    /// Resolver-role script location.
    pub resolver_script: Option<String>,
    pub resolver_update_interval: Option<ScheduleInterval>,
    pub resolver_enabled: bool,
}

impl AddonConfig {
    /// Decode a base64-encoded query string.
    pub fn decode(encoded: &str) -> Result<Self> {
        let bytes = [&STANDARD, &URL_SAFE, &URL_SAFE_NO_PAD]
            .iter()
            .find_map(|engine| engine.decode(encoded.trim()).ok())
            .ok_or_else(|| Error::validation("configuration is not valid base64"))?;

        let query = String::from_utf8(bytes)
            .map_err(|_| Error::validation("configuration is not valid UTF-8"))?;

        Self::from_query(&query)
    }

    /// Parse an already-decoded `key=value&...` query string.
    pub fn from_query(query: &str) -> Result<Self> {
        Self::from_pairs(
            url::form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned())),
        )
    }

    /// Build from key/value pairs, ignoring unknown keys and blank values.
    pub fn from_pairs<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = Self::default();

        for (key, value) in pairs {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }

            match key.as_str() {
                "m3u" => config.m3u = Some(http_url(&key, value)?),
                "python_script_url" => config.python_script_url = Some(http_url(&key, value)?),
                "python_update_interval" => {
                    config.python_update_interval = Some(ScheduleInterval::parse(value)?)
                }
                "resolver_script" => config.resolver_script = Some(http_url(&key, value)?),
                "resolver_update_interval" => {
                    config.resolver_update_interval = Some(ScheduleInterval::parse(value)?)
                }
                "resolver_enabled" => config.resolver_enabled = flag(value),
                other => debug!(key = %other, "Ignoring unrecognized configuration key"),
            }
        }

        Ok(config)
    }
}

fn flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "on" | "yes")
}

fn http_url(key: &str, value: &str) -> Result<String> {
    let parsed = url::Url::parse(value)
        .map_err(|e| Error::validation(format!("{key} is not a valid URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(value.to_string()),
        scheme => Err(Error::validation(format!(
            "{key} must use http or https, got {scheme}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64_query() {
        let query = "m3u=http%3A%2F%2Fhost%2Flist.m3u&resolver_enabled=true\
                     &resolver_update_interval=0%3A30&unknown=1";
        let encoded = STANDARD.encode(query);

        let config = AddonConfig::decode(&encoded).unwrap();

        assert_eq!(config.m3u.as_deref(), Some("http://host/list.m3u"));
        assert!(config.resolver_enabled);
        assert_eq!(
            config.resolver_update_interval.map(|i| i.as_millis()),
            Some(1_800_000)
        );
        assert!(config.python_script_url.is_none());
    }

    #[test]
    fn test_rejects_invalid_values_at_the_boundary() {
        assert!(AddonConfig::from_query("m3u=ftp://host/list.m3u").is_err());
        assert!(AddonConfig::from_query("python_update_interval=abc").is_err());
        assert!(AddonConfig::from_query("resolver_update_interval=0:00").is_err());
        assert!(AddonConfig::decode("%%%not-base64%%%").is_err());
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let config =
            AddonConfig::from_query("m3u=&python_script_url=%20&resolver_enabled=false").unwrap();
        assert!(config.m3u.is_none());
        assert!(config.python_script_url.is_none());
        assert!(!config.resolver_enabled);
    }
}
