//! Catalog data published by the playlist cache.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Genre assigned to channels without a group.
pub const DEFAULT_GENRE: &str = "Other Channels";

/// One channel of the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub genre: String,
    /// Stream reference as listed in the source document.
    pub stream_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
}

/// Parser output for one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPlaylist {
    pub channels: Vec<Channel>,
    pub epg_references: Vec<String>,
}

/// A complete, immutable catalog snapshot.
///
/// Entries are only ever published whole and replaced wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub source_key: String,
    pub channels: Vec<Channel>,
    /// Distinct genres of `channels`, sorted.
    pub genres: Vec<String>,
    pub epg_references: Vec<String>,
    pub built_at: DateTime<Utc>,
    pub max_age: Duration,
}

impl PlaylistEntry {
    pub fn new(source_key: impl Into<String>, parsed: ParsedPlaylist, max_age: Duration) -> Self {
        let genres: BTreeSet<&str> = parsed.channels.iter().map(|c| c.genre.as_str()).collect();
        let genres = genres.into_iter().map(str::to_string).collect();

        Self {
            source_key: source_key.into(),
            genres,
            channels: parsed.channels,
            epg_references: parsed.epg_references,
            built_at: Utc::now(),
            max_age,
        }
    }

    /// Whether `built_at + max_age` lies before `now`.
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.max_age) {
            Ok(max_age) => self.built_at + max_age < now,
            Err(_) => false,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Utc::now())
    }

    pub fn channel(&self, id: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }

    /// Channels in `genre` whose name contains `search`, ignoring case.
    /// `None` or blank filters match everything.
    pub fn find_channels<'a>(
        &'a self,
        genre: Option<&'a str>,
        search: Option<&str>,
    ) -> impl Iterator<Item = &'a Channel> + 'a {
        let genre = genre.filter(|g| !g.is_empty());
        let needle = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        self.channels.iter().filter(move |c| {
            genre.is_none_or(|g| c.genre == g)
                && needle
                    .as_deref()
                    .is_none_or(|n| c.name.to_lowercase().contains(n))
        })
    }
}

/// What readers get from the playlist cache.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub entry: Option<std::sync::Arc<PlaylistEntry>>,
    pub stale: bool,
}

impl CatalogSnapshot {
    /// Notice shown to clients when the catalog is past its maximum age.
    pub fn notice(&self) -> Option<String> {
        match &self.entry {
            Some(entry) if self.stale => Some(format!(
                "Serving cached data as of {}",
                entry.built_at.to_rfc3339()
            )),
            _ => None,
        }
    }

    pub fn channel(&self, id: &str) -> Option<&Channel> {
        self.entry.as_deref().and_then(|e| e.channel(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(id: &str, genre: &str) -> Channel {
        Channel {
            id: id.to_string(),
            name: id.to_uppercase(),
            genre: genre.to_string(),
            stream_url: format!("http://example.com/{id}.m3u8"),
            logo: None,
        }
    }

    #[test]
    fn test_genres_are_distinct_and_sorted() {
        let parsed = ParsedPlaylist {
            channels: vec![channel("a", "News"), channel("b", "Movies"), channel("c", "News")],
            epg_references: vec![],
        };
        let entry = PlaylistEntry::new("http://host/list.m3u", parsed, Duration::from_secs(60));

        assert_eq!(entry.genres, vec!["Movies", "News"]);
        assert_eq!(entry.find_channels(Some("News"), None).count(), 2);
        assert_eq!(entry.channel("b").map(|c| c.name.as_str()), Some("B"));
    }

    #[test]
    fn test_find_channels_by_genre_and_name() {
        let mut news = channel("news.one", "News");
        news.name = "World News".to_string();
        let mut late = channel("news.late", "News");
        late.name = "Late Show".to_string();
        let mut film = channel("film.news", "Movies");
        film.name = "News Reel".to_string();
        let parsed = ParsedPlaylist {
            channels: vec![news, late, film],
            epg_references: vec![],
        };
        let entry = PlaylistEntry::new("k", parsed, Duration::from_secs(60));
        let ids = |genre, search| {
            entry
                .find_channels(genre, search)
                .map(|c| c.id.as_str())
                .collect::<Vec<_>>()
        };

        assert_eq!(ids(None, Some("NEWS")), vec!["news.one", "film.news"]);
        assert_eq!(ids(Some("News"), Some("news")), vec!["news.one"]);
        assert_eq!(ids(Some(""), Some("  ")).len(), 3);
        assert!(ids(Some("Sport"), None).is_empty());
    }

    #[test]
    fn test_staleness() {
        let entry = PlaylistEntry::new("k", ParsedPlaylist::default(), Duration::from_secs(60));
        assert!(!entry.is_stale());
        assert!(entry.is_stale_at(entry.built_at + chrono::Duration::seconds(61)));

        let snapshot = CatalogSnapshot {
            entry: Some(std::sync::Arc::new(entry)),
            stale: true,
        };
        assert!(snapshot.notice().unwrap().starts_with("Serving cached data as of "));
    }
}
