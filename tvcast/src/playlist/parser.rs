//! Extended M3U parsing.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::entry::{Channel, DEFAULT_GENRE, ParsedPlaylist};
use crate::{Error, Result};

/// `key="value"` attribute pairs on `#EXTM3U` and `#EXTINF` lines.
static ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([A-Za-z0-9_-]+)="([^"]*)""#).unwrap());

/// Turns a raw document into channels and program-guide references.
pub trait PlaylistParser: Send + Sync {
    fn parse(&self, raw: &str) -> Result<ParsedPlaylist>;
}

/// Parser for `#EXTM3U` playlists.
#[derive(Debug, Clone, Copy, Default)]
pub struct M3uParser;

impl PlaylistParser for M3uParser {
    fn parse(&self, raw: &str) -> Result<ParsedPlaylist> {
        let mut lines = raw
            .lines()
            .map(|l| l.trim_start_matches('\u{feff}').trim())
            .filter(|l| !l.is_empty());

        let header = lines
            .next()
            .filter(|l| l.starts_with("#EXTM3U"))
            .ok_or_else(|| Error::validation("document does not start with #EXTM3U"))?;

        let mut parsed = ParsedPlaylist {
            epg_references: epg_references(header),
            ..Default::default()
        };
        let mut seen = HashSet::new();
        let mut pending: Option<Extinf> = None;

        for line in lines {
            if let Some(rest) = line.strip_prefix("#EXTINF:") {
                pending = Some(Extinf::parse(rest));
                continue;
            }
            if line.starts_with('#') {
                continue;
            }

            let Some(info) = pending.take() else {
                debug!(line = %line, "Skipping stream line without #EXTINF");
                continue;
            };
            let channel = info.into_channel(line);
            if seen.insert(channel.id.clone()) {
                parsed.channels.push(channel);
            } else {
                debug!(id = %channel.id, "Skipping duplicate channel id");
            }
        }

        Ok(parsed)
    }
}

fn epg_references(header: &str) -> Vec<String> {
    let mut refs = Vec::new();
    for caps in ATTRIBUTE.captures_iter(header) {
        if matches!(&caps[1], "url-tvg" | "x-tvg-url") {
            for url in caps[2].split(',').map(str::trim).filter(|u| !u.is_empty()) {
                if !refs.iter().any(|r| r == url) {
                    refs.push(url.to_string());
                }
            }
        }
    }
    refs
}

#[derive(Debug, Default)]
struct Extinf {
    tvg_id: Option<String>,
    tvg_name: Option<String>,
    logo: Option<String>,
    group: Option<String>,
    title: String,
}

impl Extinf {
    fn parse(rest: &str) -> Self {
        let mut info = Self::default();
        for caps in ATTRIBUTE.captures_iter(rest) {
            let value = caps[2].trim();
            if value.is_empty() {
                continue;
            }
            let slot = match &caps[1] {
                "tvg-id" => &mut info.tvg_id,
                "tvg-name" => &mut info.tvg_name,
                "tvg-logo" => &mut info.logo,
                "group-title" => &mut info.group,
                _ => continue,
            };
            *slot = Some(value.to_string());
        }

        // The display name follows the last comma outside quoted attributes.
        let stripped = ATTRIBUTE.replace_all(rest, "");
        info.title = stripped
            .split_once(',')
            .map(|(_, title)| title.trim().to_string())
            .unwrap_or_default();
        info
    }

    fn into_channel(self, stream_url: &str) -> Channel {
        let name = [Some(self.title), self.tvg_name.clone()]
            .into_iter()
            .flatten()
            .find(|n| !n.is_empty())
            .unwrap_or_else(|| stream_url.to_string());
        let id = self.tvg_id.unwrap_or_else(|| slug(&name));

        Channel {
            id,
            name,
            genre: self.group.unwrap_or_else(|| DEFAULT_GENRE.to_string()),
            stream_url: stream_url.to_string(),
            logo: self.logo,
        }
    }
}

/// Lowercase identifier with runs of non-alphanumerics collapsed to `-`.
fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}
