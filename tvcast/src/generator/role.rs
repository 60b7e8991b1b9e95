use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// What a managed generator instance produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorRole {
    /// Produces a full playlist document on stdout.
    Playlist,
    /// Prints one playable URL for the stream identifier it is given.
    Resolver,
}

impl GeneratorRole {
    pub const ALL: [GeneratorRole; 2] = [GeneratorRole::Playlist, GeneratorRole::Resolver];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Playlist => "playlist",
            Self::Resolver => "resolver",
        }
    }

    /// File name of the installed artifact inside the data directory.
    pub fn artifact_file_name(&self) -> &'static str {
        match self {
            Self::Playlist => "playlist_generator.script",
            Self::Resolver => "stream_resolver.script",
        }
    }

    /// Whether a run with `args` must print something to count as a success.
    ///
    /// Playlist runs always produce a document. Resolver runs only produce a
    /// URL when asked to resolve an identifier; a bare scheduled run may be
    /// silent.
    pub fn requires_output(&self, args: &[String]) -> bool {
        match self {
            Self::Playlist => true,
            Self::Resolver => !args.is_empty(),
        }
    }
}

impl fmt::Display for GeneratorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GeneratorRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "playlist" | "generator" | "python-script" => Ok(Self::Playlist),
            "resolver" => Ok(Self::Resolver),
            other => Err(Error::validation(format!("unknown generator role: {other}"))),
        }
    }
}
