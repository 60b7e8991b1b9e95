//! The parsed catalog and how it is kept fresh.

mod cache;
mod entry;
mod events;
mod parser;
mod source;

pub use cache::{PlaylistCache, PlaylistStatus, RebuildOptions, RebuildOutcome};
pub use entry::{CatalogSnapshot, Channel, DEFAULT_GENRE, ParsedPlaylist, PlaylistEntry};
pub use events::{PlaylistEvent, PlaylistEventBroadcaster};
pub use parser::{M3uParser, PlaylistParser};
pub use source::{DocumentFetcher, IngestionClient, PlaylistSource};
