//! Stream identifier to playable URL resolution.

mod backend;
mod cache;
mod service;

pub use backend::{ResolveRequest, StreamResolverBackend};
pub use cache::{CachedResolution, ResolutionCache, ResolutionStatus};
pub use service::ResolutionService;
