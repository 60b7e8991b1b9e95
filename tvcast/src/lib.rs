//! tvcast library crate.
//!
//! A live-TV catalog service: a playlist cache fed by remote playlists or
//! a downloaded generator script, and stream resolution through a second
//! script behind a deduplicating cache.

pub mod api;
pub mod config;
pub mod error;
pub mod generator;
pub mod logging;
pub mod playlist;
pub mod resolution;
pub mod services;
pub mod utils;

pub use error::{Error, Result};
