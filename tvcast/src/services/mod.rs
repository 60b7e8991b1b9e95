//! Service layer module.
//!
//! This module provides the service container that wires the generators,
//! the playlist cache and the resolution service together.

pub mod container;

pub use container::{ConfigureReport, ServiceContainer, ServiceStats};
