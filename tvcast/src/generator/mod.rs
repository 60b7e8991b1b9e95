//! Managed external generators.
//!
//! A generator is a script fetched from a URL at runtime and run as a child
//! process. The playlist role prints a whole playlist document; the resolver
//! role prints one playable URL per stream identifier.

mod events;
mod managed;
mod registry;
mod role;
mod schedule;
mod state;

pub use events::{GeneratorEvent, GeneratorEventBroadcaster};
pub use managed::ManagedGenerator;
pub use registry::GeneratorRegistry;
pub use role::GeneratorRole;
pub use schedule::ScheduleHandle;
pub use state::{GeneratorStatus, Phase, ScheduleStatus};
