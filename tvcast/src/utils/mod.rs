//! Small shared helpers.

pub mod fs;
pub mod http_client;
pub mod in_flight;
