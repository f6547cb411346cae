//! Process-level plumbing for the bouncer: configuration, logging, the
//! upstream IRC connections, and in-place upgrades.

pub mod config;
pub mod run;
pub mod upstream;

mod tracing_config;
pub use tracing_config::build_subscriber;
