//! The assignment engine and remote-config evaluator (components C5, C6).
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod hit;
pub mod remote_config;

pub use engine::get_experiments;
pub use hit::{ExperimentHit, SENTINEL_DEFAULT_GROUP_KEY};
pub use remote_config::get_config;
