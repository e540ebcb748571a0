//! The immutable per-project snapshot (component C3) and its builder.
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod snapshot;

pub use builder::{apply_experiment_deltas, apply_group_deltas, build, BucketDelta};
pub use snapshot::Snapshot;
