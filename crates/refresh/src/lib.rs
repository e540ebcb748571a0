//! The background snapshot refresh pipeline (component C4) and the
//! control-plane transport boundary it depends on.
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod pipeline;

pub use client::{ControlPlaneClient, MockControlPlaneClient, ResponseCode, TabConfig, TabConfigResponse};
pub use pipeline::{
    spawn_loop, NullObserver, RefreshObserver, RefreshOutcome, SnapshotStore, DEFAULT_REFRESH_INTERVAL, MAX_RETRY,
};
