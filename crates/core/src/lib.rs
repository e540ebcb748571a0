//! Core data model and primitives for the deterministic experiment
//! assignment SDK.
//!
//! This crate owns, and nothing else in the workspace should redefine:
//!
//! - [`error`] — the unified `Error`/`Result` used across every crate.
//! - [`hash`] — the bucket hash function, range/bitmap bucket-info, and
//!   full-flow detection (component C1).
//! - [`types`] — the configuration data model: domains, layers, experiments,
//!   groups, remote-configs.
//! - [`session`] — [`Session`](session::Session) and
//!   [`Options`](session::Options) (component C9).
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod hash;
pub mod session;
pub mod types;

pub use error::{Error, Result};
pub use hash::{bucket, hit_traffic, is_full_flow, BucketInfo, HashMethod, Range};
pub use session::{Options, Session};
pub use types::{
    Domain, DomainMetadata, EventMetricsConfig, Experiment, Group, HashParams, HashType,
    HoldoutDomain, IssueType, Layer, MetricsControl, MultiLayerDomain, RemoteConfig,
    RemoteConfigCondition, TagExpression, TagOperator, TagPredicate, TagValueType, UnitIdType,
};
