//! The ambient public facade: a process-wide init/release latch plus typed
//! accessors, so application code rarely has to touch `abtree-registry`
//! directly.
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod facade;
pub mod typed;

pub use abtree_assign::ExperimentHit;
pub use abtree_core::{Error, Options, Result, Session};
pub use abtree_tags::{DmpClient, MockDmpClient};
pub use facade::{get_config, get_experiments, init, log_manual_exposure, register_project, release, release_project};
pub use typed::{ConfigValueExt, ParamsExt};
