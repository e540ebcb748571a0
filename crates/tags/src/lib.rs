//! Tag matching (C2) and DMP prefetch/cache (C8).
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dmp;
pub mod matcher;

pub use dmp::{cache_key, get_tag_value, prefetch, DmpClient, MockDmpClient};
pub use matcher::matches;
