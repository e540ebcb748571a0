//! The exposure pipeline: bounded queues, a fixed worker pool, and the
//! `MetricsPlugin` extension point (component C7).
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod observer;
pub mod plugin;
pub mod queue;
pub mod records;
pub mod sampling;

pub use observer::TelemetryRefreshObserver;
pub use plugin::{MetricsPlugin, RecordingPlugin};
pub use queue::{Pipeline, DEFAULT_QUEUE_CAPACITY};
pub use records::{ConfigExposureRecord, EventRecord, ExposureRecord, ExposureType, MonitorEventRecord};
pub use sampling::should_sample;
