//! The four record types carried through the exposure pipeline.

use std::collections::HashMap;

/// Distinguishes exposures the engine fired on the caller's behalf from ones
/// a caller logged explicitly through a manual exposure API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureType {
    /// Enqueued by the engine itself because `Options::auto_exposure` was set.
    Automatic,
    /// Enqueued by an explicit caller call to a manual exposure API.
    Manual,
}

/// Emitted when a layer hit is reported to telemetry (automatically, when
/// `Options::auto_exposure` is set, or explicitly by the caller).
#[derive(Debug, Clone)]
pub struct ExposureRecord {
    /// Owning project.
    pub project: String,
    /// The id the bucket decision was made against.
    pub unit_id: String,
    /// Layer this exposure belongs to.
    pub layer_key: String,
    /// Experiment key, for double-hash layers.
    pub experiment_key: Option<String>,
    /// Winning group key.
    pub group_key: String,
    /// Winning group id.
    pub group_id: u64,
    /// The group's parameters at exposure time.
    pub params: HashMap<String, String>,
    /// Caller-supplied expansion fields, carried from the session.
    pub expansion: HashMap<String, String>,
    /// Scene ids the winning group/layer carries, semicolon-joinable by sinks.
    pub scene_ids: Vec<String>,
    /// Whether this exposure was fired automatically or logged manually.
    pub exposure_type: ExposureType,
    /// Unix millis.
    pub timestamp_ms: i64,
}

/// Emitted when a remote-config/feature-flag read is reported to telemetry.
#[derive(Debug, Clone)]
pub struct ConfigExposureRecord {
    /// Owning project.
    pub project: String,
    /// The id the read was made against.
    pub unit_id: String,
    /// Remote-config key.
    pub config_key: String,
    /// The raw value returned.
    pub value: Vec<u8>,
    /// Unix millis.
    pub timestamp_ms: i64,
}

/// A caller-defined business event (e.g. a conversion), tagged with the
/// experiments active for the unit at the time it fired.
#[derive(Debug, Clone)]
pub struct EventRecord {
    /// Owning project.
    pub project: String,
    /// The id the event is attributed to.
    pub unit_id: String,
    /// Event name.
    pub name: String,
    /// Caller-supplied event properties.
    pub properties: HashMap<String, String>,
    /// Unix millis.
    pub timestamp_ms: i64,
}

/// An SDK-internal monitoring signal (refresh outcomes, DMP/transport
/// failures) reported to telemetry for operational visibility, distinct
/// from business exposure/event data.
#[derive(Debug, Clone)]
pub struct MonitorEventRecord {
    /// Owning project, when applicable.
    pub project: String,
    /// Short machine-readable kind, e.g. `"refresh.updated"`, `"dmp.failed"`.
    pub kind: String,
    /// Free-form detail, human-readable.
    pub detail: String,
    /// Unix millis.
    pub timestamp_ms: i64,
}
