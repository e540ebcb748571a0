//! The `MetricsPlugin` extension point: a sink third parties register to
//! receive dispatched records.

use crate::records::{ConfigExposureRecord, EventRecord, ExposureRecord, MonitorEventRecord};
use abtree_core::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

/// A registered telemetry sink. Every method is called from a worker task;
/// panics are caught at the dispatch site (see [`crate::queue`]) so one
/// misbehaving plugin can't take down the pipeline.
#[async_trait]
pub trait MetricsPlugin: Send + Sync {
    /// Short identifying name, used in logs.
    fn name(&self) -> &str;

    /// Called once before the plugin starts receiving records.
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Handle one exposure record.
    fn log_exposure(&self, record: &ExposureRecord);

    /// Handle one remote-config exposure record.
    fn log_config_exposure(&self, record: &ConfigExposureRecord);

    /// Handle one business event record.
    fn log_event(&self, record: &EventRecord);

    /// Handle one internal monitoring record.
    fn log_monitor_event(&self, record: &MonitorEventRecord);

    /// Flush any buffered state to the backing sink. Called periodically
    /// and at shutdown; the default implementation is a no-op for plugins
    /// that write through on every call.
    async fn send_data(&self) -> Result<()> {
        Ok(())
    }
}

/// An in-memory `MetricsPlugin` that records everything it receives.
/// Used by tests and the demo CLI.
#[derive(Default)]
pub struct RecordingPlugin {
    exposures: Mutex<Vec<ExposureRecord>>,
    config_exposures: Mutex<Vec<ConfigExposureRecord>>,
    events: Mutex<Vec<EventRecord>>,
    monitor_events: Mutex<Vec<MonitorEventRecord>>,
}

impl RecordingPlugin {
    /// Snapshot of every exposure received so far.
    pub fn exposures(&self) -> Vec<ExposureRecord> {
        self.exposures.lock().clone()
    }

    /// Snapshot of every config exposure received so far.
    pub fn config_exposures(&self) -> Vec<ConfigExposureRecord> {
        self.config_exposures.lock().clone()
    }

    /// Snapshot of every event received so far.
    pub fn events(&self) -> Vec<EventRecord> {
        self.events.lock().clone()
    }

    /// Snapshot of every monitor event received so far.
    pub fn monitor_events(&self) -> Vec<MonitorEventRecord> {
        self.monitor_events.lock().clone()
    }
}

#[async_trait]
impl MetricsPlugin for RecordingPlugin {
    fn name(&self) -> &str {
        "recording"
    }

    fn log_exposure(&self, record: &ExposureRecord) {
        self.exposures.lock().push(record.clone());
    }

    fn log_config_exposure(&self, record: &ConfigExposureRecord) {
        self.config_exposures.lock().push(record.clone());
    }

    fn log_event(&self, record: &EventRecord) {
        self.events.lock().push(record.clone());
    }

    fn log_monitor_event(&self, record: &MonitorEventRecord) {
        self.monitor_events.lock().push(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_plugin_accumulates_exposures() {
        let plugin = RecordingPlugin::default();
        plugin.log_exposure(&ExposureRecord {
            project: "p".into(),
            unit_id: "u1".into(),
            layer_key: "L".into(),
            experiment_key: None,
            group_key: "g".into(),
            group_id: 1,
            params: Default::default(),
            expansion: Default::default(),
            scene_ids: Vec::new(),
            exposure_type: crate::records::ExposureType::Automatic,
            timestamp_ms: 0,
        });
        assert_eq!(plugin.exposures().len(), 1);
    }
}
