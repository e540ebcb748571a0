//! Bridges the refresh pipeline's [`RefreshObserver`] into a monitor-event
//! record, without `abtree-refresh` needing to know telemetry exists.

use crate::queue::Pipeline;
use crate::records::MonitorEventRecord;
use crate::sampling::should_sample;
use abtree_core::EventMetricsConfig;
use abtree_refresh::{RefreshObserver, RefreshOutcome};
use std::sync::Arc;
use std::time::Duration;

/// Forwards every refresh cycle outcome to a [`Pipeline`] as a monitor event.
pub struct TelemetryRefreshObserver {
    pipeline: Arc<Pipeline>,
}

impl TelemetryRefreshObserver {
    /// Wrap `pipeline` as a refresh observer.
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        TelemetryRefreshObserver { pipeline }
    }
}

impl RefreshObserver for TelemetryRefreshObserver {
    fn on_refresh(&self, project: &str, outcome: RefreshOutcome, latency: Duration, metrics: EventMetricsConfig) {
        let kind = match outcome {
            RefreshOutcome::Updated => "refresh.updated",
            RefreshOutcome::SameVersion => "refresh.same_version",
            RefreshOutcome::Failed => "refresh.failed",
        };
        // SAME_VERSION counts as a success outcome for sampling purposes.
        let interval = if outcome == RefreshOutcome::Failed { metrics.err_sampling_interval } else { metrics.sampling_interval };
        if !should_sample(interval) {
            return;
        }
        let record = MonitorEventRecord {
            project: project.to_string(),
            kind: kind.to_string(),
            detail: format!("cycle took {}ms", latency.as_millis()),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        };
        if self.pipeline.enqueue_monitor_event(record).is_err() {
            tracing::warn!(project, "monitor event queue full, dropping refresh-outcome record");
        }
    }
}
