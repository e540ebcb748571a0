//! The process-wide facade: a one-shot init/release latch around a single
//! [`Registry`], so application code doesn't have to thread one through by
//! hand. Anything that wants multiple independent registries in one
//! process should build [`Registry`] directly instead.

use abtree_assign::ExperimentHit;
use abtree_core::{Error, Options, Result, Session};
use abtree_refresh::ControlPlaneClient;
use abtree_registry::Registry;
use abtree_tags::DmpClient;
use abtree_telemetry::MetricsPlugin;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

static REGISTRY: Lazy<RwLock<Option<Arc<Registry>>>> = Lazy::new(|| RwLock::new(None));

/// Initialise the process-wide registry. Only the first call wins; a second
/// call before [`release`] returns an error rather than silently replacing
/// the transports a prior caller wired up.
pub fn init(client: Arc<dyn ControlPlaneClient>, dmp: Arc<dyn DmpClient>, plugins: Vec<Arc<dyn MetricsPlugin>>) -> Result<()> {
    let mut guard = REGISTRY.write();
    if guard.is_some() {
        return Err(Error::Internal("abtree already initialised".into()));
    }
    *guard = Some(Arc::new(Registry::new(client, dmp, plugins)));
    Ok(())
}

/// Tear down the process-wide registry, releasing every registered
/// project's background refresh loop. A later [`init`] call starts fresh.
pub fn release() {
    *REGISTRY.write() = None;
}

fn registry() -> Result<Arc<Registry>> {
    REGISTRY.read().clone().ok_or_else(|| Error::Internal("abtree not initialised, call abtree_api::init first".into()))
}

/// Start tracking a project against the process-wide registry.
pub fn register_project(project: impl Into<String>) -> Result<()> {
    registry()?.register_project(project);
    Ok(())
}

/// Stop tracking a project against the process-wide registry.
pub fn release_project(project: &str) -> Result<()> {
    registry()?.release_project(project);
    Ok(())
}

/// Resolve every matching layer for `session` within `project`.
pub async fn get_experiments(project: &str, session: &Session, options: &mut Options) -> Result<HashMap<String, ExperimentHit>> {
    registry()?.get_experiments(project, session, options).await
}

/// Resolve one remote-config key for `session` within `project`.
pub async fn get_config(project: &str, session: &Session, options: &mut Options, key: &str) -> Result<Vec<u8>> {
    registry()?.get_config(project, session, options, key).await
}

/// Explicitly log an exposure for a hit already obtained from
/// [`get_experiments`], independent of `Options::auto_exposure`. Use this
/// when exposure should be reported only once real business logic consumed
/// the assignment, rather than the moment it was computed.
pub fn log_manual_exposure(project: &str, session: &Session, hit: &ExperimentHit) -> Result<()> {
    registry()?.log_manual_exposure(project, session, hit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use abtree_refresh::MockControlPlaneClient;
    use abtree_tags::MockDmpClient;
    use std::sync::Mutex as StdMutex;

    // Serialises tests against the process-wide latch; init/release affect
    // global state shared across this crate's whole test binary.
    static LATCH: StdMutex<()> = StdMutex::new(());

    #[test]
    fn double_init_is_rejected() {
        let _guard = LATCH.lock().unwrap();
        release();
        let client = Arc::new(MockControlPlaneClient::default());
        let dmp = Arc::new(MockDmpClient::default());
        assert!(init(client.clone(), dmp.clone(), vec![]).is_ok());
        assert!(init(client, dmp, vec![]).is_err());
        release();
    }

    #[test]
    fn calls_before_init_fail_cleanly() {
        let _guard = LATCH.lock().unwrap();
        release();
        assert!(matches!(register_project("p1"), Err(Error::Internal(_))));
    }
}
