//! Error types for the assignment SDK.
//!
//! `thiserror` gives us `Display`/`Error` impls; `Result<T>` is the alias used
//! across every crate in this workspace.
//!
//! ### Error categories
//!
//! - **Builder**: a `Session` was constructed with invalid ids; every call on
//!   that session short-circuits with the stored error.
//! - **Lookup**: a project, key, or layer referenced by the caller does not
//!   exist in the current snapshot.
//! - **Snapshot**: the refresh pipeline failed to fetch or apply a config
//!   update; the previous snapshot is kept and the cycle retries.
//! - **Dmp**: a tag-platform lookup failed in transport; callers never see
//!   this directly, the predicate degrades to `false`.
//! - **Telemetry**: an exposure/event record could not be enqueued.
//! - **Internal**: something that should be unreachable, usually surfaced
//!   from a caught panic.
//!
//! ```ignore
//! match result {
//!     Err(Error::ProjectNotFound(id)) => println!("unknown project {id}"),
//!     Err(e) if e.is_internal() => println!("bug: {e}"),
//!     Err(e) => println!("error: {e}"),
//!     Ok(value) => { /* success */ }
//! }
//! ```

use thiserror::Error;

/// Result type alias used throughout the assignment SDK.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for every public operation in the SDK.
#[derive(Debug, Error, Clone)]
pub enum Error {
    /// Raised when a [`crate::session::Session`] was built with an empty or
    /// otherwise invalid unit id. Stored on the session; every subsequent
    /// call against it returns this same error.
    #[error("invalid session: {0}")]
    Builder(String),

    /// No snapshot is registered for the given project.
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    /// A remote-config or feature-flag key is absent from the snapshot.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// A caller-supplied option failed validation (e.g. empty project list).
    #[error("invalid option: {0}")]
    Option(String),

    /// The refresh pipeline failed to fetch or apply a control-plane update.
    #[error("snapshot refresh failed: {0}")]
    Snapshot(String),

    /// A DMP (tag platform) lookup failed in transport. Never surfaced to
    /// callers directly; the owning predicate degrades to `false`.
    #[error("dmp lookup failed: {0}")]
    Dmp(String),

    /// An exposure or event record could not be enqueued because its queue
    /// was at capacity. The record is dropped; the assignment result itself
    /// is unaffected.
    #[error("exposure queue full: {0}")]
    QueueFull(String),

    /// A telemetry plugin panicked while dispatching a record. The panic was
    /// caught; the worker that caught it keeps running.
    #[error("plugin panic: {0}")]
    PluginPanic(String),

    /// Something unreachable happened and was caught by a top-level guard.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for errors that indicate a bug or unreachable state rather than
    /// an expected runtime condition.
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::Internal(_) | Error::PluginPanic(_))
    }

    /// True for errors that should never be surfaced to a caller and are
    /// only ever logged (queue overflow, DMP transport failures).
    pub fn is_silent(&self) -> bool {
        matches!(self, Error::QueueFull(_) | Error::Dmp(_) | Error::PluginPanic(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_classification() {
        assert!(Error::Internal("boom".into()).is_internal());
        assert!(!Error::KeyNotFound("k".into()).is_internal());
    }

    #[test]
    fn silent_classification() {
        assert!(Error::QueueFull("experiment-exposure".into()).is_silent());
        assert!(!Error::ProjectNotFound("p".into()).is_silent());
    }
}
