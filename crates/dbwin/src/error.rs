//! Capture session errors.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by capture sessions and backends.
///
/// Malformed messages never show up here: they are recovered inside the
/// capture loop and only counted in [`CaptureStats`](crate::CaptureStats).
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The log file, the shared channel or one of its signals could not be
    /// acquired. Nothing stays attached when this is returned.
    #[error("{resource} unavailable: {source}")]
    ResourceUnavailable {
        resource: String,
        #[source]
        source: io::Error,
    },

    #[error("capture session is already running")]
    AlreadyRunning,

    /// The stop signal could not be raised. The session is still running
    /// and `stop()` may be called again.
    #[error("failed to signal the capture thread to stop: {0}")]
    StopSignal(#[source] io::Error),

    #[error("failed to flush log {path}: {source}")]
    LogFlush {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

impl CaptureError {
    pub(crate) fn unavailable(resource: impl Into<String>, source: io::Error) -> Self {
        Self::ResourceUnavailable {
            resource: resource.into(),
            source,
        }
    }

    /// True for [`CaptureError::ResourceUnavailable`].
    pub fn is_resource_unavailable(&self) -> bool {
        matches!(self, Self::ResourceUnavailable { .. })
    }
}
