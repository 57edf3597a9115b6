//! The debug broadcast channel as seen by a listener.
//!
//! Layout of the shared section (4096 bytes):
//!
//! ```text
//! +----------------+-----------------------------------------+
//! | pid (u32, LE)  | message bytes, NUL terminated if short  |
//! | 4 bytes        | 4092 bytes                              |
//! +----------------+-----------------------------------------+
//! ```
//!
//! Handshake, one message in flight at a time:
//!
//! ```text
//! listener                         broadcaster
//!    │ set buffer-ready ──────────────▶ │ wait buffer-ready
//!    │                                  │ write pid + text
//!    │ wait {data-ready, stop} ◀─────── │ set data-ready
//!    │ read snapshot, log it            │
//!    └─ repeat                          │
//! ```

use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::CaptureError;

/// Total size of the shared section.
pub const CHANNEL_CAPACITY: usize = 4096;

/// Size of the process id prefix.
pub const PID_LEN: usize = 4;

/// Bytes left for message text after the pid.
pub const PAYLOAD_CAPACITY: usize = CHANNEL_CAPACITY - PID_LEN;

/// Names of the well-known objects making up one channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelNames {
    /// Shared section carrying pid + text.
    #[serde(rename = "buffer_name")]
    pub buffer: String,

    /// Listener -> broadcasters: the section may be written.
    #[serde(rename = "buffer_ready_name")]
    pub buffer_ready: String,

    /// Broadcaster -> listener: a message is in the section.
    #[serde(rename = "data_ready_name")]
    pub data_ready: String,
}

impl Default for ChannelNames {
    fn default() -> Self {
        Self {
            buffer: "DBWIN_BUFFER".to_string(),
            buffer_ready: "DBWIN_BUFFER_READY".to_string(),
            data_ready: "DBWIN_DATA_READY".to_string(),
        }
    }
}

impl ChannelNames {
    /// Default names with a prefix, for a private channel that no stock
    /// broadcaster will find.
    pub fn with_prefix(prefix: &str) -> Self {
        let defaults = Self::default();
        Self {
            buffer: format!("{}_{}", prefix, defaults.buffer),
            buffer_ready: format!("{}_{}", prefix, defaults.buffer_ready),
            data_ready: format!("{}_{}", prefix, defaults.data_ready),
        }
    }
}

/// Which signal woke a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Data,
    Stop,
}

/// Listener side of an attached channel.
///
/// Shared between the session (which only raises stop) and the capture
/// thread (which runs the handshake). Dropping the last reference releases
/// the attachment.
pub trait Channel: Send + Sync {
    /// Tell broadcasters the section may be written.
    fn signal_buffer_ready(&self) -> io::Result<()>;

    /// Block until data-ready or stop. When both are set, data-ready wins.
    fn wait(&self) -> io::Result<Wake>;

    /// Copy the whole section.
    fn read_snapshot(&self, buf: &mut [u8; CHANNEL_CAPACITY]);

    /// Wake the listener with [`Wake::Stop`]. Private to this attachment.
    fn signal_stop(&self) -> io::Result<()>;
}

/// Provider of channels.
pub trait Backend: Send + Sync + fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Create or open the signals and attach the shared section.
    ///
    /// Fails with [`CaptureError::ResourceUnavailable`] when another listener
    /// already holds `names`, or when any object cannot be created. Anything
    /// acquired before the failure is released again.
    fn attach(&self, names: &ChannelNames) -> Result<Arc<dyn Channel>, CaptureError>;
}

/// Backend selection, as written in config files and on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// win32 on Windows, loopback elsewhere.
    #[default]
    Auto,
    Win32,
    Loopback,
}

#[derive(Debug, Error)]
#[error("unknown backend '{0}', expected auto, win32 or loopback")]
pub struct ParseBackendError(String);

impl FromStr for BackendKind {
    type Err = ParseBackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "win32" | "windows" => Ok(Self::Win32),
            "loopback" => Ok(Self::Loopback),
            other => Err(ParseBackendError(other.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Auto => "auto",
            Self::Win32 => "win32",
            Self::Loopback => "loopback",
        };
        f.write_str(name)
    }
}

impl BackendKind {
    /// Instantiate the backend.
    pub fn resolve(self) -> Result<Arc<dyn Backend>, CaptureError> {
        match self {
            Self::Auto => Ok(default_backend()),
            Self::Loopback => Ok(Arc::new(crate::loopback::LoopbackBackend)),
            #[cfg(windows)]
            Self::Win32 => Ok(Arc::new(crate::win32::Win32Backend)),
            #[cfg(not(windows))]
            Self::Win32 => Err(CaptureError::Unsupported("win32 backend")),
        }
    }
}

/// The backend used when none is configured.
pub fn default_backend() -> Arc<dyn Backend> {
    #[cfg(windows)]
    {
        Arc::new(crate::win32::Win32Backend)
    }
    #[cfg(not(windows))]
    {
        Arc::new(crate::loopback::LoopbackBackend)
    }
}
