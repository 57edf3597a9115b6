//! Debug output capture for scripted runs.
//!
//! Listens on the host-wide `OutputDebugString` broadcast (the `DBWIN_BUFFER`
//! shared section and its `DBWIN_BUFFER_READY` / `DBWIN_DATA_READY` events)
//! and writes every message to a log file, one line per message:
//!
//! ```text
//! Process 100: foo
//! Process 200: baz
//! ```
//!
//! An orchestration script wraps each monitored run in a session and gets one
//! log per run, without keeping an interactive viewer open.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use dbwin::{make_session, Capture};
//!
//! // One code path whether capture is enabled or not
//! let guard = make_session(true, "run-1.log").scoped().unwrap();
//! // ... launch the monitored program and wait for it ...
//! let stats = guard.finish().unwrap();
//! println!("captured {} messages", stats.messages);
//! ```
//!
//! # Backends
//!
//! - **win32**: the real named kernel objects (Windows only).
//! - **loopback**: an in-process channel with the same handshake, used by
//!   tests and on hosts without the Windows broadcast.
//!
//! Only one listener may hold a channel at a time. A second session against
//! the same names fails to start with [`CaptureError::ResourceUnavailable`].
//!
//! # Configuration
//!
//! See [`CaptureConfig`]. Environment variables:
//! - `DBWIN_ENABLED`: "false" or "0" turns capture into a no-op
//! - `DBWIN_LOG_DIR`: directory for relative log paths
//! - `DBWIN_BACKEND`: `auto`, `win32` or `loopback`

pub mod broadcast;
mod capture;
pub mod channel;
pub mod config;
pub mod error;
pub mod loopback;
pub mod message;
pub mod session;
pub mod sink;
#[cfg(windows)]
pub mod win32;

// Re-exports for convenience
pub use broadcast::output_debug_string;
pub use channel::{
    Backend, BackendKind, Channel, ChannelNames, Wake, CHANNEL_CAPACITY, PAYLOAD_CAPACITY,
    PID_LEN,
};
pub use config::{CaptureConfig, ConfigError, ConfigSources};
pub use error::CaptureError;
pub use loopback::{Delivery, LoopbackBackend, LoopbackBroadcaster};
pub use message::{DebugMessage, DecodeAnomaly};
pub use session::{
    capture_scoped, make_session, make_session_with, Capture, CaptureSession, CaptureStats,
    NullSession, ScopedCapture, Session,
};
