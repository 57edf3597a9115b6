//! Capture sessions: the start/stop surface callers script against.
//!
//! [`CaptureSession`] owns the listener; [`NullSession`] has the same surface
//! and does nothing. [`make_session`] picks one from a flag so calling code
//! keeps a single path:
//!
//! ```rust,no_run
//! use dbwin::{make_session, Capture};
//!
//! # fn run_workload() {}
//! # let log_debug_strings = true;
//! let mut session = make_session(log_debug_strings, "logfile1.txt");
//! session.start().unwrap();
//! run_workload();
//! session.stop().unwrap();
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info};

use crate::capture::run_capture_loop;
use crate::channel::{default_backend, Backend, Channel, ChannelNames};
use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::sink::LogSink;

/// Counters for one start/stop cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Lines written to the log.
    pub messages: u64,
    /// Snapshots that needed lossy decoding or a placeholder.
    pub decode_anomalies: u64,
    /// Messages lost to log write errors.
    pub write_failures: u64,
}

/// The operations shared by every session variant.
pub trait Capture {
    /// Begin capturing. Fails with [`CaptureError::AlreadyRunning`] when
    /// already started.
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Stop capturing and close the log. A no-op returning empty stats when
    /// not running.
    fn stop(&mut self) -> Result<CaptureStats, CaptureError>;

    fn is_running(&self) -> bool;

    /// Start now and stop when the returned guard goes out of scope.
    fn scoped(mut self) -> Result<ScopedCapture<Self>, CaptureError>
    where
        Self: Sized,
    {
        self.start()?;
        Ok(ScopedCapture { inner: self })
    }
}

/// A started session that stops itself on drop.
///
/// Use [`ScopedCapture::finish`] to get the stats and any stop error; plain
/// drop only logs the error.
pub struct ScopedCapture<C: Capture> {
    inner: C,
}

impl<C: Capture> ScopedCapture<C> {
    pub fn get_ref(&self) -> &C {
        &self.inner
    }

    /// Stop the session now.
    pub fn finish(mut self) -> Result<CaptureStats, CaptureError> {
        self.inner.stop()
    }
}

impl<C: Capture> Drop for ScopedCapture<C> {
    fn drop(&mut self) {
        if let Err(e) = self.inner.stop() {
            error!(error = %e, "failed to stop scoped capture session");
        }
    }
}

/// Everything that exists only between start and stop.
struct Running {
    channel: Arc<dyn Channel>,
    thread: JoinHandle<(LogSink, CaptureStats)>,
}

/// Listens on the debug channel and writes every message to a log file.
///
/// At most one session may run against a given set of channel names. Dropping
/// a running session stops it.
pub struct CaptureSession {
    log_path: PathBuf,
    names: ChannelNames,
    backend: Arc<dyn Backend>,
    running: Option<Running>,
}

impl CaptureSession {
    /// Session on the platform's default backend and the standard names.
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self::with_backend(log_path, default_backend())
    }

    pub fn with_backend(log_path: impl Into<PathBuf>, backend: Arc<dyn Backend>) -> Self {
        Self {
            log_path: log_path.into(),
            names: ChannelNames::default(),
            backend,
            running: None,
        }
    }

    /// Listen on different object names.
    pub fn names(mut self, names: ChannelNames) -> Self {
        self.names = names;
        self
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn channel_names(&self) -> &ChannelNames {
        &self.names
    }
}

impl Capture for CaptureSession {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.running.is_some() {
            return Err(CaptureError::AlreadyRunning);
        }

        // Attach first: a refused attach must not truncate an existing log
        let channel = self.backend.attach(&self.names)?;

        let sink = LogSink::create(&self.log_path).map_err(|e| {
            CaptureError::unavailable(format!("log file {}", self.log_path.display()), e)
        })?;

        let loop_channel = Arc::clone(&channel);
        let thread = thread::Builder::new()
            .name("dbwin-capture".to_string())
            .spawn(move || run_capture_loop(loop_channel, sink))
            .map_err(|e| CaptureError::unavailable("capture thread", e))?;

        info!(
            log = %self.log_path.display(),
            backend = self.backend.name(),
            buffer = %self.names.buffer,
            "debug capture started"
        );

        self.running = Some(Running { channel, thread });
        Ok(())
    }

    fn stop(&mut self) -> Result<CaptureStats, CaptureError> {
        let Some(running) = &self.running else {
            return Ok(CaptureStats::default());
        };

        // Still running if this fails, so stop can be retried
        running
            .channel
            .signal_stop()
            .map_err(CaptureError::StopSignal)?;

        let Some(Running { channel, thread }) = self.running.take() else {
            return Ok(CaptureStats::default());
        };

        let (sink, stats) = match thread.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        };

        // Release the channel before closing the log
        drop(channel);

        sink.finish().map_err(|source| CaptureError::LogFlush {
            path: self.log_path.clone(),
            source,
        })?;

        info!(
            log = %self.log_path.display(),
            messages = stats.messages,
            anomalies = stats.decode_anomalies,
            "debug capture stopped"
        );
        Ok(stats)
    }

    fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!(log = %self.log_path.display(), error = %e, "failed to stop capture session");
        }
    }
}

/// Same surface as [`CaptureSession`], captures nothing.
///
/// Never creates the log file and never touches any named object.
#[derive(Debug, Clone, Default)]
pub struct NullSession {
    log_path: PathBuf,
    started: bool,
}

impl NullSession {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            started: false,
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

impl Capture for NullSession {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.started {
            return Err(CaptureError::AlreadyRunning);
        }
        debug!(log = %self.log_path.display(), "debug capture disabled, not listening");
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<CaptureStats, CaptureError> {
        self.started = false;
        Ok(CaptureStats::default())
    }

    fn is_running(&self) -> bool {
        self.started
    }
}

/// Either session variant behind one type.
pub enum Session {
    Capture(CaptureSession),
    Null(NullSession),
}

impl Session {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null(_))
    }

    pub fn log_path(&self) -> &Path {
        match self {
            Self::Capture(s) => s.log_path(),
            Self::Null(s) => s.log_path(),
        }
    }
}

impl Capture for Session {
    fn start(&mut self) -> Result<(), CaptureError> {
        match self {
            Self::Capture(s) => s.start(),
            Self::Null(s) => s.start(),
        }
    }

    fn stop(&mut self) -> Result<CaptureStats, CaptureError> {
        match self {
            Self::Capture(s) => s.stop(),
            Self::Null(s) => s.stop(),
        }
    }

    fn is_running(&self) -> bool {
        match self {
            Self::Capture(s) => s.is_running(),
            Self::Null(s) => s.is_running(),
        }
    }
}

/// Capture into `log_path` when enabled, otherwise a [`NullSession`].
pub fn make_session(capture_enabled: bool, log_path: impl Into<PathBuf>) -> Session {
    if capture_enabled {
        Session::Capture(CaptureSession::new(log_path))
    } else {
        Session::Null(NullSession::new(log_path))
    }
}

/// Build a session from config. Relative log paths land in `log_dir`.
///
/// Fails only when the configured backend does not exist on this host.
pub fn make_session_with(
    config: &CaptureConfig,
    log_path: impl AsRef<Path>,
) -> Result<Session, CaptureError> {
    let log_path = config.resolve_log_path(log_path);
    if !config.enabled {
        return Ok(Session::Null(NullSession::new(log_path)));
    }

    let backend = config.backend.resolve()?;
    Ok(Session::Capture(
        CaptureSession::with_backend(log_path, backend).names(config.names.clone()),
    ))
}

/// Run `f` inside a capture scope and return its result with the stats.
///
/// The session is stopped even if `f` panics.
pub fn capture_scoped<T>(
    capture_enabled: bool,
    log_path: impl Into<PathBuf>,
    f: impl FnOnce() -> T,
) -> Result<(T, CaptureStats), CaptureError> {
    let guard = make_session(capture_enabled, log_path).scoped()?;
    let output = f();
    let stats = guard.finish()?;
    Ok((output, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackBackend;
    use tempfile::TempDir;

    fn loopback(path: PathBuf, tag: &str) -> CaptureSession {
        CaptureSession::with_backend(path, Arc::new(LoopbackBackend))
            .names(ChannelNames::with_prefix(&format!("session-unit-{}", tag)))
    }

    #[test]
    fn test_start_twice_is_already_running() {
        let dir = TempDir::new().unwrap();
        let mut session = loopback(dir.path().join("a.log"), "twice");

        session.start().unwrap();
        assert!(matches!(session.start(), Err(CaptureError::AlreadyRunning)));
        assert!(session.is_running());
        session.stop().unwrap();
        assert!(!session.is_running());
    }

    #[test]
    fn test_restart_after_stop() {
        let dir = TempDir::new().unwrap();
        let mut session = loopback(dir.path().join("a.log"), "restart");

        session.start().unwrap();
        session.stop().unwrap();
        session.start().unwrap();
        assert!(session.is_running());
    }

    #[test]
    fn test_missing_log_dir_leaves_session_unstarted() {
        let dir = TempDir::new().unwrap();
        let names = ChannelNames::with_prefix("session-unit-missing");
        let mut session =
            loopback(dir.path().join("missing").join("a.log"), "missing");

        let err = session.start().unwrap_err();
        assert!(err.is_resource_unavailable());
        assert!(!session.is_running());
        assert!(!crate::loopback::is_listening(&names));
    }

    #[test]
    fn test_drop_stops_running_session() {
        let dir = TempDir::new().unwrap();
        let names = ChannelNames::with_prefix("session-unit-drop");
        {
            let mut session = loopback(dir.path().join("a.log"), "drop");
            session.start().unwrap();
            assert!(crate::loopback::is_listening(&names));
        }
        assert!(!crate::loopback::is_listening(&names));
    }

    /// Channel whose first stop signal fails.
    #[derive(Default)]
    struct StubbornStop {
        stopped: std::sync::Mutex<bool>,
        cond: std::sync::Condvar,
        refusals: std::sync::atomic::AtomicUsize,
    }

    impl Channel for StubbornStop {
        fn signal_buffer_ready(&self) -> std::io::Result<()> {
            Ok(())
        }

        fn wait(&self) -> std::io::Result<crate::channel::Wake> {
            let mut stopped = self.stopped.lock().unwrap();
            while !*stopped {
                stopped = self.cond.wait(stopped).unwrap();
            }
            Ok(crate::channel::Wake::Stop)
        }

        fn read_snapshot(&self, _buf: &mut [u8; crate::channel::CHANNEL_CAPACITY]) {}

        fn signal_stop(&self) -> std::io::Result<()> {
            use std::sync::atomic::Ordering;
            if self.refusals.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "event closed"));
            }
            *self.stopped.lock().unwrap() = true;
            self.cond.notify_all();
            Ok(())
        }
    }

    #[derive(Debug)]
    struct StubbornBackend;

    impl Backend for StubbornBackend {
        fn name(&self) -> &'static str {
            "stubborn"
        }

        fn attach(&self, _names: &ChannelNames) -> Result<Arc<dyn Channel>, CaptureError> {
            Ok(Arc::new(StubbornStop::default()))
        }
    }

    #[test]
    fn test_failed_stop_signal_keeps_session_running() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        let mut session = CaptureSession::with_backend(&path, Arc::new(StubbornBackend));

        session.start().unwrap();
        assert!(matches!(session.stop(), Err(CaptureError::StopSignal(_))));
        assert!(session.is_running());

        // The retry reaches the thread and closes the log
        assert_eq!(session.stop().unwrap(), CaptureStats::default());
        assert!(!session.is_running());
        assert!(path.exists());
    }

    #[test]
    fn test_null_session_surface() {
        let mut session = NullSession::new("never.log");
        assert!(!session.is_running());
        session.start().unwrap();
        assert!(session.is_running());
        assert!(matches!(session.start(), Err(CaptureError::AlreadyRunning)));
        assert_eq!(session.stop().unwrap(), CaptureStats::default());
        assert_eq!(session.stop().unwrap(), CaptureStats::default());
    }

    #[test]
    fn test_factory_picks_variant() {
        assert!(make_session(false, "x.log").is_null());
        assert!(!make_session(true, "x.log").is_null());
        assert_eq!(make_session(true, "x.log").log_path(), Path::new("x.log"));
    }

    #[cfg(unix)]
    #[test]
    fn test_factory_from_disabled_config() {
        let config = CaptureConfig {
            enabled: false,
            log_dir: PathBuf::from("/logs"),
            ..CaptureConfig::default()
        };
        let session = make_session_with(&config, "run.log").unwrap();
        assert!(session.is_null());
        assert_eq!(session.log_path(), Path::new("/logs/run.log"));
    }
}
