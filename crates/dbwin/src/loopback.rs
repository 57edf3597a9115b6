//! In-process channel with the same handshake as the Windows broadcast.
//!
//! Channels live in a process-wide registry keyed by buffer name, so a
//! [`LoopbackBroadcaster`] finds the listener by name the way
//! `OutputDebugString` finds `DBWIN_BUFFER`. Signals are auto-reset flags
//! under one mutex and condvar.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use tracing::debug;

use crate::channel::{Backend, Channel, ChannelNames, Wake, CHANNEL_CAPACITY, PAYLOAD_CAPACITY, PID_LEN};
use crate::error::CaptureError;

/// How long a broadcaster waits for buffer-ready, same as `OutputDebugString`.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

struct LoopbackState {
    buffer: Box<[u8; CHANNEL_CAPACITY]>,
    buffer_ready: bool,
    data_ready: bool,
    stop: bool,
    listening: bool,
}

struct Shared {
    state: Mutex<LoopbackState>,
    cond: Condvar,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(LoopbackState {
                buffer: Box::new([0u8; CHANNEL_CAPACITY]),
                buffer_ready: false,
                data_ready: false,
                stop: false,
                listening: false,
            }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn registry() -> &'static Mutex<HashMap<String, Arc<Shared>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<Shared>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn lookup(names: &ChannelNames) -> Arc<Shared> {
    let mut map = registry().lock().unwrap_or_else(|e| e.into_inner());
    Arc::clone(
        map.entry(names.buffer.clone())
            .or_insert_with(|| Arc::new(Shared::new())),
    )
}

/// Forget the entry for `buffer_name` once `shared` is its last user.
///
/// Called from drop, while the caller still holds its own reference.
fn release(buffer_name: &str, shared: &Arc<Shared>) {
    let mut map = registry().lock().unwrap_or_else(|e| e.into_inner());
    let idle = match map.get(buffer_name) {
        // The map and the caller
        Some(entry) => Arc::ptr_eq(entry, shared) && Arc::strong_count(shared) <= 2,
        None => false,
    };
    if idle && !shared.lock().listening {
        map.remove(buffer_name);
    }
}

/// True while a listener holds the loopback channel for `names`.
pub fn is_listening(names: &ChannelNames) -> bool {
    let map = registry().lock().unwrap_or_else(|e| e.into_inner());
    map.get(&names.buffer)
        .map(|shared| shared.lock().listening)
        .unwrap_or(false)
}

/// Backend producing in-process channels.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopbackBackend;

impl Backend for LoopbackBackend {
    fn name(&self) -> &'static str {
        "loopback"
    }

    fn attach(&self, names: &ChannelNames) -> Result<Arc<dyn Channel>, CaptureError> {
        let shared = lookup(names);
        {
            let mut state = shared.lock();
            if state.listening {
                return Err(CaptureError::unavailable(
                    format!("channel {}", names.buffer),
                    io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        "another listener holds this channel",
                    ),
                ));
            }
            state.listening = true;
            state.buffer_ready = false;
            state.data_ready = false;
            state.stop = false;
        }

        debug!(buffer = %names.buffer, "attached loopback channel");
        Ok(Arc::new(LoopbackChannel {
            shared,
            buffer_name: names.buffer.clone(),
        }))
    }
}

/// Listener attachment to a loopback channel. Detaches on drop.
struct LoopbackChannel {
    shared: Arc<Shared>,
    buffer_name: String,
}

impl Channel for LoopbackChannel {
    fn signal_buffer_ready(&self) -> io::Result<()> {
        self.shared.lock().buffer_ready = true;
        self.shared.cond.notify_all();
        Ok(())
    }

    fn wait(&self) -> io::Result<Wake> {
        let mut state = self.shared.lock();
        loop {
            if state.data_ready {
                state.data_ready = false;
                return Ok(Wake::Data);
            }
            if state.stop {
                state.stop = false;
                return Ok(Wake::Stop);
            }
            state = self
                .shared
                .cond
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    fn read_snapshot(&self, buf: &mut [u8; CHANNEL_CAPACITY]) {
        buf.copy_from_slice(&self.shared.lock().buffer[..]);
    }

    fn signal_stop(&self) -> io::Result<()> {
        self.shared.lock().stop = true;
        self.shared.cond.notify_all();
        Ok(())
    }
}

impl Drop for LoopbackChannel {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.listening = false;
        state.buffer_ready = false;
        state.data_ready = false;
        state.stop = false;
        drop(state);
        // Wake broadcasters parked on buffer-ready
        self.shared.cond.notify_all();
        release(&self.buffer_name, &self.shared);
        debug!(buffer = %self.buffer_name, "detached loopback channel");
    }
}

/// Outcome of one [`LoopbackBroadcaster::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Written to the channel and data-ready raised.
    Delivered,
    /// Nobody is listening; the message was dropped.
    NoListener,
    /// The listener never signalled buffer-ready in time.
    TimedOut,
}

/// Producer side of a loopback channel.
///
/// Follows the broadcaster convention: wait for buffer-ready, write
/// `pid | text | NUL`, raise data-ready, return without waiting for the
/// listener to consume the message.
#[derive(Clone)]
pub struct LoopbackBroadcaster {
    shared: Arc<Shared>,
    buffer_name: String,
    pid: u32,
    timeout: Duration,
}

impl LoopbackBroadcaster {
    /// Open the channel by name. Works whether or not a listener is attached.
    pub fn open(names: &ChannelNames) -> Self {
        Self {
            shared: lookup(names),
            buffer_name: names.buffer.clone(),
            pid: std::process::id(),
            timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Report messages as coming from `pid`.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn send(&self, text: &str) -> Delivery {
        self.send_from(self.pid, text.as_bytes())
    }

    /// Send raw bytes as `pid`.
    ///
    /// Text longer than the payload area is cut. Text that exactly fills it
    /// is written without a terminating NUL.
    pub fn send_from(&self, pid: u32, text: &[u8]) -> Delivery {
        let state = self.shared.lock();
        let (mut state, timeout) = self
            .shared
            .cond
            .wait_timeout_while(state, self.timeout, |s| s.listening && !s.buffer_ready)
            .unwrap_or_else(|e| e.into_inner());

        if !state.listening {
            return Delivery::NoListener;
        }
        if timeout.timed_out() && !state.buffer_ready {
            return Delivery::TimedOut;
        }

        // Acquire: buffer-ready is auto-reset
        state.buffer_ready = false;

        let len = text.len().min(PAYLOAD_CAPACITY);
        state.buffer[..PID_LEN].copy_from_slice(&pid.to_le_bytes());
        state.buffer[PID_LEN..PID_LEN + len].copy_from_slice(&text[..len]);
        if len < PAYLOAD_CAPACITY {
            state.buffer[PID_LEN + len] = 0;
        }

        state.data_ready = true;
        drop(state);
        self.shared.cond.notify_all();
        Delivery::Delivered
    }
}

impl Drop for LoopbackBroadcaster {
    fn drop(&mut self) {
        release(&self.buffer_name, &self.shared);
    }
}
