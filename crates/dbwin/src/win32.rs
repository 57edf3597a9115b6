//! The real `OutputDebugString` broadcast (Windows).
//!
//! The listener creates the pagefile-backed `DBWIN_BUFFER` section and the
//! two auto-reset events. `OutputDebugString` in any process opens them by
//! name. Creating the section when it already exists means another listener
//! (DebugView, a debugger helper, another session) holds it, and attach is
//! refused rather than racing it for messages.

use std::ffi::OsStr;
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};
use std::sync::Arc;

use tracing::debug;
use windows_sys::Win32::Foundation::{
    GetLastError, ERROR_ALREADY_EXISTS, HANDLE, INVALID_HANDLE_VALUE, WAIT_FAILED, WAIT_OBJECT_0,
};
use windows_sys::Win32::System::Diagnostics::Debug::OutputDebugStringW;
use windows_sys::Win32::System::Memory::{
    CreateFileMappingW, MapViewOfFile, UnmapViewOfFile, FILE_MAP_READ,
    MEMORY_MAPPED_VIEW_ADDRESS, PAGE_READWRITE,
};
use windows_sys::Win32::System::Threading::{CreateEventW, SetEvent, WaitForMultipleObjects, INFINITE};

use crate::channel::{Backend, Channel, ChannelNames, Wake, CHANNEL_CAPACITY};
use crate::error::CaptureError;

fn wide(s: &str) -> Vec<u16> {
    OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
}

fn raw(handle: &OwnedHandle) -> HANDLE {
    handle.as_raw_handle() as HANDLE
}

/// Take ownership of a handle returned by a Win32 call, or the last error.
fn owned(handle: HANDLE) -> io::Result<OwnedHandle> {
    if handle.is_null() || handle == INVALID_HANDLE_VALUE {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: handle is valid and nothing else owns it
    Ok(unsafe { OwnedHandle::from_raw_handle(handle as _) })
}

fn create_event(name: Option<&str>) -> io::Result<OwnedHandle> {
    let name = name.map(wide);
    let name_ptr = name.as_ref().map_or(std::ptr::null(), |n| n.as_ptr());
    // Auto-reset, initially unsignalled
    owned(unsafe { CreateEventW(std::ptr::null(), 0, 0, name_ptr) })
}

/// Backend over the named kernel objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct Win32Backend;

impl Backend for Win32Backend {
    fn name(&self) -> &'static str {
        "win32"
    }

    fn attach(&self, names: &ChannelNames) -> Result<Arc<dyn Channel>, CaptureError> {
        let buffer_name = wide(&names.buffer);
        let mapping = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                std::ptr::null(),
                PAGE_READWRITE,
                0,
                CHANNEL_CAPACITY as u32,
                buffer_name.as_ptr(),
            )
        };
        // Read before anything else can overwrite the thread's last error
        let already_exists = unsafe { GetLastError() } == ERROR_ALREADY_EXISTS;
        let mapping = owned(mapping)
            .map_err(|e| CaptureError::unavailable(format!("channel {}", names.buffer), e))?;
        if already_exists {
            return Err(CaptureError::unavailable(
                format!("channel {}", names.buffer),
                io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "another listener holds this channel",
                ),
            ));
        }

        let buffer_ready = create_event(Some(&names.buffer_ready)).map_err(|e| {
            CaptureError::unavailable(format!("signal {}", names.buffer_ready), e)
        })?;
        let data_ready = create_event(Some(&names.data_ready)).map_err(|e| {
            CaptureError::unavailable(format!("signal {}", names.data_ready), e)
        })?;
        let stop = create_event(None)
            .map_err(|e| CaptureError::unavailable("stop signal", e))?;

        let view = unsafe { MapViewOfFile(raw(&mapping), FILE_MAP_READ, 0, 0, CHANNEL_CAPACITY) };
        if view.Value.is_null() {
            return Err(CaptureError::unavailable(
                format!("view of {}", names.buffer),
                io::Error::last_os_error(),
            ));
        }

        debug!(buffer = %names.buffer, "attached win32 debug channel");
        Ok(Arc::new(Win32Channel {
            view,
            mapping,
            buffer_ready,
            data_ready,
            stop,
        }))
    }
}

/// An attached `DBWIN_BUFFER` plus its events. Unmaps and closes on drop.
struct Win32Channel {
    view: MEMORY_MAPPED_VIEW_ADDRESS,
    // Closed after the view is unmapped
    mapping: OwnedHandle,
    buffer_ready: OwnedHandle,
    data_ready: OwnedHandle,
    stop: OwnedHandle,
}

// SAFETY: the view is only read through `read_snapshot`, and the mapping
// outlives it. Event handles are safe to use from any thread.
unsafe impl Send for Win32Channel {}
unsafe impl Sync for Win32Channel {}

fn set_event(handle: &OwnedHandle) -> io::Result<()> {
    if unsafe { SetEvent(raw(handle)) } == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl Channel for Win32Channel {
    fn signal_buffer_ready(&self) -> io::Result<()> {
        set_event(&self.buffer_ready)
    }

    fn wait(&self) -> io::Result<Wake> {
        // Lowest index wins when both are signalled: data before stop
        let handles = [raw(&self.data_ready), raw(&self.stop)];
        let result = unsafe { WaitForMultipleObjects(2, handles.as_ptr(), 0, INFINITE) };
        match result {
            r if r == WAIT_OBJECT_0 => Ok(Wake::Data),
            r if r == WAIT_OBJECT_0 + 1 => Ok(Wake::Stop),
            WAIT_FAILED => Err(io::Error::last_os_error()),
            other => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("unexpected wait result {:#x}", other),
            )),
        }
    }

    fn read_snapshot(&self, buf: &mut [u8; CHANNEL_CAPACITY]) {
        // SAFETY: the view maps CHANNEL_CAPACITY readable bytes for our lifetime
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.view.Value as *const u8,
                buf.as_mut_ptr(),
                CHANNEL_CAPACITY,
            );
        }
    }

    fn signal_stop(&self) -> io::Result<()> {
        set_event(&self.stop)
    }
}

impl Drop for Win32Channel {
    fn drop(&mut self) {
        unsafe {
            UnmapViewOfFile(self.view);
        }
        debug!(mapping = ?self.mapping, "released win32 debug channel");
    }
}

/// Emit `text` through `OutputDebugStringW`.
pub fn output_debug_string(text: &str) {
    let text = wide(text);
    unsafe { OutputDebugStringW(text.as_ptr()) };
}
