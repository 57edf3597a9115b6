//! Producing debug output from this process.

use crate::error::CaptureError;

/// Send `text` to whoever listens on the host debug broadcast.
///
/// Returns [`CaptureError::Unsupported`] off Windows, where there is no
/// host-wide broadcast to write to. In-process producers on those hosts use
/// [`LoopbackBroadcaster`](crate::LoopbackBroadcaster) instead.
pub fn output_debug_string(text: &str) -> Result<(), CaptureError> {
    #[cfg(windows)]
    {
        crate::win32::output_debug_string(text);
        Ok(())
    }
    #[cfg(not(windows))]
    {
        let _ = text;
        Err(CaptureError::Unsupported("OutputDebugString"))
    }
}
