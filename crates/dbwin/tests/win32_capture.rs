//! Capture from the real `OutputDebugString` broadcast.
//!
//! Needs the standard DBWIN names to be free: close DebugView and don't run
//! under a debugger (which receives the strings instead).

#![cfg(windows)]

use anyhow::Result;
use dbwin::{output_debug_string, Capture, CaptureSession};
use tempfile::TempDir;

#[test]
fn test_captures_own_output_debug_string() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("win32.log");

    let mut session = CaptureSession::new(&path);
    session.start()?;
    output_debug_string("hello from dbwin")?;
    output_debug_string("second line")?;
    session.stop()?;

    // Other processes may broadcast too, so only look at our own lines
    let prefix = format!("Process {}: ", std::process::id());
    let ours: Vec<String> = std::fs::read_to_string(&path)?
        .lines()
        .filter_map(|line| line.strip_prefix(&prefix).map(str::to_string))
        .collect();

    assert_eq!(ours, vec!["hello from dbwin", "second line"]);
    Ok(())
}
