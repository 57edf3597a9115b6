//! Log file the capture loop appends to.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::message::DebugMessage;

/// Buffered, truncating log writer. One line per message.
pub struct LogSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl LogSink {
    /// Create the file, truncating anything already there.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `Process {pid}: {text}\n`.
    pub fn write_message(&mut self, message: &DebugMessage) -> io::Result<()> {
        writeln!(self.writer, "{}", message)
    }

    /// Flush buffered lines and close the file.
    pub fn finish(self) -> io::Result<()> {
        let file = self.writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()
    }
}
