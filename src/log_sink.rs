//! Append-only file for decoded log lines.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("could not open log file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not write log file: {0}")]
    Write(#[from] io::Error),
}

/// Buffered line writer that flushes every `flush_every` lines and on drop.
pub struct LogSink {
    writer: BufWriter<File>,
    path: PathBuf,
    flush_every: usize,
    pending: usize,
}

impl LogSink {
    /// Opens `path` for appending, creating it if needed.
    pub fn open(path: &Path, flush_every: usize) -> Result<Self, SinkError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| SinkError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        debug!("Appending log lines to {}", path.display());
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            flush_every: flush_every.max(1),
            pending: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_line(&mut self, line: &str) -> Result<(), SinkError> {
        writeln!(self.writer, "{}", line)?;
        self.pending += 1;
        if self.pending >= self.flush_every {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        self.pending = 0;
        Ok(())
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        if let Err(err) = self.writer.flush() {
            warn!("Failed to flush {}: {}", self.path.display(), err);
        }
    }
}
