//! Progress-aware logging
//!
//! While download bars are drawn, writing straight to stderr tears the bars
//! apart. Log lines are buffered per event and printed while the bars are
//! hidden with [`MultiProgress::suspend`].

use indicatif::MultiProgress;
use std::io::{self, Write};
use tracing_subscriber::fmt::MakeWriter;

/// `MakeWriter` that routes formatted log lines around the progress bars
#[derive(Clone)]
pub struct ProgressLogWriter {
    multi: MultiProgress,
}

impl ProgressLogWriter {
    pub fn new(multi: MultiProgress) -> Self {
        Self { multi }
    }
}

impl<'a> MakeWriter<'a> for ProgressLogWriter {
    type Writer = SuspendedStderr;

    fn make_writer(&'a self) -> Self::Writer {
        SuspendedStderr {
            multi: self.multi.clone(),
            buf: Vec::new(),
        }
    }
}

/// Buffers one log event and prints it when flushed or dropped
pub struct SuspendedStderr {
    multi: MultiProgress,
    buf: Vec<u8>,
}

impl Write for SuspendedStderr {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let buf = std::mem::take(&mut self.buf);
        self.multi.suspend(|| {
            let mut stderr = io::stderr().lock();
            stderr.write_all(&buf)?;
            stderr.flush()
        })
    }
}

impl Drop for SuspendedStderr {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
