//! Supervisor's end of a daemon's captured output.
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

/// One read from a captured output stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A line of output, including its trailing newline when one was written.
    /// Invalid UTF-8 is replaced rather than rejected.
    Data(String),
    /// The child side of the pipe is closed and everything has been read.
    Eof,
}

/// Read end of the pipe a captured child writes its stdout and stderr into.
///
/// The descriptor is close-on-exec, so it never leaks into processes spawned
/// later by the supervisor.
#[derive(Debug)]
pub struct OutputStream {
    reader: BufReader<File>,
}

impl OutputStream {
    pub(crate) fn from_fd(fd: OwnedFd) -> Self {
        Self {
            reader: BufReader::new(File::from(fd)),
        }
    }

    /// Reads a single line, blocking until one is complete or the writer side
    /// is closed.
    pub fn read_line(&mut self) -> io::Result<Line> {
        let mut buf = Vec::new();
        if self.reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(Line::Eof);
        }
        Ok(Line::Data(String::from_utf8_lossy(&buf).into_owned()))
    }

    /// Returns `true` when data is already buffered in-process.
    ///
    /// Buffered bytes are invisible to `poll(2)`, so a multiplexing loop
    /// should keep calling [`read_line`](Self::read_line) while this holds.
    pub fn has_buffered_data(&self) -> bool {
        !self.reader.buffer().is_empty()
    }
}

impl AsRawFd for OutputStream {
    fn as_raw_fd(&self) -> RawFd {
        self.reader.get_ref().as_raw_fd()
    }
}
