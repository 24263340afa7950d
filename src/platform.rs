use log::debug;
use std::io::{self, Write};
use std::process;
use std::sync::{Arc, Mutex, MutexGuard};

/// Standard Unix exit codes used by the binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    InvalidUsage = 2,
}

impl ExitCode {
    pub fn exit(self) -> ! {
        process::exit(self as i32)
    }
}

struct SinkState {
    writer: Box<dyn Write + Send>,
    closed: bool,
}

/// Line-oriented console writer shared by direct prints and the forwarder
///
/// Each line is written and flushed under one lock, so concurrent callers
/// never split each other's lines. A broken pipe closes the sink quietly;
/// later lines are discarded.
pub struct ConsoleSink {
    state: Mutex<SinkState>,
}

impl ConsoleSink {
    pub fn stdout() -> Self {
        Self::from_writer(io::stdout())
    }

    pub fn from_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            state: Mutex::new(SinkState {
                writer: Box::new(writer),
                closed: false,
            }),
        }
    }

    /// In-memory sink plus a handle for reading back what was written
    pub fn capture() -> (Self, CapturedOutput) {
        let captured = CapturedOutput::default();
        (Self::from_writer(captured.clone()), captured)
    }

    /// Lock sink state with poison recovery
    fn lock_state(&self) -> MutexGuard<'_, SinkState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Write `text` followed by a newline as one unit
    pub fn write_line(&self, text: &str) -> io::Result<()> {
        let mut line = Vec::with_capacity(text.len() + 1);
        line.extend_from_slice(text.as_bytes());
        line.push(b'\n');

        let mut state = self.lock_state();
        if state.closed {
            return Ok(());
        }
        match write_and_flush(state.writer.as_mut(), &line) {
            Ok(()) => Ok(()),
            Err(e) if is_broken_pipe(&e) => {
                debug!("Console closed (broken pipe), discarding further output");
                state.closed = true;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::stdout()
    }
}

impl std::fmt::Debug for ConsoleSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleSink")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn write_and_flush(writer: &mut dyn Write, line: &[u8]) -> io::Result<()> {
    writer.write_all(line)?;
    writer.flush()
}

/// Cross-platform broken pipe detection
fn is_broken_pipe(e: &io::Error) -> bool {
    #[cfg(windows)]
    {
        // On Windows, broken pipe manifests as different error codes
        e.kind() == io::ErrorKind::BrokenPipe
            || e.raw_os_error() == Some(232) // ERROR_NO_DATA "The pipe is being closed"
            || e.raw_os_error() == Some(109) // ERROR_BROKEN_PIPE "The pipe has been ended"
    }
    #[cfg(not(windows))]
    {
        e.kind() == io::ErrorKind::BrokenPipe
    }
}

/// Shared in-memory buffer behind a captured sink
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedOutput {
    fn lock_buffer(&self) -> MutexGuard<'_, Vec<u8>> {
        match self.buffer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.lock_buffer()).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock_buffer().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "reader went away"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Unwritable;

    impl Write for Unwritable {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitCode::Success as i32, 0);
        assert_eq!(ExitCode::GeneralError as i32, 1);
        assert_eq!(ExitCode::InvalidUsage as i32, 2);
    }

    #[test]
    fn test_capture_records_lines() {
        let (sink, captured) = ConsoleSink::capture();
        sink.write_line("first").unwrap();
        sink.write_line("").unwrap();
        sink.write_line("third").unwrap();
        assert_eq!(captured.contents(), "first\n\nthird\n");
        assert_eq!(captured.lines(), vec!["first", "", "third"]);
    }

    #[test]
    fn test_broken_pipe_closes_quietly() {
        let sink = ConsoleSink::from_writer(BrokenPipe);
        assert!(sink.write_line("lost").is_ok());
        assert!(sink.is_closed());
        assert!(sink.write_line("also lost").is_ok());
    }

    #[test]
    fn test_other_errors_are_reported() {
        let sink = ConsoleSink::from_writer(Unwritable);
        let err = sink.write_line("nope").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert!(!sink.is_closed());
    }
}
