//! Live per-call progress markers
//!
//! One character per remote call: `.` success, `e` the call itself failed or
//! its reply did not match, `E` the call could not be issued at all.

use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Success,
    CallFailed,
    SetupFailed,
}

impl Progress {
    pub fn marker(self) -> char {
        match self {
            Progress::Success => '.',
            Progress::CallFailed => 'e',
            Progress::SetupFailed => 'E',
        }
    }
}

/// Receives one progress event per remote call
pub trait ProgressSink: Send + Sync {
    fn mark(&self, progress: Progress);

    /// Called once after the last call of the run
    fn finish(&self) {}
}

/// Writes markers to stdout as they happen
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn mark(&self, progress: Progress) {
        let mut out = std::io::stdout().lock();
        let _ = write!(out, "{}", progress.marker());
        let _ = out.flush();
    }

    fn finish(&self) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out);
        let _ = out.flush();
    }
}

/// Discards all progress events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn mark(&self, _progress: Progress) {}
}
