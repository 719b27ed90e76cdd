//! Per-flow diagnostic lines.
//!
//! Every cadence recompute emits a `state`, a `beliefs` and a `history` line;
//! anomalies are reported at [`LogLevel::Error`]. Lines reach a
//! [`DiagnosticSink`] in the order they were produced. The default sink
//! forwards to `tracing`.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::config::Millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Info = 1,
    Debug = 2,
}

const LOG_LEVEL_LABELS: [&str; 3] = ["ERROR", "INFO", "DEBUG"];

impl LogLevel {
    pub fn label(self) -> &'static str {
        LOG_LEVEL_LABELS[self as usize]
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One diagnostic line.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticLine {
    pub level: LogLevel,
    pub now: Millis,
    pub message: String,
}

impl fmt::Display for DiagnosticLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {:.3} {}", self.level, self.now, self.message)
    }
}

/// Receiver for a flow's diagnostic lines.
pub trait DiagnosticSink: Send {
    fn emit(&mut self, line: DiagnosticLine);

    /// Called when the flow is closed.
    fn flush(&mut self) {}
}

/// Forwards lines to `tracing` under the `beliefcc::diag` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&mut self, line: DiagnosticLine) {
        match line.level {
            LogLevel::Error => {
                tracing::error!(target: "beliefcc::diag", now = line.now, "{}", line.message)
            }
            LogLevel::Info => {
                tracing::info!(target: "beliefcc::diag", now = line.now, "{}", line.message)
            }
            LogLevel::Debug => {
                tracing::debug!(target: "beliefcc::diag", now = line.now, "{}", line.message)
            }
        }
    }
}

/// Keeps lines in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    lines: Arc<Mutex<Vec<DiagnosticLine>>>,
    max_level: Option<LogLevel>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only record lines at or above `level` in severity.
    pub fn with_max_level(level: LogLevel) -> Self {
        Self {
            lines: Arc::default(),
            max_level: Some(level),
        }
    }

    pub fn lines(&self) -> Vec<DiagnosticLine> {
        self.lines.lock().clone()
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.lines.lock().iter().filter(|l| l.level == level).count()
    }

    /// Lines whose message starts with `prefix`.
    pub fn matching(&self, prefix: &str) -> Vec<DiagnosticLine> {
        self.lines
            .lock()
            .iter()
            .filter(|l| l.message.starts_with(prefix))
            .cloned()
            .collect()
    }
}

impl DiagnosticSink for RecordingSink {
    fn emit(&mut self, line: DiagnosticLine) {
        if self.max_level.is_some_and(|max| line.level > max) {
            return;
        }
        self.lines.lock().push(line);
    }
}
