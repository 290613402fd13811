// Console log collected during a run

use std::fmt;

/// Severity of a console entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: Level,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.message)
    }
}

/// Ordered log of messages produced by a run.
///
/// Every entry is mirrored to `tracing` under the `hexpat::console` target.
#[derive(Debug, Clone, Default)]
pub struct Console {
    entries: Vec<LogEntry>,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, level: Level, message: impl Into<String>) {
        let message = message.into();
        match level {
            Level::Debug => tracing::debug!(target: "hexpat::console", "{}", message),
            Level::Info => tracing::info!(target: "hexpat::console", "{}", message),
            Level::Warning => tracing::warn!(target: "hexpat::console", "{}", message),
            Level::Error => tracing::error!(target: "hexpat::console", "{}", message),
        }
        self.entries.push(LogEntry { level, message });
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        self.log(Level::Debug, message);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.log(Level::Info, message);
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.log(Level::Warning, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.log(Level::Error, message);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
