//! The log sink the connection layer reports into.
//!
//! Connection events, send/receive failures and listener start-up are
//! reported as `(level, text)` pairs. Where they end up is the embedder's
//! choice: [`TracingSink`] (the default) forwards to `tracing`;
//! [`MemorySink`] keeps timestamped [`LogEntry`] values around, e.g. to
//! ship them to a peer as `Message::Log`.

use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use hostlink_protocol::{LogEntry, LogLevel};

/// Receives leveled diagnostic text.
pub trait LogSink: Send + Sync + 'static {
    fn log(&self, level: LogLevel, text: &str);

    /// Reports how long `what` took since `started`, at [`LogLevel::Perf`].
    fn log_elapsed(&self, what: &str, started: Instant) {
        let elapsed = started.elapsed();
        self.log(
            LogLevel::Perf,
            &format!("{what} took {:.3} ms", elapsed.as_secs_f64() * 1000.0),
        );
    }
}

/// Forwards to `tracing` under the `hostlink` target.
///
/// `Perf` maps to TRACE, `Fail` to ERROR. The sentinel levels are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, text: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "hostlink", "{text}"),
            LogLevel::Perf => tracing::trace!(target: "hostlink", "{text}"),
            LogLevel::Info => tracing::info!(target: "hostlink", "{text}"),
            LogLevel::Warn => tracing::warn!(target: "hostlink", "{text}"),
            LogLevel::Error | LogLevel::Fail => {
                tracing::error!(target: "hostlink", "{text}")
            }
            LogLevel::All | LogLevel::None => {}
        }
    }
}

/// Records every entry at or above `min_level`.
#[derive(Debug)]
pub struct MemorySink {
    min_level: LogLevel,
    entries: Mutex<Vec<LogEntry>>,
}

impl MemorySink {
    /// A sink that records everything.
    pub fn new() -> Self {
        Self::with_min_level(LogLevel::All)
    }

    /// A sink that drops entries below `min_level`.
    pub fn with_min_level(min_level: LogLevel) -> Self {
        Self {
            min_level,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// A copy of everything recorded so far, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Removes and returns everything recorded so far.
    pub fn drain(&self) -> Vec<LogEntry> {
        std::mem::take(&mut *self.entries.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// `true` if any recorded entry's text contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|e| e.message().contains(needle))
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for MemorySink {
    fn log(&self, level: LogLevel, text: &str) {
        if level < self.min_level {
            return;
        }
        // Sentinel levels fail validation and are not recorded.
        if let Ok(entry) = LogEntry::now(level, text) {
            self.entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(entry);
        }
    }
}
