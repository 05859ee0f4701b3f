// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Console-style diagnostic entry points that also feed a [`LogPipe`].
//!
//! Raw output always happens first. Structured capture is added only while a
//! pipe is installed, and never for calls whose first argument is
//! [`SKIP_MARKER`].

use std::io::Write;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::entry::{CallSite, Level};
use crate::pipe::LogPipe;
use crate::value::Value;

/// First-argument marker that suppresses structured capture for one call.
pub const SKIP_MARKER: &str = "\u{1}logpipe:skip\u{1}";

/// Destination of raw diagnostic output.
pub trait ConsoleSink: Send + Sync {
    fn write(&self, level: Level, line: &str);
}

/// LOG, INFO and TABLE go to stdout. WARN and ERROR go to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdConsole;

impl ConsoleSink for StdConsole {
    fn write(&self, level: Level, line: &str) {
        // A closed stream is not worth failing the host's call over.
        let _ = match level {
            Level::Log | Level::Info | Level::Table => writeln!(std::io::stdout().lock(), "{line}"),
            Level::Warn | Level::Error => writeln!(std::io::stderr().lock(), "{line}"),
        };
    }
}

pub struct Console {
    sink: Arc<dyn ConsoleSink>,
    pipe: RwLock<Option<LogPipe>>,
}

impl Default for Console {
    fn default() -> Self {
        Self::new(Arc::new(StdConsole))
    }
}

impl Console {
    #[must_use]
    pub fn new(sink: Arc<dyn ConsoleSink>) -> Self {
        Self {
            sink,
            pipe: RwLock::new(None),
        }
    }

    /// Starts capturing into `pipe`. Returns the pipe installed before, if any.
    pub fn install(&self, pipe: LogPipe) -> Option<LogPipe> {
        self.write_pipe().replace(pipe)
    }

    /// Stops capturing. Output keeps flowing to the sink.
    pub fn uninstall(&self) -> Option<LogPipe> {
        self.write_pipe().take()
    }

    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.read_pipe().is_some()
    }

    /// Writes `args` to the sink without capturing them.
    pub fn passthrough(&self, level: Level, args: &[Value]) {
        let line = args
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        self.sink.write(level, &line);
    }

    /// Writes `args` to the sink and, unless the first argument is
    /// [`SKIP_MARKER`], captures them at `at`.
    pub fn emit(&self, level: Level, at: CallSite, args: &[Value]) {
        if let [Value::String(first), rest @ ..] = args {
            if first == SKIP_MARKER {
                self.passthrough(level, rest);
                return;
            }
        }

        self.passthrough(level, args);
        let pipe = self.read_pipe().clone();
        if let Some(pipe) = pipe {
            pipe.capture(level, args, at);
        }
    }

    #[track_caller]
    pub fn log(&self, args: &[Value]) {
        self.emit(Level::Log, CallSite::caller(), args);
    }

    #[track_caller]
    pub fn info(&self, args: &[Value]) {
        self.emit(Level::Info, CallSite::caller(), args);
    }

    #[track_caller]
    pub fn table(&self, args: &[Value]) {
        self.emit(Level::Table, CallSite::caller(), args);
    }

    #[track_caller]
    pub fn warn(&self, args: &[Value]) {
        self.emit(Level::Warn, CallSite::caller(), args);
    }

    #[track_caller]
    pub fn error(&self, args: &[Value]) {
        self.emit(Level::Error, CallSite::caller(), args);
    }

    fn read_pipe(&self) -> RwLockReadGuard<'_, Option<LogPipe>> {
        self.pipe.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_pipe(&self) -> RwLockWriteGuard<'_, Option<LogPipe>> {
        self.pipe.write().unwrap_or_else(PoisonError::into_inner)
    }
}
