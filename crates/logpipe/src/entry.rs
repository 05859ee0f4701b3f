// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Captured log entries and their canonical textual form.

use std::fmt::{self, Write as _};
use std::panic::Location;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::value::{classify_with_depth, LoggedValue, Value};

/// Function name recorded when the caller's function is not known.
pub const ANONYMOUS_FUNCTION: &str = "<anonymous>";

/// Diagnostic level of a captured call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Log,
    Info,
    Table,
    Warn,
    Error,
}

impl Level {
    pub const ALL: [Level; 5] = [
        Level::Log,
        Level::Info,
        Level::Table,
        Level::Warn,
        Level::Error,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Log => "LOG",
            Level::Info => "INFO",
            Level::Table => "TABLE",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a diagnostic call was made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSite {
    pub function: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl CallSite {
    #[must_use]
    pub fn new(function: impl Into<String>, file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            function: function.into(),
            file: file.into(),
            line,
            column,
        }
    }

    /// The call site of whoever called the enclosing `#[track_caller]` function.
    #[must_use]
    #[track_caller]
    pub fn caller() -> Self {
        let location = Location::caller();
        Self::new(
            ANONYMOUS_FUNCTION,
            location.file(),
            location.line(),
            location.column(),
        )
    }
}

/// Expands to the [`CallSite`] of the invocation, including the path of the
/// enclosing function.
#[macro_export]
macro_rules! callsite {
    () => {{
        fn __callsite_marker() {}
        fn __type_name_of<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        let name = __type_name_of(__callsite_marker);
        let function = name.strip_suffix("::__callsite_marker").unwrap_or(name);
        let function = function.trim_end_matches("::{{closure}}");
        $crate::entry::CallSite::new(function, file!(), line!(), column!())
    }};
}

/// One captured diagnostic event. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Milliseconds since the Unix epoch.
    pub time_stamp: u64,
    pub log_level: Level,
    pub data: Vec<LoggedValue>,
    pub at: CallSite,
}

impl LogEntry {
    /// Builds an entry stamped with the current time, classifying every argument.
    #[must_use]
    pub fn capture(level: Level, args: &[Value], at: CallSite, max_depth: usize) -> Self {
        Self {
            time_stamp: now_millis(),
            log_level: level,
            data: args
                .iter()
                .map(|arg| classify_with_depth(arg, max_depth))
                .collect(),
            at,
        }
    }

    /// Canonical serialized form: compact JSON, ASCII only.
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self).map(escape_non_ascii)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// Rewrites every non-ASCII character as a JSON `\uXXXX` escape.
///
/// serde_json only emits non-ASCII inside string literals, so the result is
/// equivalent JSON whose byte length equals its character count.
#[must_use]
pub fn escape_non_ascii(json: String) -> String {
    if json.is_ascii() {
        return json;
    }
    let mut out = String::with_capacity(json.len() + json.len() / 2);
    let mut units = [0_u16; 2];
    for ch in json.chars() {
        if ch.is_ascii() {
            out.push(ch);
        } else {
            for unit in ch.encode_utf16(&mut units) {
                let _ = write!(out, "\\u{unit:04x}");
            }
        }
    }
    out
}
