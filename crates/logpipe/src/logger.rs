// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Formatting for the pipe's own diagnostics.
//!
//! Lines look like:
//! ```text
//! LOGPIPE | LEVEL | [span_name{span_fields}:] message {event_fields}
//! ```
//!
//! All of them come from targets under `logpipe`, which
//! [`CaptureLayer`](crate::layer::CaptureLayer) never captures.

use std::fmt;

use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::config::PipeConfig;
use crate::error::PipeError;

/// Event formatter that prefixes every line with `LOGPIPE`.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(&mut writer, "LOGPIPE | {} | ", event.metadata().level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;
                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Filter enabling the pipe's diagnostics at `log_level` and nothing else.
pub fn filter(log_level: &str) -> Result<EnvFilter, PipeError> {
    EnvFilter::try_new(format!("logpipe={log_level}"))
        .map_err(|e| PipeError::InvalidConfig(format!("invalid log level '{log_level}': {e}")))
}

/// Installs a global subscriber printing the pipe's diagnostics to stderr at
/// `config.log_level`.
///
/// Hosts that already run a subscriber should add [`Formatter`] and
/// `filter(&config.log_level)` to their own stack instead.
pub fn init(config: &PipeConfig) -> Result<(), PipeError> {
    tracing_subscriber::fmt()
        .with_ansi(false)
        .event_format(Formatter)
        .with_env_filter(filter(&config.log_level)?)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| PipeError::InvalidConfig(format!("log subscriber already installed: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing::{debug, info, info_span};

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Buffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn capture_output(log_level: &str, f: impl FnOnce()) -> String {
        let buffer = Buffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .event_format(Formatter)
            .with_env_filter(filter(log_level).unwrap())
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        buffer.contents()
    }

    #[test]
    fn test_prefix_and_level() {
        let output = capture_output("debug", || {
            info!(target: "logpipe::pipe", "PIPE | Started");
        });
        assert_eq!(output, "LOGPIPE | INFO | PIPE | Started\n");
    }

    #[test]
    fn test_span_context_and_fields() {
        let output = capture_output("debug", || {
            let span = info_span!(target: "logpipe::dispatch", "drain", entry = 4);
            let _entered = span.enter();
            info!(target: "logpipe::dispatch", parts = 3, "sending");
        });
        assert!(!output.contains('\u{1b}'), "{output:?}");
        assert_eq!(output, "LOGPIPE | INFO | drain{entry=4}: sending parts=3\n");
    }

    #[test]
    fn test_filter_hides_other_targets_and_lower_levels() {
        let output = capture_output("info", || {
            info!(target: "host_app", "not ours");
            debug!(target: "logpipe::gate", "too verbose");
        });
        assert!(output.is_empty(), "{output}");
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        assert!(matches!(
            filter("loudest"),
            Err(PipeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_configured_level_drives_filter() {
        let mut config = PipeConfig::new("s1");
        let emit = || {
            debug!(target: "logpipe::gate", "GATE | Waiting");
            info!(target: "logpipe::pipe", "PIPE | Started");
        };

        let output = capture_output(&config.log_level, emit);
        assert_eq!(output, "LOGPIPE | INFO | PIPE | Started\n");

        config.log_level = "debug".to_string();
        let output = capture_output(&config.log_level, emit);
        assert_eq!(
            output,
            "LOGPIPE | DEBUG | GATE | Waiting\nLOGPIPE | INFO | PIPE | Started\n"
        );
    }
}
