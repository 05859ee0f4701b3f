// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use tracing::field::{Field, Visit};
use tracing_core::{Event, Level as TracingLevel, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::entry::{CallSite, Level, ANONYMOUS_FUNCTION};
use crate::pipe::LogPipe;
use crate::value::Value;

const OWN_TARGET: &str = "logpipe";

/// Captures host `tracing` events into a [`LogPipe`].
///
/// Events from the pipe's own modules are ignored so its diagnostics never
/// feed back into the queue.
#[derive(Debug, Clone)]
pub struct CaptureLayer {
    pipe: LogPipe,
}

impl CaptureLayer {
    #[must_use]
    pub fn new(pipe: LogPipe) -> Self {
        Self { pipe }
    }
}

fn is_own_target(target: &str) -> bool {
    target == OWN_TARGET
        || target
            .strip_prefix(OWN_TARGET)
            .is_some_and(|rest| rest.starts_with("::"))
}

fn level_of(level: &TracingLevel) -> Level {
    match *level {
        TracingLevel::ERROR => Level::Error,
        TracingLevel::WARN => Level::Warn,
        TracingLevel::INFO => Level::Info,
        _ => Level::Log,
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_own_target(metadata.target()) || self.pipe.is_disposed() {
            return;
        }

        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);

        let mut args = vec![Value::from(visitor.message.unwrap_or_default())];
        if !visitor.fields.is_empty() {
            args.push(Value::object("Fields", visitor.fields));
        }
        let at = CallSite::new(
            metadata.module_path().unwrap_or(ANONYMOUS_FUNCTION),
            metadata.file().unwrap_or_default(),
            metadata.line().unwrap_or_default(),
            0,
        );
        self.pipe.capture(level_of(metadata.level()), &args, at);
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    fields: Vec<(String, Value)>,
}

impl FieldCollector {
    fn push(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl Visit for FieldCollector {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.push(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, Value::from(value));
    }

    fn record_i128(&mut self, field: &Field, value: i128) {
        self.push(field, Value::from(value));
    }

    fn record_u128(&mut self, field: &Field, value: u128) {
        self.push(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.push(field, Value::from(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, Value::from(format!("{value:?}")));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::PipeConfig;
    use crate::gate::RESUME_EVENT;
    use crate::test_support::MockTransport;
    use crate::transport::{Payload, PresenceAction};
    use std::time::Duration;
    use tracing_subscriber::layer::SubscriberExt;

    fn with_layer(pipe: &LogPipe, f: impl FnOnce()) {
        let subscriber = tracing_subscriber::registry().with(CaptureLayer::new(pipe.clone()));
        tracing::subscriber::with_default(subscriber, f);
    }

    #[test]
    fn test_own_targets() {
        assert!(is_own_target("logpipe"));
        assert!(is_own_target("logpipe::publisher"));
        assert!(!is_own_target("logpipe_extra"));
        assert!(!is_own_target("host_app::logpipe"));
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(level_of(&TracingLevel::ERROR), Level::Error);
        assert_eq!(level_of(&TracingLevel::WARN), Level::Warn);
        assert_eq!(level_of(&TracingLevel::INFO), Level::Info);
        assert_eq!(level_of(&TracingLevel::DEBUG), Level::Log);
        assert_eq!(level_of(&TracingLevel::TRACE), Level::Log);
    }

    #[tokio::test]
    async fn test_host_events_are_captured_and_own_events_skipped() {
        let pipe = LogPipe::start(MockTransport::new(), PipeConfig::new("s1")).unwrap();

        with_layer(&pipe, || {
            tracing::info!(target: "host_app", "user signed in");
            tracing::debug!(target: "logpipe_extra", "neighbouring crate");
            tracing::error!(target: "logpipe::publisher", "internal");
            tracing::warn!(target: "logpipe", "internal");
        });

        assert_eq!(pipe.queued(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_captured_event_shape() {
        let transport = MockTransport::new();
        let pipe = LogPipe::start(transport.clone(), PipeConfig::new("s1")).unwrap();
        transport.send_presence(PresenceAction::Enter, "web|s1");
        transport.send_control(RESUME_EVENT, serde_json::json!({}));

        with_layer(&pipe, || {
            tracing::warn!(target: "host_app", user = 7, ok = false, "disk almost full");
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let delivered = transport.delivered("logs");
        let Some(Payload::Text(text)) = delivered.first() else {
            panic!("expected one text payload, got {delivered:?}");
        };
        let parsed = crate::test_support::decode_text(text);
        assert_eq!(parsed["logLevel"], "WARN");
        assert_eq!(
            parsed["data"],
            serde_json::json!([
                { "type": "<string>", "logValue": "disk almost full" },
                { "type": "Fields", "logValue": { "user": 7, "ok": false } }
            ])
        );
        assert!(parsed["at"]["function"]
            .as_str()
            .unwrap()
            .ends_with("layer::tests"));
        assert_eq!(parsed["at"]["column"], 0);
    }
}
