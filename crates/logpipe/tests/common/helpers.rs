// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use super::mocks::MockTransport;
use base64::Engine;
use logpipe::{LogPipe, Payload, PipeConfig, PresenceAction};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

pub const SESSION: &str = "integration-session";

pub fn start_pipe(transport: &Arc<MockTransport>) -> LogPipe {
    LogPipe::start(transport.clone(), PipeConfig::new(SESSION)).expect("pipe should start")
}

/// Joins an observer and asks it to start listening
pub fn open_session(transport: &MockTransport) {
    transport.presence(PresenceAction::Enter, &format!("web|{SESSION}"));
    transport.control("logs-monitor-resume", serde_json::json!({ "from": "test" }));
}

/// Lets spawned tasks run, advancing paused time by `ms`
pub async fn run_for(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[allow(dead_code)]
pub fn texts(payloads: &[Payload]) -> Vec<String> {
    payloads
        .iter()
        .map(|p| match p {
            Payload::Text(text) => text.clone(),
            other => panic!("expected a text payload, got {other:?}"),
        })
        .collect()
}

/// Recovers the canonical JSON of a published payload, undoing base64 zstd
/// when the sender chose the compressed form
#[allow(dead_code)]
pub fn decode_entry(payload: &str) -> serde_json::Value {
    let canonical = if payload.starts_with('{') {
        payload.to_string()
    } else {
        let compressed = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .expect("payload should be base64");
        let mut out = String::new();
        zstd::stream::read::Decoder::new(&compressed[..])
            .expect("zstd decoder should open")
            .read_to_string(&mut out)
            .expect("payload should be a zstd frame");
        out
    };
    serde_json::from_str(&canonical).expect("canonical form should be JSON")
}
