// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Scriptable in-memory transport shared by the unit tests.

#![cfg(test)]

use std::collections::VecDeque;
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

use crate::entry::{CallSite, Level, LogEntry};
use crate::transport::{
    ControlEvent, Payload, PresenceAction, PresenceEvent, Transport, TransportError,
};
use crate::value::{Value, DEFAULT_MAX_DEPTH};

/// What the next publish call does. Calls past the end of the script succeed.
#[derive(Debug, Clone)]
pub(crate) enum PublishBehavior {
    Succeed,
    Fail(TransportError),
    /// Succeeds after the given delay.
    Delay(Duration),
    /// Never completes.
    Hang,
}

#[derive(Debug, Clone)]
pub(crate) struct PublishRecord {
    pub topic: String,
    pub payload: Payload,
    pub started: Instant,
    pub succeeded: bool,
}

pub(crate) struct MockTransport {
    script: Mutex<VecDeque<PublishBehavior>>,
    records: Mutex<Vec<PublishRecord>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    connected: watch::Sender<bool>,
    control: broadcast::Sender<ControlEvent>,
    presence: broadcast::Sender<PresenceEvent>,
    closed: AtomicBool,
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Self::with_script(Vec::new())
    }

    pub(crate) fn with_script(script: Vec<PublishBehavior>) -> Arc<Self> {
        let (connected, _) = watch::channel(true);
        let (control, _) = broadcast::channel(16);
        let (presence, _) = broadcast::channel(16);
        Arc::new(Self {
            script: Mutex::new(script.into()),
            records: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            connected,
            control,
            presence,
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.send_replace(connected);
    }

    pub(crate) fn send_control(&self, name: &str, data: serde_json::Value) {
        let _ = self.control.send(ControlEvent::new(name, data));
    }

    pub(crate) fn send_presence(&self, action: PresenceAction, client_id: &str) {
        let _ = self.presence.send(PresenceEvent::new(action, client_id));
    }

    pub(crate) fn records(&self) -> Vec<PublishRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Payloads successfully published on `topic`, in order.
    pub(crate) fn delivered(&self, topic: &str) -> Vec<Payload> {
        self.records()
            .into_iter()
            .filter(|r| r.succeeded && r.topic == topic)
            .map(|r| r.payload)
            .collect()
    }

    pub(crate) fn attempts(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, topic: &str, payload: &Payload, started: Instant, succeeded: bool) {
        self.records.lock().unwrap().push(PublishRecord {
            topic: topic.to_string(),
            payload: payload.clone(),
            started,
            succeeded,
        });
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connected(&self) {
        let mut rx = self.connected.subscribe();
        let _ = rx.wait_for(|connected| *connected).await;
    }

    async fn publish(&self, topic: &str, payload: &Payload) -> Result<(), TransportError> {
        let started = Instant::now();
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PublishBehavior::Succeed);
        match behavior {
            PublishBehavior::Succeed => {}
            PublishBehavior::Fail(e) => {
                self.record(topic, payload, started, false);
                return Err(e);
            }
            PublishBehavior::Delay(delay) => tokio::time::sleep(delay).await,
            PublishBehavior::Hang => {
                self.record(topic, payload, started, false);
                std::future::pending::<()>().await;
            }
        }
        self.record(topic, payload, started, true);
        Ok(())
    }

    fn control_events(&self) -> broadcast::Receiver<ControlEvent> {
        self.control.subscribe()
    }

    fn presence_events(&self) -> broadcast::Receiver<PresenceEvent> {
        self.presence.subscribe()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub(crate) fn sample_entry(text: &str) -> LogEntry {
    LogEntry::capture(
        Level::Log,
        &[Value::from(text)],
        CallSite::new("sample", "test_support.rs", 1, 1),
        DEFAULT_MAX_DEPTH,
    )
}

/// An entry whose serialized form is dominated by `len` bytes of
/// incompressible base64 text.
pub(crate) fn noisy_entry(len: usize) -> LogEntry {
    let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
    let alphabet = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let text: String = (0..len)
        .map(|_| {
            // xorshift64
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            alphabet[(state % 64) as usize] as char
        })
        .collect();
    sample_entry(&text)
}

/// Parses a text payload back into its canonical JSON, inflating it first
/// when the publisher picked the compressed form.
pub(crate) fn decode_text(text: &str) -> serde_json::Value {
    let canonical = if text.starts_with('{') {
        text.to_string()
    } else {
        let compressed = base64::engine::general_purpose::STANDARD
            .decode(text)
            .unwrap();
        let mut out = String::new();
        zstd::stream::read::Decoder::new(&compressed[..])
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        out
    };
    serde_json::from_str(&canonical).unwrap()
}
