// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock transport recording every publish attempt

use logpipe::{ControlEvent, Payload, PresenceAction, PresenceEvent, Transport, TransportError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Scripted result of one publish on the `logs` topic
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub enum Step {
    Ok,
    Err(TransportError),
    /// Succeed after a delay
    Slow(Duration),
}

#[derive(Debug, Clone)]
pub struct Attempt {
    pub topic: String,
    pub payload: Payload,
    pub at: Instant,
    pub ok: bool,
}

pub struct MockTransport {
    steps: Mutex<VecDeque<Step>>,
    attempts: Mutex<Vec<Attempt>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    control: broadcast::Sender<ControlEvent>,
    presence: broadcast::Sender<PresenceEvent>,
    closed: AtomicBool,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            attempts: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            control: broadcast::channel(16).0,
            presence: broadcast::channel(16).0,
            closed: AtomicBool::new(false),
        })
    }

    pub fn control(&self, name: &str, data: serde_json::Value) {
        let _ = self.control.send(ControlEvent::new(name, data));
    }

    pub fn presence(&self, action: PresenceAction, client_id: &str) {
        let _ = self.presence.send(PresenceEvent::new(action, client_id));
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn delivered(&self, topic: &str) -> Vec<Payload> {
        self.attempts()
            .into_iter()
            .filter(|a| a.ok && a.topic == topic)
            .map(|a| a.payload)
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn connected(&self) {}

    async fn publish(&self, topic: &str, payload: &Payload) -> Result<(), TransportError> {
        let at = Instant::now();
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        // The script drives entry publishes only; feedback always succeeds.
        let step = if topic == "logs" {
            self.steps.lock().unwrap().pop_front().unwrap_or(Step::Ok)
        } else {
            Step::Ok
        };
        let result = match step {
            Step::Ok => Ok(()),
            Step::Err(e) => Err(e),
            Step::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.attempts.lock().unwrap().push(Attempt {
            topic: topic.to_string(),
            payload: payload.clone(),
            at,
            ok: result.is_ok(),
        });
        result
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
