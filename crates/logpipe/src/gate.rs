// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Backpressure between the queue and the transport.
//!
//! Dispatch is admitted only while the observer has asked for logs
//! (listener-ready) and is connected to the channel (observer-present). Both
//! signals live in one `watch` channel, so a waiter that subscribed before a
//! flip always observes it.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::PipeConfig;
use crate::transport::{ControlEvent, PeerIdentity, PresenceEvent};

/// Control event that sets listener-ready.
pub const RESUME_EVENT: &str = "logs-monitor-resume";
/// Control event that clears listener-ready.
pub const PAUSE_EVENT: &str = "logs-monitor-pause";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub listener_ready: bool,
    pub observer_present: bool,
}

impl Readiness {
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.listener_ready && self.observer_present
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Open,
    /// The token fired before both signals held.
    Aborted,
}

#[derive(Debug, Clone)]
pub struct ReadinessGate {
    state: Arc<watch::Sender<Readiness>>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessGate {
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(Readiness::default());
        Self {
            state: Arc::new(state),
        }
    }

    #[must_use]
    pub fn readiness(&self) -> Readiness {
        *self.state.borrow()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.readiness().is_open()
    }

    pub fn set_listener_ready(&self, ready: bool) {
        self.state.send_if_modified(|state| {
            let changed = state.listener_ready != ready;
            state.listener_ready = ready;
            changed
        });
        debug!("GATE | listener ready: {ready}");
    }

    pub fn set_observer_present(&self, present: bool) {
        self.state.send_if_modified(|state| {
            let changed = state.observer_present != present;
            state.observer_present = present;
            changed
        });
        debug!("GATE | observer present: {present}");
    }

    /// Applies a resume/pause control event. Returns `false` for any other
    /// event name, leaving the gate untouched.
    pub fn apply_control(&self, event: &ControlEvent) -> bool {
        match event.name.as_str() {
            RESUME_EVENT => self.set_listener_ready(true),
            PAUSE_EVENT => self.set_listener_ready(false),
            _ => return false,
        }
        true
    }

    /// Resolves once both signals hold, or with [`GateOutcome::Aborted`] when
    /// `token` fires first.
    pub async fn wait(&self, token: &CancellationToken) -> GateOutcome {
        let mut rx = self.state.subscribe();
        tokio::select! {
            biased;
            () = token.cancelled() => GateOutcome::Aborted,
            result = rx.wait_for(Readiness::is_open) => match result {
                Ok(_) => GateOutcome::Open,
                Err(_) => GateOutcome::Aborted,
            },
        }
    }
}

/// Tracks which observers of one session are joined.
#[derive(Debug)]
pub struct PresenceTracker {
    config: PipeConfig,
    joined: HashSet<PeerIdentity>,
}

impl PresenceTracker {
    /// Tracks the observers of `config`'s session, as named by its observer
    /// role.
    #[must_use]
    pub fn new(config: &PipeConfig) -> Self {
        Self {
            config: config.clone(),
            joined: HashSet::new(),
        }
    }

    /// Folds one presence event in and returns whether any observer is joined.
    pub fn apply(&mut self, event: &PresenceEvent) -> bool {
        let Some(peer) = PeerIdentity::parse(&event.client_id) else {
            return self.is_present();
        };
        if !self.config.is_observer(&peer) {
            return self.is_present();
        }
        if event.action.is_joined() {
            self.joined.insert(peer);
        } else {
            self.joined.remove(&peer);
        }
        self.is_present()
    }

    #[must_use]
    pub fn is_present(&self) -> bool {
        !self.joined.is_empty()
    }
}
