// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The assembled pipe: queue, dispatch loop, readiness gate and the
//! transport subscriptions feeding the gate.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::PipeConfig;
use crate::dispatch::DispatchLoop;
use crate::entry::{CallSite, Level, LogEntry};
use crate::error::PipeError;
use crate::gate::{PresenceTracker, ReadinessGate};
use crate::publisher::Publisher;
use crate::transport::{ControlEvent, Payload, PresenceEvent, Transport};
use crate::value::Value;

/// Handle to a running pipe. Clones share the same instance.
#[derive(Clone)]
pub struct LogPipe {
    shared: Arc<PipeShared>,
}

struct PipeShared {
    config: PipeConfig,
    transport: Arc<dyn Transport>,
    gate: ReadinessGate,
    dispatch: Arc<DispatchLoop>,
}

impl std::fmt::Debug for LogPipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogPipe")
            .field("session_id", &self.shared.config.session_id)
            .field("queued", &self.queued())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl LogPipe {
    /// Validates `config`, subscribes to the transport's control and presence
    /// events and returns a pipe ready to accept entries.
    ///
    /// Must be called from within a tokio runtime. Background work keeps
    /// running on that runtime, so entries may be captured from any thread.
    pub fn start(transport: Arc<dyn Transport>, config: PipeConfig) -> Result<Self, PipeError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| PipeError::NoRuntime)?;

        let root = CancellationToken::new();
        let gate = ReadinessGate::new();
        let publish_lock = Arc::new(Mutex::new(()));
        let publisher = Publisher::new(
            Arc::clone(&transport),
            gate.clone(),
            Arc::clone(&publish_lock),
            &config,
        );
        let dispatch = DispatchLoop::new(
            publisher,
            config.queue_capacity,
            root.clone(),
            runtime.clone(),
        );

        let feedback = Feedback {
            transport: Arc::clone(&transport),
            publish_lock,
            topic: config.feedback_topic.clone(),
        };
        runtime.spawn(listen_control(
            transport.control_events(),
            gate.clone(),
            feedback,
            root.clone(),
        ));
        runtime.spawn(listen_presence(
            transport.presence_events(),
            gate.clone(),
            PresenceTracker::new(&config),
            root,
        ));

        debug!("PIPE | Started as {}", config.agent_identity());
        Ok(Self {
            shared: Arc::new(PipeShared {
                config,
                transport,
                gate,
                dispatch,
            }),
        })
    }

    /// Classifies `args` into an entry and queues it. Returns `false` once
    /// the pipe is disposed.
    pub fn capture(&self, level: Level, args: &[Value], at: CallSite) -> bool {
        if self.is_disposed() {
            return false;
        }
        let entry = LogEntry::capture(level, args, at, self.shared.config.max_value_depth);
        self.enqueue(entry)
    }

    /// Queues a pre-built entry.
    pub fn enqueue(&self, entry: LogEntry) -> bool {
        self.shared.dispatch.enqueue(entry)
    }

    /// Cancels all queued and in-flight work and closes the transport.
    /// Later calls do nothing.
    pub async fn dispose(&self) {
        let Some(dropped) = self.shared.dispatch.dispose() else {
            return;
        };
        debug!("PIPE | Disposing, dropped {dropped} queued entries");
        self.shared.transport.close().await;
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.shared.dispatch.is_disposed()
    }

    /// Number of entries waiting, including the one under dispatch.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.dispatch.len()
    }

    #[must_use]
    pub fn gate(&self) -> &ReadinessGate {
        &self.shared.gate
    }

    #[must_use]
    pub fn config(&self) -> &PipeConfig {
        &self.shared.config
    }
}

/// Echoes acknowledged control events back to the observer.
struct Feedback {
    transport: Arc<dyn Transport>,
    publish_lock: Arc<Mutex<()>>,
    topic: String,
}

impl Feedback {
    async fn echo(&self, event: ControlEvent) {
        let _guard = self.publish_lock.lock().await;
        if let Err(e) = self
            .transport
            .publish(&self.topic, &Payload::Json(event.data))
            .await
        {
            debug!("PIPE | Failed to acknowledge '{}': {e}", event.name);
        }
    }
}

async fn listen_control(
    mut events: broadcast::Receiver<ControlEvent>,
    gate: ReadinessGate,
    feedback: Feedback,
    root: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = root.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(event) => {
                if !gate.apply_control(&event) {
                    continue;
                }
                tokio::select! {
                    biased;
                    () = root.cancelled() => break,
                    () = feedback.echo(event) => {}
                }
            }
            Err(RecvError::Lagged(missed)) => {
                warn!("PIPE | Missed {missed} control events");
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("PIPE | Control listener stopped");
}

async fn listen_presence(
    mut events: broadcast::Receiver<PresenceEvent>,
    gate: ReadinessGate,
    mut tracker: PresenceTracker,
    root: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = root.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(event) => {
                let present = tracker.apply(&event);
                if present != gate.readiness().observer_present {
                    gate.set_observer_present(present);
                }
            }
            Err(RecvError::Lagged(missed)) => {
                warn!("PIPE | Missed {missed} presence events");
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("PIPE | Presence listener stopped");
}
