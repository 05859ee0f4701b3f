// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-process diagnostic capture streamed to a remote observer.
//!
//! Host diagnostics enter through a [`Console`] or the [`CaptureLayer`],
//! become [`LogEntry`] values, and wait in a bounded queue until the observer
//! is present and listening. A single dispatch loop then publishes each entry
//! over a [`Transport`]: hashed, compressed when that helps, split into
//! chunks when large, and retried after a cooldown on transient failures.
//!
//! ```text
//!  Console / CaptureLayer ─► LogQueue (drop-oldest) ─► DispatchLoop ─► Publisher ─► Transport
//!                                                                         ▲
//!                                       control + presence events ─► ReadinessGate
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod dispatch;
pub mod entry;
pub mod error;
pub mod gate;
pub mod interceptor;
pub mod layer;
pub mod logger;
pub mod pipe;
pub mod publisher;
pub mod queue;
pub mod transport;
pub mod value;

mod test_support;

pub use config::PipeConfig;
pub use entry::{CallSite, Level, LogEntry};
pub use error::PipeError;
pub use gate::{GateOutcome, ReadinessGate};
pub use interceptor::{Console, ConsoleSink, StdConsole, SKIP_MARKER};
pub use layer::CaptureLayer;
pub use pipe::LogPipe;
pub use publisher::DispatchOutcome;
pub use transport::{
    ChunkEnvelope, ControlEvent, FailureClass, Payload, PeerIdentity, PresenceAction,
    PresenceEvent, Transport, TransportError,
};
pub use value::{SharedValue, Value};
