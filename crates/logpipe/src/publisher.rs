// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of one queued entry over the transport.
//!
//! ```text
//!   connected ─► gate open ─► encode ─► hash ─► compress ─► chunk ─► publish
//!                                                              ▲        │
//!                                                              └ cooldown (transient)
//! ```
//!
//! Every suspension point races the slot's cancellation token, and a result
//! that arrives after the token fired is discarded.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use zstd::stream::write::Encoder;

use crate::config::PipeConfig;
use crate::entry::LogEntry;
use crate::error::PipeError;
use crate::gate::{GateOutcome, ReadinessGate};
use crate::queue::QueueSlot;
use crate::transport::{ChunkEnvelope, FailureClass, Payload, Transport, TransportError};

/// How the dispatch of one slot ended. None of these halt the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Every part was confirmed by the transport.
    Delivered,
    /// The slot's token fired (disposal or eviction).
    Cancelled,
    /// Dropped without retry: rejected credentials or an unencodable entry.
    Abandoned,
}

/// An entry ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedMessage {
    /// Hex SHA-256 of the canonical JSON.
    pub message_id: String,
    /// base64 zstd of the canonical JSON, or the JSON itself when that is not larger.
    pub payload: String,
    pub compressed: bool,
}

impl PreparedMessage {
    pub fn from_entry(entry: &LogEntry, compression_level: i32) -> Result<Self, PipeError> {
        let canonical = entry.to_canonical_json()?;
        let message_id = hex::encode(Sha256::digest(canonical.as_bytes()));

        let encoded = match compress(canonical.as_bytes(), compression_level) {
            Ok(encoded) => Some(encoded),
            Err(e) => {
                debug!("PUBLISHER | Failed to compress entry, sending uncompressed: {e}");
                None
            }
        };

        Ok(match encoded {
            Some(encoded) if encoded.len() < canonical.len() => Self {
                message_id,
                payload: encoded,
                compressed: true,
            },
            _ => Self {
                message_id,
                payload: canonical,
                compressed: false,
            },
        })
    }

    /// Publish bodies for this message: one raw payload below `limit`, chunk
    /// envelopes otherwise.
    #[must_use]
    pub fn into_parts(self, limit: usize) -> Vec<Payload> {
        if self.payload.len() < limit {
            return vec![Payload::Text(self.payload)];
        }
        chunk_payload(&self.message_id, &self.payload, limit)
            .into_iter()
            .map(Payload::Chunk)
            .collect()
    }
}

fn compress(data: &[u8], level: i32) -> Result<String, PipeError> {
    let mut encoder = Encoder::new(Vec::new(), level)?;
    encoder.write_all(data)?;
    let compressed = encoder.finish()?;
    Ok(STANDARD.encode(compressed))
}

/// Splits `payload` into `limit`-byte envelopes numbered from 1.
///
/// `payload` must be ASCII, which both canonical JSON and base64 are.
#[must_use]
pub fn chunk_payload(message_id: &str, payload: &str, limit: usize) -> Vec<ChunkEnvelope> {
    let pieces: Vec<&[u8]> = payload.as_bytes().chunks(limit.max(1)).collect();
    let count = pieces.len();
    pieces
        .into_iter()
        .enumerate()
        .map(|(index, piece)| ChunkEnvelope {
            message_id: message_id.to_string(),
            part: index + 1,
            is_final: index + 1 == count,
            chunk: String::from_utf8_lossy(piece).into_owned(),
        })
        .collect()
}

pub struct Publisher {
    transport: Arc<dyn Transport>,
    gate: ReadinessGate,
    publish_lock: Arc<Mutex<()>>,
    topic: String,
    chunk_size_limit: usize,
    retry_cooldown: Duration,
    compression_level: i32,
}

impl Publisher {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        gate: ReadinessGate,
        publish_lock: Arc<Mutex<()>>,
        config: &PipeConfig,
    ) -> Self {
        Self {
            transport,
            gate,
            publish_lock,
            topic: config.log_topic.clone(),
            chunk_size_limit: config.chunk_size_limit,
            retry_cooldown: config.retry_cooldown,
            compression_level: config.compression_level,
        }
    }

    /// Delivers `slot`, retrying transient failures until it succeeds or its
    /// token fires.
    pub async fn dispatch(&self, slot: &QueueSlot) -> DispatchOutcome {
        let token = &slot.token;

        tokio::select! {
            biased;
            () = token.cancelled() => return DispatchOutcome::Cancelled,
            () = self.transport.connected() => {}
        }
        if self.gate.wait(token).await == GateOutcome::Aborted {
            return DispatchOutcome::Cancelled;
        }

        let prepared = match PreparedMessage::from_entry(&slot.entry, self.compression_level) {
            Ok(prepared) => prepared,
            Err(e) => {
                error!("PUBLISHER | Dropping entry {}: {e}", slot.id);
                return DispatchOutcome::Abandoned;
            }
        };
        let message_id = prepared.message_id.clone();
        let parts = prepared.into_parts(self.chunk_size_limit);
        debug!(
            "PUBLISHER | Sending entry {} as {} part(s), message {message_id}",
            slot.id,
            parts.len()
        );

        let mut confirmed = 0;
        let mut attempt = 0_u32;
        while let Some(part) = parts.get(confirmed) {
            if token.is_cancelled() {
                return DispatchOutcome::Cancelled;
            }
            attempt += 1;

            let result = tokio::select! {
                biased;
                () = token.cancelled() => return DispatchOutcome::Cancelled,
                result = self.publish(part) => result,
            };

            match result {
                Ok(()) => confirmed += 1,
                Err(e) => match e.class() {
                    FailureClass::Authorization => {
                        error!("PUBLISHER | Top-level authorization failed, dropping entry {}: {e}", slot.id);
                        return DispatchOutcome::Abandoned;
                    }
                    FailureClass::Transient => {
                        debug!(
                            "PUBLISHER | Attempt {attempt} for entry {} failed at part {}: {e}, retrying in {} ms",
                            slot.id,
                            confirmed + 1,
                            self.retry_cooldown.as_millis()
                        );
                        tokio::select! {
                            biased;
                            () = token.cancelled() => return DispatchOutcome::Cancelled,
                            () = tokio::time::sleep(self.retry_cooldown) => {}
                        }
                    }
                },
            }
        }

        DispatchOutcome::Delivered
    }

    async fn publish(&self, payload: &Payload) -> Result<(), TransportError> {
        let _guard = self.publish_lock.lock().await;
        self.transport.publish(&self.topic, payload).await
    }
}
