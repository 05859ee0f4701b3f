// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Boundary to the publish/subscribe service the pipe streams through.
//!
//! The pipe never talks to a concrete protocol. Anything that can publish a
//! payload on a named topic, deliver named control messages, and report
//! presence of peers identified as `<role>|<sessionId>` can carry it.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;

/// One unit of a payload too large for a single publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkEnvelope {
    /// Content hash of the uncompressed entry, shared by every chunk.
    pub message_id: String,
    /// 1-based position of this chunk.
    pub part: usize,
    /// Set only on the chunk with the highest `part`.
    #[serde(rename = "final")]
    pub is_final: bool,
    pub chunk: String,
}

/// Body of a single publish call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// A whole entry: base64 zstd text, or the canonical JSON when smaller.
    Text(String),
    Chunk(ChunkEnvelope),
    /// Structured data, such as echoed control payloads.
    Json(serde_json::Value),
}

/// A named control message from the remote observer.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlEvent {
    pub name: String,
    pub data: serde_json::Value,
}

impl ControlEvent {
    #[must_use]
    pub fn new(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceAction {
    /// The peer joined.
    Enter,
    /// The peer was already joined when the subscription started.
    Present,
    Update,
    Leave,
}

impl PresenceAction {
    /// Whether the peer is joined after this action.
    #[must_use]
    pub fn is_joined(self) -> bool {
        !matches!(self, PresenceAction::Leave)
    }
}

/// A presence change for one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEvent {
    pub action: PresenceAction,
    pub client_id: String,
}

impl PresenceEvent {
    #[must_use]
    pub fn new(action: PresenceAction, client_id: impl Into<String>) -> Self {
        Self {
            action,
            client_id: client_id.into(),
        }
    }
}

/// Peer identity of the form `<role>|<sessionId>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerIdentity {
    pub role: String,
    pub session_id: String,
}

impl PeerIdentity {
    #[must_use]
    pub fn new(role: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            session_id: session_id.into(),
        }
    }

    /// Splits at the first `|`. Returns `None` when there is no separator.
    #[must_use]
    pub fn parse(client_id: &str) -> Option<Self> {
        let (role, session_id) = client_id.split_once('|')?;
        Some(Self::new(role, session_id))
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.role, self.session_id)
    }
}

/// How the pipe reacts to a failed publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Wait out the cooldown and try again.
    Transient,
    /// Credentials were rejected. Retrying cannot help.
    Authorization,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("transport service error {code}: {message}")]
    Service { code: u32, message: String },

    #[error("transport closed")]
    Closed,
}

impl TransportError {
    #[must_use]
    pub fn service(code: u32, message: impl Into<String>) -> Self {
        Self::Service {
            code,
            message: message.into(),
        }
    }

    /// Service codes in the `401xx` family, and plain 401/403, are
    /// credential rejections. Everything else is worth retrying.
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Service { code, .. }
                if *code == 401 || *code == 403 || code.to_string().starts_with("401") =>
            {
                FailureClass::Authorization
            }
            _ => FailureClass::Transient,
        }
    }
}

/// A publish/subscribe channel the pipe can stream through.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolves once the connection is established. Returns immediately when
    /// already connected.
    async fn connected(&self);

    /// Publishes one payload on `topic`.
    async fn publish(&self, topic: &str, payload: &Payload) -> Result<(), TransportError>;

    /// Subscribes to named control messages sent by the observer.
    fn control_events(&self) -> broadcast::Receiver<ControlEvent>;

    /// Subscribes to presence changes of peers on the channel.
    fn presence_events(&self) -> broadcast::Receiver<PresenceEvent>;

    /// Releases the connection. Later publishes may fail with
    /// [`TransportError::Closed`].
    async fn close(&self);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chunk_envelope_wire_shape() {
        let payload = Payload::Chunk(ChunkEnvelope {
            message_id: "abc".to_string(),
            part: 2,
            is_final: true,
            chunk: "xyz".to_string(),
        });
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({ "messageId": "abc", "part": 2, "final": true, "chunk": "xyz" })
        );
    }

    #[test]
    fn test_text_payload_serializes_as_plain_string() {
        let payload = Payload::Text("KLUv/Q==".to_string());
        assert_eq!(serde_json::to_value(&payload).unwrap(), json!("KLUv/Q=="));
    }

    #[test]
    fn test_failure_classes() {
        assert_eq!(
            TransportError::service(40142, "token expired").class(),
            FailureClass::Authorization
        );
        assert_eq!(
            TransportError::service(40100, "unauthorized").class(),
            FailureClass::Authorization
        );
        assert_eq!(
            TransportError::service(401, "unauthorized").class(),
            FailureClass::Authorization
        );
        assert_eq!(
            TransportError::service(40300, "forbidden channel").class(),
            FailureClass::Transient
        );
        assert_eq!(
            TransportError::service(50003, "timeout").class(),
            FailureClass::Transient
        );
        assert_eq!(
            TransportError::Unavailable("offline".into()).class(),
            FailureClass::Transient
        );
        assert_eq!(TransportError::Closed.class(), FailureClass::Transient);
    }

    #[test]
    fn test_peer_identity_parse() {
        assert_eq!(
            PeerIdentity::parse("web|abc-123"),
            Some(PeerIdentity::new("web", "abc-123"))
        );
        assert_eq!(
            PeerIdentity::parse("web|a|b"),
            Some(PeerIdentity::new("web", "a|b"))
        );
        assert_eq!(PeerIdentity::parse("anonymous"), None);
        assert_eq!(PeerIdentity::new("package", "s1").to_string(), "package|s1");
    }

    #[test]
    fn test_presence_action_joined() {
        assert!(PresenceAction::Enter.is_joined());
        assert!(PresenceAction::Present.is_joined());
        assert!(PresenceAction::Update.is_joined());
        assert!(!PresenceAction::Leave.is_joined());
    }
}
