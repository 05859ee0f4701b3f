// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors surfaced to the embedding application.
///
/// Per-entry delivery failures never appear here: the dispatch loop absorbs
/// them and moves on to the next entry.
#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No tokio runtime available to drive the pipe")]
    NoRuntime,

    #[error("Failed to serialize log entry: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to compress payload: {0}")]
    Compression(#[from] std::io::Error),
}
