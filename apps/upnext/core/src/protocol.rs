//! Event frames exchanged between the holder and its clients.
//!
//! Every frame is one JSON object, `{"event": "<name>", "data": <payload>}`,
//! with `data` omitted when the event carries nothing. Requests only ever
//! travel client → holder and pushes only holder → client.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::NumberQueue;

/// Ask the holder to mutate. The holder decides the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientRequest {
    /// Parse the raw text and merge it into the queue.
    #[serde(rename = "update-request")]
    Update(String),
    #[serde(rename = "clear-request")]
    Clear,
    /// Move the cursor; the holder clamps, so negative values are allowed.
    #[serde(rename = "cursor-request")]
    Cursor(i64),
}

/// Authoritative state pushed by the holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerPush {
    #[serde(rename = "initial-queue")]
    InitialQueue(NumberQueue),
    #[serde(rename = "initial-cursor")]
    InitialCursor(usize),
    #[serde(rename = "queue-updated")]
    QueueUpdated(NumberQueue),
    #[serde(rename = "queue-cleared")]
    QueueCleared,
    #[serde(rename = "cursor-updated")]
    CursorUpdated(usize),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("invalid frame: {0}")]
    Decode(#[source] serde_json::Error),
}

impl ClientRequest {
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientRequest::Update(_) => "update-request",
            ClientRequest::Clear => "clear-request",
            ClientRequest::Cursor(_) => "cursor-request",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(frame).map_err(ProtocolError::Decode)
    }
}

impl ServerPush {
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerPush::InitialQueue(_) => "initial-queue",
            ServerPush::InitialCursor(_) => "initial-cursor",
            ServerPush::QueueUpdated(_) => "queue-updated",
            ServerPush::QueueCleared => "queue-cleared",
            ServerPush::CursorUpdated(_) => "cursor-updated",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(frame).map_err(ProtocolError::Decode)
    }
}
