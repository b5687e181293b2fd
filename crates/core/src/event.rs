//! Agent events and client input — the transport-agnostic wire contract.
//!
//! The agent loop emits [`AgentEvent`]s in order on a channel; each transport
//! maps them onto its own protocol. Clients send [`ClientInput`] frames back.

use serde::{Deserialize, Serialize};
use crate::message::ContentPart;
use crate::provider::Usage;

/// An event emitted while a phase runs.
///
/// Exactly one terminal event (`NeedsContinue`, `Complete` or `Error`) ends a
/// run, unless the run was cancelled, in which case there is none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    TextChunk {
        content: String,
    },
    ToolStart {
        id: String,
        tool: String,
    },
    ToolDone {
        id: String,
        tool: String,
        /// Bounded preview; the full text goes to history only.
        result: String,
        success: bool,
    },
    /// Emitted periodically while a single tool call is in flight.
    Heartbeat {
        tool: String,
        /// Whole seconds since the tool started.
        elapsed: u64,
    },
    NeedsContinue {
        summary: String,
    },
    Complete {
        usage: Usage,
    },
    Error {
        message: String,
    },
}

impl AgentEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::NeedsContinue { .. } | Self::Complete { .. } | Self::Error { .. }
        )
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// A base64 image attached to a user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInput {
    #[serde(alias = "mediaType")]
    pub media_type: String,
    pub data: String,
}

/// A frame sent by a client to its session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientInput {
    Message {
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        images: Vec<ImageInput>,
    },
    Cancel,
    Continue,
    Reset,
}

/// The user-supplied half of a phase: text and/or images.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserInput {
    pub text: String,
    pub images: Vec<ImageInput>,
}

impl UserInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.images.is_empty()
    }

    /// Content parts for the user turn: images first, then the text.
    pub fn into_parts(self) -> Vec<ContentPart> {
        let mut parts: Vec<ContentPart> = self
            .images
            .into_iter()
            .map(|img| ContentPart::Image {
                media_type: img.media_type,
                data: img.data,
            })
            .collect();
        if !self.text.is_empty() {
            parts.push(ContentPart::text(self.text));
        }
        parts
    }
}
