//! Turns the provider's low-level stream events into agent events and a
//! completed agent turn.
//!
//! Blocks are keyed by their stream index. Several tool blocks may be open
//! at once; JSON fragments are routed by index and concatenated in arrival
//! order, then parsed when the block stops.

use forgehand_core::event::AgentEvent;
use forgehand_core::message::ContentPart;
use forgehand_core::provider::{BlockKind, StopReason, StreamEvent, Usage};
use forgehand_core::tool::ToolCall;
use std::collections::BTreeMap;
use tracing::{debug, warn};

enum OpenBlock {
    Text(String),
    ToolUse { id: String, name: String, json: String },
}

/// What one model call produced once its stream is finished.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    /// Content parts in block order, ready to append as an agent turn.
    pub parts: Vec<ContentPart>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

impl DecodedMessage {
    /// Tool invocations in block order.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolUse { id, name, input } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

#[derive(Default)]
pub struct StreamDecoder {
    open: BTreeMap<usize, OpenBlock>,
    closed: BTreeMap<usize, ContentPart>,
    stop: Option<(StopReason, Usage)>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one stream event. Returns the agent event to forward, if any.
    pub fn feed(&mut self, event: StreamEvent) -> Option<AgentEvent> {
        match event {
            StreamEvent::BlockStart { index, block } => match block {
                BlockKind::Text => {
                    self.open.insert(index, OpenBlock::Text(String::new()));
                    None
                }
                BlockKind::ToolUse { id, name } => {
                    let start = AgentEvent::ToolStart {
                        id: id.clone(),
                        tool: name.clone(),
                    };
                    self.open.insert(
                        index,
                        OpenBlock::ToolUse {
                            id,
                            name,
                            json: String::new(),
                        },
                    );
                    Some(start)
                }
            },
            StreamEvent::TextDelta { index, text } => match self.open.get_mut(&index) {
                Some(OpenBlock::Text(buf)) => {
                    buf.push_str(&text);
                    (!text.is_empty()).then_some(AgentEvent::TextChunk { content: text })
                }
                _ => {
                    debug!(index, "Text delta for a block that is not an open text block");
                    None
                }
            },
            StreamEvent::InputJsonDelta { index, partial_json } => {
                match self.open.get_mut(&index) {
                    Some(OpenBlock::ToolUse { json, .. }) => json.push_str(&partial_json),
                    _ => debug!(index, "JSON delta for a block that is not an open tool block"),
                }
                None
            }
            StreamEvent::BlockStop { index } => {
                if let Some(block) = self.open.remove(&index) {
                    self.close(index, block);
                }
                None
            }
            StreamEvent::MessageStop { stop_reason, usage } => {
                self.stop = Some((stop_reason, usage));
                None
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.stop.is_some()
    }

    /// Close any blocks still open and return the decoded message.
    ///
    /// `None` when the stream never reached its message stop.
    pub fn finish(mut self) -> Option<DecodedMessage> {
        let (stop_reason, usage) = self.stop.take()?;
        let still_open = std::mem::take(&mut self.open);
        for (index, block) in still_open {
            self.close(index, block);
        }
        Some(DecodedMessage {
            parts: self.closed.into_values().collect(),
            stop_reason,
            usage,
        })
    }

    fn close(&mut self, index: usize, block: OpenBlock) {
        match block {
            OpenBlock::Text(text) => {
                if !text.is_empty() {
                    self.closed.insert(index, ContentPart::Text { text });
                }
            }
            OpenBlock::ToolUse { id, name, json } => {
                let input = parse_tool_input(&name, &json);
                self.closed.insert(index, ContentPart::ToolUse { id, name, input });
            }
        }
    }
}

/// Parse accumulated tool input. Anything that is not a JSON object
/// becomes `{}`.
pub fn parse_tool_input(tool: &str, raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) if value.is_object() => value,
        Ok(_) => {
            warn!(tool = %tool, "Tool input is not a JSON object, using empty input");
            serde_json::json!({})
        }
        Err(e) => {
            warn!(tool = %tool, error = %e, "Malformed tool input, using empty input");
            serde_json::json!({})
        }
    }
}
