//! Scripted provider and small tools shared by the agent tests.

use async_trait::async_trait;
use forgehand_checkpoint::InMemoryBackend;
use forgehand_core::checkpoint::CheckpointStore;
use forgehand_core::error::{ProviderError, ToolError};
use forgehand_core::event::AgentEvent;
use forgehand_core::provider::{
    BlockKind, EventStream, Provider, ProviderRequest, StopReason, StreamEvent, Usage,
};
use forgehand_core::tool::{Tool, ToolResult};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub enum Script {
    /// Replay these events, then end the stream.
    Events(Vec<StreamEvent>),
    /// Fail the call before any event.
    Fail(ProviderError),
    /// Open a stream that never produces anything.
    Hang,
}

/// Replays one script per `stream` call, in order, and records requests.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    requests: Arc<Mutex<Vec<ProviderRequest>>>,
    held: Arc<Mutex<Vec<mpsc::Sender<Result<StreamEvent, ProviderError>>>>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into())),
            ..Default::default()
        }
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: ProviderRequest) -> Result<EventStream, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Events(events)) => {
                let (tx, rx) = mpsc::channel(events.len() + 1);
                for event in events {
                    tx.try_send(Ok(event)).unwrap();
                }
                Ok(rx)
            }
            Some(Script::Fail(e)) => Err(e),
            Some(Script::Hang) => {
                let (tx, rx) = mpsc::channel(1);
                self.held.lock().unwrap().push(tx);
                Ok(rx)
            }
            None => Err(ProviderError::ApiError {
                status_code: 500,
                message: "script exhausted".into(),
            }),
        }
    }
}

fn stop(stop_reason: StopReason, input_tokens: u64) -> StreamEvent {
    StreamEvent::MessageStop {
        stop_reason,
        usage: Usage { input_tokens, output_tokens: 5 },
    }
}

/// A text block streamed word by word.
pub fn text_reply_with_stop(text: &str, input_tokens: u64, reason: StopReason) -> Script {
    let mut events = vec![StreamEvent::BlockStart { index: 0, block: BlockKind::Text }];
    for word in text.split_inclusive(' ') {
        events.push(StreamEvent::TextDelta { index: 0, text: word.into() });
    }
    events.push(StreamEvent::BlockStop { index: 0 });
    events.push(stop(reason, input_tokens));
    Script::Events(events)
}

pub fn text_reply(text: &str, input_tokens: u64) -> Script {
    text_reply_with_stop(text, input_tokens, StopReason::EndTurn)
}

/// Tool blocks `(id, name, raw json)`, each input split into two fragments.
pub fn tool_reply(calls: &[(&str, &str, &str)], input_tokens: u64) -> Script {
    let mut events = Vec::new();
    for (index, (id, name, json)) in calls.iter().enumerate() {
        events.push(StreamEvent::BlockStart {
            index,
            block: BlockKind::ToolUse { id: id.to_string(), name: name.to_string() },
        });
        let mid = json.char_indices().nth(json.chars().count() / 2).map_or(0, |(i, _)| i);
        for fragment in [&json[..mid], &json[mid..]] {
            events.push(StreamEvent::InputJsonDelta { index, partial_json: fragment.into() });
        }
        events.push(StreamEvent::BlockStop { index });
    }
    events.push(stop(StopReason::ToolUse, input_tokens));
    Script::Events(events)
}

pub fn memory_store() -> CheckpointStore {
    CheckpointStore::new(Arc::new(InMemoryBackend::new()))
}

pub fn drain(mut rx: mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Appends its `n` argument to a shared log.
pub struct RecordingTool {
    pub log: Arc<Mutex<Vec<i64>>>,
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        "record"
    }
    fn description(&self) -> &str {
        "Record a number"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {"n": {"type": "integer"}}})
    }
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let n = arguments["n"].as_i64().unwrap_or(-1);
        self.log.lock().unwrap().push(n);
        Ok(ToolResult::ok("", format!("recorded {n}")))
    }
}

/// Returns its arguments as JSON text.
pub struct EchoArgsTool;

#[async_trait]
impl Tool for EchoArgsTool {
    fn name(&self) -> &str {
        "echo_args"
    }
    fn description(&self) -> &str {
        "Echo arguments"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::ok("", arguments.to_string()))
    }
}

/// Sleeps, ignoring cancellation.
pub struct SlowTool {
    pub duration: Duration,
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }
    fn description(&self) -> &str {
        "Take a while"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        tokio::time::sleep(self.duration).await;
        Ok(ToolResult::ok("", "finally done"))
    }
}
