//! The agent loop — one phase of stream → tools → stream until the model
//! ends its turn, a ceiling forces a handoff, or the run is cancelled.

use crate::stream_decoder::{DecodedMessage, StreamDecoder};
use forgehand_config::AppConfig;
use forgehand_core::checkpoint::{CheckpointRecord, CheckpointStore};
use forgehand_core::error::ProviderError;
use forgehand_core::event::{AgentEvent, UserInput};
use forgehand_core::message::{Conversation, Turn};
use forgehand_core::provider::{Provider, ProviderRequest, StopReason, Usage};
use forgehand_core::tool::{ToolCall, ToolRegistry, ToolResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SEAL_HANDOFF: &str = "Not executed: the phase ended before this tool ran. Resume from the checkpoint.";
const SEAL_CANCELLED: &str = "Not executed: the run was cancelled.";

const BASE_PROMPT: &str = "You are Forgehand, a coding agent that works on a software repository \
on behalf of its owner. Use the tools to inspect and change files, run allow-listed commands, \
and commit your work. Keep answers short; the owner reads them on a phone.\n\n\
For work that spans many steps, call save_checkpoint after each meaningful step so the task can \
resume if this phase runs out of budget. Call clear_checkpoint only after every acceptance \
criterion has been verified.";

/// How a phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEnd {
    Complete,
    NeedsContinue,
    Failed,
    Cancelled,
}

/// Result of [`AgentLoop::run`].
#[derive(Debug)]
pub struct PhaseOutcome {
    pub history: Conversation,
    pub end: PhaseEnd,
    pub usage: Usage,
    /// The checkpoint as stored when the phase ended.
    pub checkpoint: Option<CheckpointRecord>,
}

/// Runs phases against a provider and a tool registry.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    checkpoints: CheckpointStore,
    model: String,
    max_tokens: u32,
    temperature: f32,
    max_turns: u32,
    token_ceiling: u64,
    heartbeat: Duration,
    preview_chars: usize,
    system_prompt_override: Option<String>,
    kb_root: Option<PathBuf>,
    repo_root: Option<PathBuf>,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        checkpoints: CheckpointStore,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            tools,
            checkpoints,
            model: model.into(),
            max_tokens: 8192,
            temperature: 0.7,
            max_turns: 40,
            token_ceiling: 160_000,
            heartbeat: Duration::from_secs(10),
            preview_chars: 300,
            system_prompt_override: None,
            kb_root: None,
            repo_root: None,
        }
    }

    /// Build a loop with every knob taken from the loaded config.
    pub fn from_config(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        checkpoints: CheckpointStore,
        config: &AppConfig,
    ) -> Self {
        let mut agent = Self::new(provider, tools, checkpoints, &config.provider.model)
            .with_max_tokens(config.provider.max_tokens)
            .with_temperature(config.provider.temperature)
            .with_max_turns(config.agent.max_turns_per_phase)
            .with_token_ceiling(config.agent.phase_token_ceiling)
            .with_heartbeat(Duration::from_secs(config.agent.heartbeat_secs))
            .with_preview_chars(config.agent.result_preview_chars)
            .with_workspace(&config.workspace.knowledge_dir, &config.workspace.repo_dir);
        agent.system_prompt_override = config.agent.system_prompt_override.clone();
        agent
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = max;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Model calls allowed per phase.
    pub fn with_max_turns(mut self, max: u32) -> Self {
        self.max_turns = max;
        self
    }

    /// Cumulative input tokens that force a handoff.
    pub fn with_token_ceiling(mut self, ceiling: u64) -> Self {
        self.token_ceiling = ceiling;
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = interval;
        self
    }

    pub fn with_preview_chars(mut self, chars: usize) -> Self {
        self.preview_chars = chars;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt_override = Some(prompt.into());
        self
    }

    pub fn with_workspace(mut self, kb_root: &Path, repo_root: &Path) -> Self {
        self.kb_root = Some(kb_root.to_path_buf());
        self.repo_root = Some(repo_root.to_path_buf());
        self
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// System text for one phase.
    pub fn system_prompt(&self, checkpoint: Option<&CheckpointRecord>) -> String {
        if let Some(custom) = &self.system_prompt_override {
            return custom.clone();
        }
        let mut prompt = BASE_PROMPT.to_string();
        if let (Some(kb), Some(repo)) = (&self.kb_root, &self.repo_root) {
            prompt.push_str(&format!(
                "\n\nWorkspace:\n- Knowledge base (area \"kb\", read-only): {}\n- Repository (area \"repo\", read/write): {}",
                kb.display(),
                repo.display()
            ));
        }
        if let Some(record) = checkpoint {
            prompt.push_str("\n\nA task checkpoint is pending:\n");
            prompt.push_str(&record.render());
            prompt.push_str("\nResume it if the owner asks to continue.");
        }
        prompt
    }

    /// Run one phase.
    ///
    /// Emits at most one terminal event on `events`, and none when `cancel`
    /// fires. The returned history always ends in a state the provider will
    /// accept for the next call.
    pub async fn run(
        &self,
        input: UserInput,
        mut history: Conversation,
        events: mpsc::Sender<AgentEvent>,
        cancel: CancellationToken,
    ) -> PhaseOutcome {
        let goal = phase_goal(&input);
        history.push(Turn::user_parts(input.into_parts()));

        let pending = self.checkpoints.load().await;
        let system = self.system_prompt(pending.as_ref());
        let tool_definitions = self.tools.definitions();
        let emitter = Emitter { tx: &events, cancel: &cancel };
        let mut usage = Usage::default();

        info!(
            conversation = %history.id,
            turns = history.len(),
            resumed = pending.is_some(),
            "Starting phase"
        );

        for turn in 1..=self.max_turns {
            if cancel.is_cancelled() {
                return self.cancelled(history, usage).await;
            }

            debug!(conversation = %history.id, turn, "Calling model");
            let request = ProviderRequest {
                model: self.model.clone(),
                system: system.clone(),
                turns: history.turns.clone(),
                tools: tool_definitions.clone(),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            };

            let message = match self.stream_turn(request, &emitter, &cancel).await {
                Ok(Some(message)) => message,
                Ok(None) => return self.cancelled(history, usage).await,
                Err(e) => {
                    warn!(conversation = %history.id, error = %e, "Model call failed");
                    emitter.send(AgentEvent::error(e.to_string())).await;
                    return self.finish(history, PhaseEnd::Failed, usage).await;
                }
            };

            usage.add(message.usage);
            let calls = message.tool_calls();
            if !message.parts.is_empty() {
                history.push(Turn::agent(message.parts));
            }

            if usage.input_tokens > self.token_ceiling {
                info!(
                    conversation = %history.id,
                    input_tokens = usage.input_tokens,
                    ceiling = self.token_ceiling,
                    "Token ceiling reached, handing off"
                );
                return self.hand_off(history, &goal, usage, &emitter).await;
            }

            match message.stop_reason {
                StopReason::ToolUse if !calls.is_empty() => {
                    for call in &calls {
                        if cancel.is_cancelled() {
                            return self.cancelled(history, usage).await;
                        }
                        let result = self.execute_with_heartbeat(call, &emitter).await;
                        if cancel.is_cancelled() {
                            return self.cancelled(history, usage).await;
                        }
                        emitter
                            .send(AgentEvent::ToolDone {
                                id: call.id.clone(),
                                tool: call.name.clone(),
                                result: preview(&result.output, self.preview_chars),
                                success: result.success,
                            })
                            .await;
                        history.push(Turn::tool_result(&call.id, result.output, !result.success));
                    }
                }
                reason => {
                    debug!(conversation = %history.id, ?reason, "Phase complete");
                    emitter.send(AgentEvent::Complete { usage }).await;
                    return self.finish(history, PhaseEnd::Complete, usage).await;
                }
            }
        }

        info!(conversation = %history.id, max_turns = self.max_turns, "Turn ceiling reached, handing off");
        self.hand_off(history, &goal, usage, &emitter).await
    }

    /// Stream one model call. `Ok(None)` means cancelled mid-stream.
    async fn stream_turn(
        &self,
        request: ProviderRequest,
        emitter: &Emitter<'_>,
        cancel: &CancellationToken,
    ) -> Result<Option<DecodedMessage>, ProviderError> {
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            started = self.provider.stream(request) => started?,
        };

        let mut decoder = StreamDecoder::new();
        while !decoder.is_finished() {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                next = stream.recv() => next,
            };
            match next {
                Some(Ok(event)) => {
                    if let Some(agent_event) = decoder.feed(event) {
                        emitter.send(agent_event).await;
                    }
                }
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }

        decoder
            .finish()
            .map(Some)
            .ok_or_else(|| ProviderError::StreamInterrupted("stream ended before message stop".into()))
    }

    /// Run one tool to completion, emitting heartbeats while it is in flight.
    ///
    /// The tool is not aborted on cancellation; the caller discards its result.
    async fn execute_with_heartbeat(&self, call: &ToolCall, emitter: &Emitter<'_>) -> ToolResult {
        let started = tokio::time::Instant::now();
        let mut ticker = tokio::time::interval_at(started + self.heartbeat, self.heartbeat);
        let execution = self.tools.execute(call);
        tokio::pin!(execution);

        debug!(tool = %call.name, id = %call.id, "Executing tool");
        loop {
            tokio::select! {
                result = &mut execution => {
                    debug!(
                        tool = %call.name,
                        success = result.success,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Tool finished"
                    );
                    return result;
                }
                _ = ticker.tick() => {
                    emitter
                        .send(AgentEvent::Heartbeat {
                            tool: call.name.clone(),
                            elapsed: started.elapsed().as_secs(),
                        })
                        .await;
                }
            }
        }
    }

    /// Close the phase early: seal pending tool uses, make sure a checkpoint
    /// exists, and emit `needs_continue`.
    async fn hand_off(
        &self,
        mut history: Conversation,
        goal: &str,
        usage: Usage,
        emitter: &Emitter<'_>,
    ) -> PhaseOutcome {
        history.seal_unresolved_tool_uses(SEAL_HANDOFF);
        let last_text = history.last_agent_text();

        let record = match self.checkpoints.load().await {
            Some(mut existing) => {
                if last_text.is_some() {
                    existing.last_result = last_text;
                }
                existing
            }
            None => {
                let mut fresh = CheckpointRecord::new(
                    goal,
                    "Review the work so far, then continue toward the goal.",
                );
                fresh.last_result = last_text;
                fresh
            }
        };
        let summary = record.next_step.clone();
        let stored = match self.checkpoints.save(record).await {
            Ok(saved) => Some(saved),
            Err(e) => {
                warn!(error = %e, "Failed to save handoff checkpoint");
                None
            }
        };

        emitter.send(AgentEvent::NeedsContinue { summary }).await;
        PhaseOutcome {
            history,
            end: PhaseEnd::NeedsContinue,
            usage,
            checkpoint: match stored {
                Some(record) => Some(record),
                None => self.checkpoints.load().await,
            },
        }
    }

    async fn cancelled(&self, mut history: Conversation, usage: Usage) -> PhaseOutcome {
        let sealed = history.seal_unresolved_tool_uses(SEAL_CANCELLED);
        info!(conversation = %history.id, sealed, "Phase cancelled");
        self.finish(history, PhaseEnd::Cancelled, usage).await
    }

    async fn finish(&self, history: Conversation, end: PhaseEnd, usage: Usage) -> PhaseOutcome {
        PhaseOutcome {
            history,
            end,
            usage,
            checkpoint: self.checkpoints.load().await,
        }
    }
}

/// Prompt that starts a continuation phase from a saved checkpoint.
pub fn continuation_prompt(record: &CheckpointRecord) -> String {
    format!(
        "Continue the task from the checkpoint below. Start from the next step; do not redo \
         completed steps.\n\n{}",
        record.render()
    )
}

fn phase_goal(input: &UserInput) -> String {
    let text = input.text.trim();
    if text.is_empty() {
        "(image-only request)".to_string()
    } else {
        text.chars().take(500).collect()
    }
}

fn preview(output: &str, max_chars: usize) -> String {
    match output.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &output[..cut]),
        None => output.to_string(),
    }
}

/// Event sender that goes quiet once the run is cancelled.
struct Emitter<'a> {
    tx: &'a mpsc::Sender<AgentEvent>,
    cancel: &'a CancellationToken,
}

impl Emitter<'_> {
    async fn send(&self, event: AgentEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        if self.tx.send(event).await.is_err() {
            debug!("Event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use forgehand_core::message::{ContentPart, Role};
    use forgehand_core::provider::StreamEvent;

    fn agent(provider: ScriptedProvider, tools: ToolRegistry) -> (AgentLoop, CheckpointStore) {
        let store = memory_store();
        let agent = AgentLoop::new(Arc::new(provider), Arc::new(tools), store.clone(), "test-model");
        (agent, store)
    }

    async fn run_to_end(agent: &AgentLoop, text: &str) -> (PhaseOutcome, Vec<AgentEvent>) {
        let (tx, rx) = mpsc::channel(256);
        let outcome = agent
            .run(UserInput::text(text), Conversation::new(), tx, CancellationToken::new())
            .await;
        (outcome, drain(rx))
    }

    #[tokio::test]
    async fn text_reply_completes() {
        let provider = ScriptedProvider::new(vec![text_reply("Hello there", 10)]);
        let (agent, _) = agent(provider, ToolRegistry::new());
        let (outcome, events) = run_to_end(&agent, "hi").await;

        assert_eq!(outcome.end, PhaseEnd::Complete);
        assert_eq!(
            events,
            vec![
                AgentEvent::TextChunk { content: "Hello ".into() },
                AgentEvent::TextChunk { content: "there".into() },
                AgentEvent::Complete { usage: Usage { input_tokens: 10, output_tokens: 5 } },
            ]
        );
        assert_eq!(outcome.history.len(), 2);
        assert_eq!(outcome.history.turns[1].text(), "Hello there");
    }

    #[tokio::test]
    async fn tools_run_in_order_and_results_precede_next_tool() {
        let provider = ScriptedProvider::new(vec![
            tool_reply(&[("t1", "record", r#"{"n":1}"#), ("t2", "record", r#"{"n":2}"#)], 10),
            text_reply("done", 20),
        ]);
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(RecordingTool { log: log.clone() }));
        let (agent, _) = agent(provider.clone(), tools);

        let (outcome, events) = run_to_end(&agent, "go").await;
        assert_eq!(outcome.end, PhaseEnd::Complete);

        let starts: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::ToolStart { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect();
        let dones: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::ToolDone { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(starts, vec!["t1", "t2"]);
        assert_eq!(dones, starts);
        assert_eq!(*log.lock().unwrap(), vec![1, 2]);

        // user, agent(tool uses), result t1, result t2, agent(text)
        let roles: Vec<Role> = outcome.history.turns.iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Agent, Role::ToolResult, Role::ToolResult, Role::Agent]
        );
        assert_eq!(outcome.history.turns[2].answered_tool_use_id(), Some("t1"));
        assert_eq!(outcome.history.turns[3].answered_tool_use_id(), Some("t2"));

        // The second request carried both results.
        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].turns.len(), 4);
        assert_eq!(outcome.usage.input_tokens, 30);
    }

    #[tokio::test]
    async fn tool_failure_does_not_end_phase() {
        let provider = ScriptedProvider::new(vec![
            tool_reply(&[("t1", "missing_tool", "{}")], 10),
            text_reply("recovered", 10),
        ]);
        let (agent, _) = agent(provider, ToolRegistry::new());
        let (outcome, events) = run_to_end(&agent, "go").await;

        assert_eq!(outcome.end, PhaseEnd::Complete);
        assert!(events.iter().any(|e| matches!(e, AgentEvent::ToolDone { success: false, .. })));
        let ContentPart::ToolResult { is_error, .. } = &outcome.history.turns[2].parts[0] else {
            panic!("expected tool result");
        };
        assert!(is_error);
    }

    #[tokio::test]
    async fn token_ceiling_yields_single_needs_continue() {
        let provider = ScriptedProvider::new(vec![
            tool_reply(&[("t1", "record", r#"{"n":1}"#)], 600),
            tool_reply(&[("t2", "record", r#"{"n":2}"#)], 600),
        ]);
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(RecordingTool { log: log.clone() }));
        let (agent, store) = agent(provider, tools);
        let agent = agent.with_token_ceiling(1000);

        let (outcome, events) = run_to_end(&agent, "big refactor").await;
        assert_eq!(outcome.end, PhaseEnd::NeedsContinue);
        let terminals: Vec<&AgentEvent> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminals.len(), 1);
        assert!(matches!(terminals[0], AgentEvent::NeedsContinue { .. }));

        // The second batch was requested but never executed, and is sealed.
        assert_eq!(*log.lock().unwrap(), vec![1]);
        let last = outcome.history.turns.last().unwrap();
        assert_eq!(last.answered_tool_use_id(), Some("t2"));

        let record = store.load().await.unwrap();
        assert_eq!(record.goal, "big refactor");
        assert_eq!(outcome.checkpoint.unwrap().goal, "big refactor");
    }

    #[tokio::test]
    async fn handoff_updates_existing_checkpoint() {
        let provider = ScriptedProvider::new(vec![text_reply_with_stop(
            "Half way there",
            2000,
            StopReason::EndTurn,
        )]);
        let (agent, store) = agent(provider, ToolRegistry::new());
        let agent = agent.with_token_ceiling(1000);
        store
            .save(CheckpointRecord::new("ship feature", "write tests"))
            .await
            .unwrap();

        let (outcome, events) = run_to_end(&agent, "continue").await;
        assert_eq!(outcome.end, PhaseEnd::NeedsContinue);
        assert_eq!(
            events.last(),
            Some(&AgentEvent::NeedsContinue { summary: "write tests".into() })
        );
        let record = store.load().await.unwrap();
        assert_eq!(record.goal, "ship feature");
        assert_eq!(record.last_result.as_deref(), Some("Half way there"));
    }

    #[tokio::test]
    async fn turn_ceiling_is_a_handoff() {
        let provider = ScriptedProvider::new(vec![
            tool_reply(&[("t1", "record", r#"{"n":1}"#)], 10),
            tool_reply(&[("t2", "record", r#"{"n":2}"#)], 10),
        ]);
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(RecordingTool { log: Default::default() }));
        let (agent, _) = agent(provider, tools);
        let agent = agent.with_max_turns(2);

        let (outcome, events) = run_to_end(&agent, "loop").await;
        assert_eq!(outcome.end, PhaseEnd::NeedsContinue);
        assert!(matches!(events.last(), Some(AgentEvent::NeedsContinue { .. })));
        assert!(!events.iter().any(|e| matches!(e, AgentEvent::Error { .. })));
    }

    #[tokio::test]
    async fn other_stop_reason_completes() {
        let provider = ScriptedProvider::new(vec![text_reply_with_stop(
            "cut off",
            10,
            StopReason::Other("max_tokens".into()),
        )]);
        let (agent, _) = agent(provider, ToolRegistry::new());
        let (outcome, events) = run_to_end(&agent, "essay").await;
        assert_eq!(outcome.end, PhaseEnd::Complete);
        assert!(matches!(events.last(), Some(AgentEvent::Complete { .. })));
    }

    #[tokio::test]
    async fn provider_failure_is_error_event() {
        let provider = ScriptedProvider::new(vec![Script::Fail(ProviderError::Network(
            "connection refused".into(),
        ))]);
        let (agent, _) = agent(provider, ToolRegistry::new());
        let (outcome, events) = run_to_end(&agent, "hi").await;
        assert_eq!(outcome.end, PhaseEnd::Failed);
        assert_eq!(events.len(), 1);
        let AgentEvent::Error { message } = &events[0] else {
            panic!("expected error");
        };
        assert!(message.contains("connection refused"));
        assert_eq!(outcome.history.len(), 1);
    }

    #[tokio::test]
    async fn truncated_stream_is_error_event() {
        let provider = ScriptedProvider::new(vec![Script::Events(vec![
            StreamEvent::BlockStart { index: 0, block: forgehand_core::provider::BlockKind::Text },
            StreamEvent::TextDelta { index: 0, text: "partial".into() },
        ])]);
        let (agent, _) = agent(provider, ToolRegistry::new());
        let (outcome, events) = run_to_end(&agent, "hi").await;
        assert_eq!(outcome.end, PhaseEnd::Failed);
        assert!(matches!(events.last(), Some(AgentEvent::Error { .. })));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn malformed_tool_json_runs_with_empty_input() {
        let provider = ScriptedProvider::new(vec![
            tool_reply(&[("t1", "echo_args", r#"{"path": "unterminated"#)], 10),
            text_reply("ok", 10),
        ]);
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(EchoArgsTool));
        let (agent, _) = agent(provider, tools);
        let (outcome, events) = run_to_end(&agent, "go").await;

        assert_eq!(outcome.end, PhaseEnd::Complete);
        assert!(events.contains(&AgentEvent::ToolDone {
            id: "t1".into(),
            tool: "echo_args".into(),
            result: "{}".into(),
            success: true,
        }));
    }

    #[tokio::test]
    async fn long_results_are_previewed_but_stored_whole() {
        let provider = ScriptedProvider::new(vec![
            tool_reply(&[("t1", "echo_args", r#"{"blob":"xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx"}"#)], 10),
            text_reply("ok", 10),
        ]);
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(EchoArgsTool));
        let (agent, _) = agent(provider, tools);
        let agent = agent.with_preview_chars(10);
        let (outcome, events) = run_to_end(&agent, "go").await;

        let preview = events
            .iter()
            .find_map(|e| match e {
                AgentEvent::ToolDone { result, .. } => Some(result.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(preview.chars().count(), 11);
        assert!(preview.ends_with('…'));
        let ContentPart::ToolResult { content, .. } = &outcome.history.turns[2].parts[0] else {
            panic!("expected tool result");
        };
        assert!(content.len() > 40);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_while_tool_runs() {
        let provider = ScriptedProvider::new(vec![
            tool_reply(&[("t1", "slow", "{}")], 10),
            text_reply("ok", 10),
        ]);
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(SlowTool { duration: Duration::from_secs(25) }));
        let (agent, _) = agent(provider, tools);
        let agent = agent.with_heartbeat(Duration::from_secs(10));
        let (_, events) = run_to_end(&agent, "go").await;

        let beats: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::Heartbeat { elapsed, .. } => Some(*elapsed),
                _ => None,
            })
            .collect();
        assert_eq!(beats, vec![10, 20]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_tool_is_silent_and_seals_history() {
        let provider = ScriptedProvider::new(vec![tool_reply(
            &[("t1", "slow", "{}"), ("t2", "slow", "{}")],
            10,
        )]);
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(SlowTool { duration: Duration::from_secs(5) }));
        let (agent, _) = agent(provider, tools);

        let (tx, rx) = mpsc::channel(256);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            trigger.cancel();
        });
        let outcome = agent
            .run(UserInput::text("go"), Conversation::new(), tx, cancel)
            .await;

        assert_eq!(outcome.end, PhaseEnd::Cancelled);
        let events = drain(rx);
        assert!(events.iter().all(|e| !e.is_terminal()));
        assert!(!events.iter().any(|e| matches!(e, AgentEvent::ToolDone { .. })));

        // Both invocations answered by synthetic results.
        let answered: Vec<&str> = outcome
            .history
            .turns
            .iter()
            .filter_map(|t| t.answered_tool_use_id())
            .collect();
        assert_eq!(answered, vec!["t1", "t2"]);
    }

    #[tokio::test]
    async fn cancel_before_start_makes_no_model_call() {
        let provider = ScriptedProvider::new(vec![]);
        let (agent, _) = agent(provider.clone(), ToolRegistry::new());
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = agent
            .run(UserInput::text("hi"), Conversation::new(), tx, cancel)
            .await;
        assert_eq!(outcome.end, PhaseEnd::Cancelled);
        assert!(provider.requests().is_empty());
        assert!(drain(rx).is_empty());
    }

    #[tokio::test]
    async fn system_prompt_mentions_workspace_and_checkpoint() {
        let (agent, _) = agent(ScriptedProvider::new(vec![]), ToolRegistry::new());
        let agent = agent.with_workspace(Path::new("/srv/kb"), Path::new("/srv/repo"));
        let record = CheckpointRecord::new("migrate db", "run migrations");
        let prompt = agent.system_prompt(Some(&record));
        assert!(prompt.contains("/srv/kb"));
        assert!(prompt.contains("/srv/repo"));
        assert!(prompt.contains("Goal: migrate db"));
        assert!(!agent.system_prompt(None).contains("checkpoint is pending"));

        let custom = agent.with_system_prompt("Only answer in haiku.");
        assert_eq!(custom.system_prompt(Some(&record)), "Only answer in haiku.");
    }

    #[test]
    fn preview_respects_char_boundaries() {
        assert_eq!(preview("héllo wörld", 4), "héll…");
        assert_eq!(preview("short", 10), "short");
    }

    #[test]
    fn continuation_prompt_includes_next_step() {
        let record = CheckpointRecord::new("ship", "write docs");
        let prompt = continuation_prompt(&record);
        assert!(prompt.contains("Next step: write docs"));
    }
}
