//! Session registry — one conversation per connection.
//!
//! Each session owns a worker task that runs phases one at a time. A new
//! message cancels the phase in flight and runs next; there is no queue of
//! pending messages. Cancellation and reset take effect immediately.

use crate::loop_runner::{AgentLoop, PhaseEnd, continuation_prompt};
use forgehand_config::LimitConfig;
use forgehand_core::checkpoint::CheckpointRecord;
use forgehand_core::error::SessionError;
use forgehand_core::event::{AgentEvent, ClientInput, UserInput};
use forgehand_core::message::Conversation;
use forgehand_core::rate_limit::RateWindow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

enum Command {
    Run { request: RunRequest, cancel: CancellationToken, run_id: u64 },
    Reset,
}

enum RunRequest {
    Message(UserInput),
    Continue,
}

/// Cancellation handle of the phase in flight, tagged with its run id.
/// Empty whenever the session is idle.
type InFlight = Arc<Mutex<Option<(u64, CancellationToken)>>>;

struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    in_flight: InFlight,
    next_run: u64,
    rate: RateWindow,
}

/// Everything the worker owns between phases.
struct SessionState {
    id: String,
    history: Conversation,
    checkpoint: Option<CheckpointRecord>,
    in_flight: InFlight,
}

pub struct SessionRegistry {
    agent: Arc<AgentLoop>,
    message_limit: LimitConfig,
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new(agent: Arc<AgentLoop>, message_limit: LimitConfig) -> Self {
        Self {
            agent,
            message_limit,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Generate a fresh session id.
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Create a session whose events go to `events`. Replaces any session
    /// already registered under `id`.
    pub async fn open(&self, id: impl Into<String>, events: mpsc::Sender<AgentEvent>) {
        let id = id.into();
        let checkpoint = self.agent.checkpoints().load().await;
        let (tx, rx) = mpsc::unbounded_channel();
        let in_flight = InFlight::default();
        let state = SessionState {
            id: id.clone(),
            history: Conversation::new(),
            checkpoint,
            in_flight: in_flight.clone(),
        };
        tokio::spawn(session_worker(self.agent.clone(), state, rx, events));

        let handle = SessionHandle {
            commands: tx,
            in_flight,
            next_run: 0,
            rate: RateWindow::new(Instant::now()),
        };
        if let Some(old) = self.lock().insert(id.clone(), handle) {
            cancel_in_flight(&old);
        }
        info!(session = %id, "Session opened");
    }

    /// Route one client input to its session.
    pub fn submit(&self, id: &str, input: ClientInput) -> Result<(), SessionError> {
        self.submit_at(id, input, Instant::now())
    }

    pub fn submit_at(&self, id: &str, input: ClientInput, now: Instant) -> Result<(), SessionError> {
        let mut sessions = self.lock();
        let handle = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))?;

        let request = match input {
            ClientInput::Cancel => {
                debug!(session = %id, "Cancel requested");
                cancel_in_flight(handle);
                return Ok(());
            }
            ClientInput::Reset => {
                debug!(session = %id, "Reset requested");
                cancel_in_flight(handle);
                let _ = handle.commands.send(Command::Reset);
                return Ok(());
            }
            ClientInput::Message { content, images } => RunRequest::Message(UserInput {
                text: content.unwrap_or_default(),
                images,
            }),
            ClientInput::Continue => RunRequest::Continue,
        };

        if let RunRequest::Message(input) = &request
            && input.is_empty()
        {
            return Ok(());
        }

        if let Err(retry_after) = handle.rate.hit(
            now,
            self.message_limit.max_attempts,
            self.message_limit.window(),
        ) {
            warn!(session = %id, "Message rate limit exceeded");
            return Err(SessionError::RateLimited {
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }

        cancel_in_flight(handle);
        let cancel = CancellationToken::new();
        handle.next_run += 1;
        let run_id = handle.next_run;
        *lock_slot(&handle.in_flight) = Some((run_id, cancel.clone()));
        if handle.commands.send(Command::Run { request, cancel, run_id }).is_err() {
            warn!(session = %id, "Session worker has stopped");
        }
        Ok(())
    }

    /// Drop the session, cancelling any phase in flight.
    pub fn close(&self, id: &str) {
        if let Some(handle) = self.lock().remove(id) {
            cancel_in_flight(&handle);
            info!(session = %id, "Session closed");
        }
    }

    /// Whether a phase is running (or queued to run) in session `id`.
    pub fn is_running(&self, id: &str) -> bool {
        self.lock()
            .get(id)
            .is_some_and(|handle| lock_slot(&handle.in_flight).is_some())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn lock_slot(slot: &InFlight) -> std::sync::MutexGuard<'_, Option<(u64, CancellationToken)>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

fn cancel_in_flight(handle: &SessionHandle) {
    if let Some((_, token)) = lock_slot(&handle.in_flight).take() {
        token.cancel();
    }
}

/// Clear the slot if it still belongs to `run_id`; a newer run keeps its own.
fn finish_run(slot: &InFlight, run_id: u64) {
    let mut slot = lock_slot(slot);
    if slot.as_ref().is_some_and(|(id, _)| *id == run_id) {
        *slot = None;
    }
}

async fn session_worker(
    agent: Arc<AgentLoop>,
    mut state: SessionState,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::Sender<AgentEvent>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Reset => {
                state.history = Conversation::new();
                debug!(session = %state.id, "History cleared");
            }
            Command::Run { request, cancel, run_id } => {
                run_phase(&agent, &mut state, request, cancel, &events).await;
                finish_run(&state.in_flight, run_id);
            }
        }
    }
    debug!(session = %state.id, "Session worker stopped");
}

async fn run_phase(
    agent: &AgentLoop,
    state: &mut SessionState,
    request: RunRequest,
    cancel: CancellationToken,
    events: &mpsc::Sender<AgentEvent>,
) {
    if cancel.is_cancelled() {
        debug!(session = %state.id, "Skipping superseded request");
        return;
    }

    let input = match request {
        RunRequest::Message(input) => input,
        RunRequest::Continue => {
            let Some(record) = &state.checkpoint else {
                let _ = events
                    .send(AgentEvent::error("No checkpoint to continue from."))
                    .await;
                return;
            };
            info!(session = %state.id, next_step = %record.next_step, "Continuing from checkpoint");
            state.history = Conversation::new();
            UserInput::text(continuation_prompt(record))
        }
    };

    let history = std::mem::replace(&mut state.history, Conversation::new());
    let outcome = agent.run(input, history, events.clone(), cancel).await;
    debug!(session = %state.id, end = ?outcome.end, turns = outcome.history.len(), "Phase finished");
    if outcome.end == PhaseEnd::NeedsContinue {
        info!(session = %state.id, "Phase handed off");
    }
    state.history = outcome.history;
    state.checkpoint = outcome.checkpoint;
}
