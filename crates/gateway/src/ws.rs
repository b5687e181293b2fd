//! WebSocket chat: one agent session per connection.
//!
//! Server frames are JSON-encoded [`AgentEvent`]s; client frames are
//! [`ClientInput`]s. A frame that does not parse gets an `error` event back
//! and the connection stays open.

use crate::SharedState;
use axum::extract::ws::{Message, WebSocket};
use forgehand_agent::SessionRegistry;
use forgehand_core::event::{AgentEvent, ClientInput};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 256;

pub async fn handle_socket(socket: WebSocket, state: SharedState) {
    let (sink, stream) = socket.split();
    run_connection(state.sessions.clone(), stream, sink).await;
}

/// Pump frames between the socket halves and a fresh session until either
/// side goes away.
pub async fn run_connection<I, O>(sessions: Arc<SessionRegistry>, mut incoming: I, mut outgoing: O)
where
    I: Stream<Item = Result<Message, axum::Error>> + Unpin,
    O: Sink<Message> + Unpin,
{
    let id = SessionRegistry::new_id();
    let (tx, mut events) = mpsc::channel::<AgentEvent>(EVENT_BUFFER);
    sessions.open(id.clone(), tx).await;
    info!(session = %id, "WebSocket session opened");

    loop {
        tokio::select! {
            frame = incoming.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_frame(&sessions, &id, text.as_str())
                        && send_event(&mut outgoing, &reply).await.is_err()
                    {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(session = %id, error = %e, "WebSocket read failed");
                    break;
                }
            },
            Some(event) = events.recv() => {
                if send_event(&mut outgoing, &event).await.is_err() {
                    break;
                }
            }
        }
    }

    sessions.close(&id);
    info!(session = %id, "WebSocket session closed");
}

/// Route one client frame. Returns an event to send straight back, if any.
fn handle_frame(sessions: &SessionRegistry, id: &str, text: &str) -> Option<AgentEvent> {
    let input: ClientInput = match serde_json::from_str(text) {
        Ok(input) => input,
        Err(e) => {
            warn!(session = %id, error = %e, "Invalid client frame");
            return Some(AgentEvent::error(format!("Invalid message: {e}")));
        }
    };
    match sessions.submit(id, input) {
        Ok(()) => None,
        Err(e) => Some(AgentEvent::error(e.to_string())),
    }
}

async fn send_event<O>(outgoing: &mut O, event: &AgentEvent) -> Result<(), ()>
where
    O: Sink<Message> + Unpin,
{
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "Failed to encode event");
            return Ok(());
        }
    };
    outgoing.send(Message::Text(json.into())).await.map_err(|_| ())
}
