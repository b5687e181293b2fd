//! Streams agent events into Telegram messages.
//!
//! Text is accumulated in a buffer and pushed out by send/edit at most once
//! per edit interval. When the buffer outgrows a page, the current message is
//! finalized with its full page and a fresh message starts the next page.
//! Tool markers are placeholders tracked by buffer offset and rewritten in
//! place when the tool finishes.

use crate::telegram_api::TelegramApi;
use forgehand_config::TelegramConfig;
use forgehand_core::error::ChannelError;
use forgehand_core::event::AgentEvent;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub edit_interval: Duration,
    pub page_chars: usize,
    pub markdown: bool,
}

impl RenderSettings {
    pub fn from_config(config: &TelegramConfig) -> Self {
        Self {
            edit_interval: Duration::from_millis(config.edit_interval_ms),
            page_chars: config.page_chars,
            markdown: config.markdown,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Marker {
    start: usize,
    len: usize,
}

/// One reply in progress: possibly several pages, one message each.
#[derive(Default)]
struct RenderTarget {
    buffer: String,
    message_id: Option<i64>,
    page: usize,
    /// Byte offset where the current page begins.
    page_start: usize,
    last_flush: Option<Instant>,
    /// Text the current message shows, to skip no-op edits.
    last_sent: String,
    pending: bool,
    immediate: bool,
    markers: HashMap<String, Marker>,
}

impl RenderTarget {
    fn append(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.buffer.push_str(text);
        self.pending = true;
    }

    fn add_marker(&mut self, id: String, text: &str) {
        if !self.buffer.is_empty() && !self.buffer.ends_with('\n') {
            self.buffer.push('\n');
        }
        let start = self.buffer.len();
        self.buffer.push_str(text);
        self.markers.insert(id, Marker { start, len: text.len() });
        self.pending = true;
    }

    /// Rewrite a marker in place. No-op when it is unknown or already on a
    /// finalized page.
    fn replace_marker(&mut self, id: &str, text: &str) {
        let Some(marker) = self.markers.remove(id) else {
            return;
        };
        if marker.start < self.page_start {
            return;
        }
        let end = marker.start + marker.len;
        self.buffer.replace_range(marker.start..end, text);
        let delta = text.len() as isize - marker.len as isize;
        for other in self.markers.values_mut() {
            if other.start > marker.start {
                other.start = other.start.saturating_add_signed(delta);
            }
        }
        self.pending = true;
    }

    /// Byte offset where the current page ends, if the buffer runs past it.
    fn page_end(&self, page_chars: usize) -> Option<usize> {
        self.buffer[self.page_start..]
            .char_indices()
            .nth(page_chars)
            .map(|(i, _)| self.page_start + i)
    }
}

/// Receiving side of a [`ReplyBoundary`].
pub type BoundaryReceiver = mpsc::UnboundedReceiver<oneshot::Sender<()>>;

/// Closes the reply in progress from outside the event stream.
///
/// A cancelled or superseded run never sends a terminal event, so the
/// channel marks the end of its reply before the next request starts.
#[derive(Clone)]
pub struct ReplyBoundary {
    tx: mpsc::UnboundedSender<oneshot::Sender<()>>,
}

impl ReplyBoundary {
    pub fn new() -> (Self, BoundaryReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns once the renderer has delivered every event queued before
    /// the call; later events start a new reply.
    pub async fn mark(&self) {
        let (ack, acked) = oneshot::channel();
        if self.tx.send(ack).is_ok() {
            let _ = acked.await;
        }
    }
}

pub struct TelegramRenderer {
    api: Arc<dyn TelegramApi>,
    chat_id: i64,
    settings: RenderSettings,
    target: RenderTarget,
}

impl TelegramRenderer {
    pub fn new(api: Arc<dyn TelegramApi>, chat_id: i64, settings: RenderSettings) -> Self {
        Self {
            api,
            chat_id,
            settings,
            target: RenderTarget::default(),
        }
    }

    /// Consume events until the sender is dropped.
    pub async fn run(mut self, mut events: mpsc::Receiver<AgentEvent>, mut boundaries: BoundaryReceiver) {
        loop {
            let deadline = self.next_flush_at();
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => {
                        self.finish_target().await;
                        break;
                    }
                },
                Some(ack) = boundaries.recv() => {
                    while let Ok(event) = events.try_recv() {
                        self.handle(event).await;
                    }
                    debug!(chat_id = self.chat_id, "Reply closed without a terminal event");
                    self.finish_target().await;
                    let _ = ack.send(());
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.flush().await;
                }
            }
        }
        debug!(chat_id = self.chat_id, "Renderer stopped");
    }

    async fn handle(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::TextChunk { content } => self.target.append(&content),
            AgentEvent::ToolStart { id, tool } => {
                self.target.add_marker(id, &format!("🔧 `{tool}`…\n"));
            }
            AgentEvent::ToolDone { id, tool, success, .. } => {
                let icon = if success { "✅" } else { "❌" };
                self.target.replace_marker(&id, &format!("{icon} `{tool}`\n"));
            }
            AgentEvent::Heartbeat { tool, elapsed } => {
                debug!(chat_id = self.chat_id, tool = %tool, elapsed, "Tool still running");
                if let Err(e) = self.api.send_chat_action(self.chat_id, "typing").await {
                    debug!(error = %e, "Failed to send typing action");
                }
            }
            AgentEvent::Complete { usage } => {
                self.append_footer(&format!(
                    "✓ Done · {} in / {} out tokens",
                    usage.input_tokens, usage.output_tokens
                ));
                self.finish_target().await;
            }
            AgentEvent::NeedsContinue { summary } => {
                self.append_footer(&format!(
                    "⏸ Paused to stay within budget. Next: {summary}\nSend /continue to resume."
                ));
                self.finish_target().await;
            }
            AgentEvent::Error { message } => {
                self.append_footer(&format!("⚠️ {message}"));
                self.finish_target().await;
            }
        }
    }

    fn append_footer(&mut self, footer: &str) {
        if self.target.buffer.trim().is_empty() {
            self.target.append(footer);
        } else {
            self.target.append(&format!("\n\n{footer}"));
        }
    }

    fn next_flush_at(&self) -> Option<Instant> {
        let target = &self.target;
        if !target.pending {
            return None;
        }
        if target.immediate {
            return Some(Instant::now());
        }
        Some(match target.last_flush {
            Some(last) => last + self.settings.edit_interval,
            None => Instant::now(),
        })
    }

    /// Flush everything left, respecting the interval, then start a new target.
    async fn finish_target(&mut self) {
        while self.target.pending {
            if let Some(at) = self.next_flush_at() {
                sleep_until(at).await;
            }
            self.flush().await;
        }
        self.target = RenderTarget::default();
    }

    async fn flush(&mut self) {
        self.target.last_flush = Some(Instant::now());
        self.target.immediate = false;

        match self.target.page_end(self.settings.page_chars) {
            Some(end) => {
                let page = self.target.buffer[self.target.page_start..end].to_string();
                self.deliver(&page).await;
                debug!(chat_id = self.chat_id, page = self.target.page, "Page finalized");
                self.target.page += 1;
                self.target.page_start = end;
                self.target.message_id = None;
                self.target.last_sent.clear();
                self.target.pending = true;
                self.target.immediate = true;
            }
            None => {
                let rest = self.target.buffer[self.target.page_start..].to_string();
                self.target.pending = false;
                self.deliver(&rest).await;
            }
        }
    }

    /// Show `text` as the current page's message.
    async fn deliver(&mut self, text: &str) {
        if text.trim().is_empty() || text == self.target.last_sent {
            return;
        }
        match self.target.message_id {
            None => match self.send(text).await {
                Ok(id) => {
                    self.target.message_id = Some(id);
                    self.target.last_sent = text.to_string();
                }
                Err(e) => warn!(chat_id = self.chat_id, error = %e, "Failed to send message"),
            },
            Some(message_id) => match self.edit(message_id, text).await {
                Ok(()) | Err(ChannelError::NotModified) => self.target.last_sent = text.to_string(),
                Err(e) => warn!(chat_id = self.chat_id, message_id, error = %e, "Failed to edit message"),
            },
        }
    }

    async fn send(&self, text: &str) -> Result<i64, ChannelError> {
        if self.settings.markdown {
            match self.api.send_message(self.chat_id, text, true).await {
                Err(ChannelError::MarkupRejected(reason)) => {
                    debug!(reason = %reason, "Markdown rejected, resending as plain text");
                }
                other => return other,
            }
        }
        self.api.send_message(self.chat_id, text, false).await
    }

    async fn edit(&self, message_id: i64, text: &str) -> Result<(), ChannelError> {
        if self.settings.markdown {
            match self.api.edit_message(self.chat_id, message_id, text, true).await {
                Err(ChannelError::MarkupRejected(reason)) => {
                    debug!(reason = %reason, "Markdown rejected, editing as plain text");
                }
                other => return other,
            }
        }
        self.api.edit_message(self.chat_id, message_id, text, false).await
    }
}
