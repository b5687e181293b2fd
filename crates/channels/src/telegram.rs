//! Telegram channel — long-polls the Bot API and bridges chats to sessions.
//!
//! Each chat gets its own session (`telegram:<chat id>`) and a renderer task
//! that turns the session's events into streamed, paginated messages.

use crate::render::{RenderSettings, ReplyBoundary, TelegramRenderer};
use crate::telegram_api::{Message, TelegramApi};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use forgehand_agent::SessionRegistry;
use forgehand_config::TelegramConfig;
use forgehand_core::error::ChannelError;
use forgehand_core::event::{ClientInput, ImageInput};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const BASE_RETRY_DELAY_SECS: u64 = 1;
const MAX_RETRY_DELAY_SECS: u64 = 60;

const WELCOME: &str = "Forgehand is ready. Send a request to start.\n\n\
/cancel stops the current run\n\
/continue resumes from the saved checkpoint\n\
/reset clears the conversation";

pub struct TelegramChannel {
    api: Arc<dyn TelegramApi>,
    config: TelegramConfig,
    sessions: Arc<SessionRegistry>,
    open_chats: Mutex<HashMap<i64, ReplyBoundary>>,
}

impl TelegramChannel {
    pub fn new(api: Arc<dyn TelegramApi>, config: TelegramConfig, sessions: Arc<SessionRegistry>) -> Self {
        Self {
            api,
            config,
            sessions,
            open_chats: Mutex::new(HashMap::new()),
        }
    }

    fn retry_delay(attempt: u32) -> Duration {
        let secs = BASE_RETRY_DELAY_SECS
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(MAX_RETRY_DELAY_SECS);
        Duration::from_secs(secs)
    }

    /// Poll until `shutdown` fires. Transport errors back off and retry.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(allowed = self.config.allowed_users.len(), "Telegram channel starting");
        let mut offset = 0i64;
        let mut failures = 0u32;

        loop {
            let polled = tokio::select! {
                _ = shutdown.cancelled() => break,
                polled = self.api.get_updates(offset, self.config.poll_timeout_secs) => polled,
            };

            let updates = match polled {
                Ok(updates) => {
                    failures = 0;
                    updates
                }
                Err(e) => {
                    let delay = match &e {
                        ChannelError::RateLimited { retry_after_secs } => Duration::from_secs(*retry_after_secs),
                        _ => Self::retry_delay(failures),
                    };
                    failures = failures.saturating_add(1);
                    warn!(error = %e, retry_in_secs = delay.as_secs(), "Telegram polling failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                if let Some(message) = update.message {
                    self.handle_message(message).await;
                }
            }
        }

        let chats: Vec<i64> = self.chats().drain().map(|(chat_id, _)| chat_id).collect();
        for chat_id in chats {
            self.sessions.close(&session_id(chat_id));
        }
        info!("Telegram channel stopped");
    }

    /// Route one incoming message: allowlist, commands, then the session.
    pub async fn handle_message(&self, message: Message) {
        let chat_id = message.chat.id;
        let Some(user) = &message.from else {
            return;
        };
        let user_id = user.id.to_string();
        if !self.config.is_allowed(&user_id, user.username.as_deref()) {
            warn!(user_id = %user_id, username = ?user.username, "Telegram user not in allowlist");
            self.reply(chat_id, "Sorry, you are not allowed to use this bot.").await;
            return;
        }

        let text = message
            .text
            .as_deref()
            .or(message.caption.as_deref())
            .unwrap_or("")
            .trim()
            .to_string();

        let input = match command(&text) {
            Some("start") | Some("help") => {
                self.reply(chat_id, WELCOME).await;
                return;
            }
            Some("cancel") => {
                let boundary = self.ensure_session(chat_id).await;
                self.submit(chat_id, ClientInput::Cancel).await;
                boundary.mark().await;
                self.reply(chat_id, "Cancelled.").await;
                return;
            }
            Some("reset") => {
                let boundary = self.ensure_session(chat_id).await;
                self.submit(chat_id, ClientInput::Reset).await;
                boundary.mark().await;
                self.reply(chat_id, "Conversation cleared.").await;
                return;
            }
            Some("continue") => ClientInput::Continue,
            _ => {
                let images = self.download_photos(&message).await;
                if text.is_empty() && images.is_empty() {
                    return;
                }
                ClientInput::Message {
                    content: Some(text),
                    images,
                }
            }
        };

        let boundary = self.ensure_session(chat_id).await;
        // Close the superseded reply before the new run can stream into it.
        if self.sessions.is_running(&session_id(chat_id)) {
            self.submit(chat_id, ClientInput::Cancel).await;
            boundary.mark().await;
        }
        if let Err(e) = self.api.send_chat_action(chat_id, "typing").await {
            debug!(error = %e, "Failed to send typing action");
        }
        self.submit(chat_id, input).await;
    }

    async fn submit(&self, chat_id: i64, input: ClientInput) {
        if let Err(e) = self.sessions.submit(&session_id(chat_id), input) {
            self.reply(chat_id, &e.to_string()).await;
        }
    }

    async fn ensure_session(&self, chat_id: i64) -> ReplyBoundary {
        if let Some(boundary) = self.chats().get(&chat_id) {
            return boundary.clone();
        }
        let (boundary, boundaries) = ReplyBoundary::new();
        self.chats().insert(chat_id, boundary.clone());
        let (tx, rx) = mpsc::channel(256);
        self.sessions.open(session_id(chat_id), tx).await;
        let renderer = TelegramRenderer::new(
            self.api.clone(),
            chat_id,
            RenderSettings::from_config(&self.config),
        );
        tokio::spawn(renderer.run(rx, boundaries));
        debug!(chat_id, "Telegram session opened");
        boundary
    }

    /// Download the largest size of an attached photo.
    async fn download_photos(&self, message: &Message) -> Vec<ImageInput> {
        let Some(largest) = message
            .photo
            .as_ref()
            .and_then(|sizes| sizes.iter().max_by_key(|p| p.width * p.height))
        else {
            return Vec::new();
        };
        match self.api.download_file(&largest.file_id).await {
            Ok(bytes) => vec![ImageInput {
                media_type: "image/jpeg".into(),
                data: BASE64.encode(bytes),
            }],
            Err(e) => {
                warn!(error = %e, "Failed to download photo");
                self.reply(message.chat.id, "Could not download the photo.").await;
                Vec::new()
            }
        }
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.api.send_message(chat_id, text, false).await {
            warn!(chat_id, error = %e, "Failed to send reply");
        }
    }

    fn chats(&self) -> std::sync::MutexGuard<'_, HashMap<i64, ReplyBoundary>> {
        self.open_chats.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub fn session_id(chat_id: i64) -> String {
    format!("telegram:{chat_id}")
}

/// `/cmd` or `/cmd@botname` → `cmd`.
fn command(text: &str) -> Option<&str> {
    let first = text.split_whitespace().next()?;
    let name = first.strip_prefix('/')?;
    Some(name.split('@').next().unwrap_or(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::tests::{Call, FakeApi};
    use crate::telegram_api::{Chat, PhotoSize, Update, User};
    use async_trait::async_trait;
    use forgehand_agent::AgentLoop;
    use forgehand_checkpoint::InMemoryBackend;
    use forgehand_config::LimitConfig;
    use forgehand_core::checkpoint::CheckpointStore;
    use forgehand_core::error::ProviderError;
    use forgehand_core::provider::{
        BlockKind, EventStream, Provider, ProviderRequest, StopReason, StreamEvent, Usage,
    };
    use forgehand_core::tool::ToolRegistry;

    /// Records the last user text and fails every call.
    #[derive(Default)]
    struct RecordingProvider {
        seen: std::sync::Mutex<Vec<ProviderRequest>>,
    }

    #[async_trait]
    impl Provider for RecordingProvider {
        fn name(&self) -> &str {
            "recording"
        }
        async fn stream(&self, request: ProviderRequest) -> Result<EventStream, ProviderError> {
            self.seen.lock().unwrap().push(request);
            Err(ProviderError::Network("offline".into()))
        }
    }

    /// First call streams a partial answer and never finishes; later calls
    /// answer "fresh".
    #[derive(Default)]
    struct StalledThenFresh {
        calls: std::sync::Mutex<usize>,
        held: std::sync::Mutex<Vec<mpsc::Sender<Result<StreamEvent, ProviderError>>>>,
    }

    #[async_trait]
    impl Provider for StalledThenFresh {
        fn name(&self) -> &str {
            "stalled"
        }
        async fn stream(&self, _request: ProviderRequest) -> Result<EventStream, ProviderError> {
            let first = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls == 1
            };
            let (tx, rx) = mpsc::channel(8);
            tx.try_send(Ok(StreamEvent::BlockStart { index: 0, block: BlockKind::Text })).unwrap();
            if first {
                tx.try_send(Ok(StreamEvent::TextDelta { index: 0, text: "partial answer".into() }))
                    .unwrap();
                self.held.lock().unwrap().push(tx);
            } else {
                for event in [
                    StreamEvent::TextDelta { index: 0, text: "fresh".into() },
                    StreamEvent::BlockStop { index: 0 },
                    StreamEvent::MessageStop { stop_reason: StopReason::EndTurn, usage: Usage::default() },
                ] {
                    tx.try_send(Ok(event)).unwrap();
                }
            }
            Ok(rx)
        }
    }

    fn channel(allowed: &[&str]) -> (TelegramChannel, Arc<FakeApi>, Arc<RecordingProvider>) {
        let provider = Arc::new(RecordingProvider::default());
        let (channel, api) = channel_with(provider.clone(), allowed);
        (channel, api, provider)
    }

    fn channel_with(provider: Arc<dyn Provider>, allowed: &[&str]) -> (TelegramChannel, Arc<FakeApi>) {
        let api = Arc::new(FakeApi::default());
        let store = CheckpointStore::new(Arc::new(InMemoryBackend::new()));
        let agent = AgentLoop::new(provider, Arc::new(ToolRegistry::new()), store, "m");
        let sessions = Arc::new(SessionRegistry::new(
            Arc::new(agent),
            LimitConfig { max_attempts: 10, window_secs: 60 },
        ));
        let config = TelegramConfig {
            allowed_users: allowed.iter().map(|s| s.to_string()).collect(),
            edit_interval_ms: 10,
            markdown: false,
            ..Default::default()
        };
        (TelegramChannel::new(api.clone(), config, sessions), api)
    }

    fn message(user_id: i64, username: &str, text: &str) -> Message {
        Message {
            message_id: 1,
            chat: Chat { id: 42 },
            from: Some(User { id: user_id, username: Some(username.into()) }),
            text: Some(text.into()),
            caption: None,
            photo: None,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    async fn wait_for_text(api: &FakeApi, needle: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !api.texts().iter().any(|t| t.contains(needle)) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("never saw {needle:?}, got {:?}", api.texts()));
    }

    #[test]
    fn command_parsing() {
        assert_eq!(command("/start"), Some("start"));
        assert_eq!(command("/cancel@forgehand_bot"), Some("cancel"));
        assert_eq!(command("  /continue now"), Some("continue"));
        assert_eq!(command("hello /start"), None);
        assert_eq!(command(""), None);
    }

    #[test]
    fn retry_delay_backs_off_to_a_cap() {
        assert_eq!(TelegramChannel::retry_delay(0), Duration::from_secs(1));
        assert_eq!(TelegramChannel::retry_delay(3), Duration::from_secs(8));
        assert_eq!(TelegramChannel::retry_delay(20), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn unknown_user_is_refused() {
        let (channel, api, provider) = channel(&["@ada"]);
        channel.handle_message(message(9, "mallory", "hi")).await;
        assert_eq!(
            api.sends(),
            vec!["Sorry, you are not allowed to use this bot.".to_string()]
        );
        assert!(provider.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_replies_with_welcome() {
        let (channel, api, _) = channel(&["*"]);
        channel.handle_message(message(1, "ada", "/start")).await;
        assert!(api.sends()[0].starts_with("Forgehand is ready"));
        assert!(!channel.sessions.contains(&session_id(42)));
    }

    #[tokio::test]
    async fn text_reaches_the_session_and_errors_render() {
        let (channel, api, provider) = channel(&["ADA"]);
        channel.handle_message(message(1, "ada", "fix the build")).await;
        settle().await;

        let seen = provider.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].turns[0].text(), "fix the build");
        assert!(api.calls().contains(&Call::Action("typing".into())));
        assert!(api.texts().iter().any(|t| t.contains("offline")));
    }

    #[tokio::test]
    async fn photo_becomes_image_input() {
        let (channel, _, provider) = channel(&["*"]);
        let mut msg = message(1, "ada", "");
        msg.text = None;
        msg.caption = Some("what is this?".into());
        msg.photo = Some(vec![
            PhotoSize { file_id: "small".into(), width: 90, height: 90 },
            PhotoSize { file_id: "large".into(), width: 800, height: 600 },
        ]);
        channel.handle_message(msg).await;
        settle().await;

        let seen = provider.seen.lock().unwrap().clone();
        let parts = &seen[0].turns[0].parts;
        let forgehand_core::message::ContentPart::Image { data, .. } = &parts[0] else {
            panic!("expected image first");
        };
        assert_eq!(BASE64.decode(data).unwrap(), b"bytes-of-large");
        assert_eq!(seen[0].turns[0].text(), "what is this?");
    }

    #[tokio::test]
    async fn continue_without_checkpoint_reports_error() {
        let (channel, api, provider) = channel(&["*"]);
        channel.handle_message(message(1, "ada", "/continue")).await;
        settle().await;
        assert!(provider.seen.lock().unwrap().is_empty());
        assert!(api.texts().iter().any(|t| t.contains("No checkpoint")));
    }

    #[tokio::test]
    async fn cancelled_reply_stays_separate_from_next_one() {
        let (channel, api) = channel_with(Arc::new(StalledThenFresh::default()), &["*"]);

        channel.handle_message(message(1, "ada", "slow question")).await;
        wait_for_text(&api, "partial answer").await;
        channel.handle_message(message(1, "ada", "/cancel")).await;
        channel.handle_message(message(1, "ada", "new question")).await;
        wait_for_text(&api, "✓ Done").await;

        let texts = api.texts();
        assert_eq!(texts.len(), 3, "{texts:?}");
        assert_eq!(texts[0], "partial answer");
        assert_eq!(texts[1], "Cancelled.");
        assert!(texts[2].starts_with("fresh\n\n✓ Done"), "{texts:?}");
    }

    #[tokio::test]
    async fn superseding_message_starts_a_new_reply() {
        let (channel, api) = channel_with(Arc::new(StalledThenFresh::default()), &["*"]);

        channel.handle_message(message(1, "ada", "slow question")).await;
        wait_for_text(&api, "partial answer").await;
        assert!(channel.sessions.is_running(&session_id(42)));
        channel.handle_message(message(1, "ada", "new question")).await;
        wait_for_text(&api, "✓ Done").await;

        let texts = api.texts();
        assert_eq!(texts.len(), 2, "{texts:?}");
        assert_eq!(texts[0], "partial answer");
        assert!(texts[1].starts_with("fresh\n\n✓ Done"), "{texts:?}");
    }

    #[tokio::test]
    async fn run_polls_until_shutdown() {
        let (channel, _, provider) = channel(&["*"]);
        let api = Arc::new(FakeApi::default());
        api.updates.lock().unwrap().push(vec![Update {
            update_id: 5,
            message: Some(message(1, "ada", "hello")),
        }]);
        let channel = TelegramChannel::new(api.clone(), channel.config.clone(), channel.sessions.clone());

        let shutdown = CancellationToken::new();
        let stopper = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            stopper.cancel();
        });
        channel.run(shutdown).await;

        assert_eq!(provider.seen.lock().unwrap().len(), 1);
        assert!(!channel.sessions.contains(&session_id(42)));
    }
}
