//! Minimal Telegram Bot API client.
//!
//! Only the calls the channel needs: long polling, send/edit, chat actions
//! and file download. Errors are classified so callers can tell "nothing
//! changed" and "bad markup" apart from real failures.

use async_trait::async_trait;
use forgehand_core::error::ChannelError;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::trace;

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub photo: Option<Vec<PhotoSize>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct File {
    #[serde(default)]
    file_path: Option<String>,
}

/// The Bot API surface used by the channel.
#[async_trait]
pub trait TelegramApi: Send + Sync {
    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, ChannelError>;

    /// Send a new message, returning its id. `markup` enables Markdown parsing.
    async fn send_message(&self, chat_id: i64, text: &str, markup: bool) -> Result<i64, ChannelError>;

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        markup: bool,
    ) -> Result<(), ChannelError>;

    async fn send_chat_action(&self, chat_id: i64, action: &str) -> Result<(), ChannelError>;

    /// Resolve a file id and download its bytes.
    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, ChannelError>;
}

/// Map a failed Bot API response to a [`ChannelError`].
pub fn classify_error(code: i64, description: &str, retry_after: Option<u64>) -> ChannelError {
    let lower = description.to_lowercase();
    if lower.contains("message is not modified") {
        ChannelError::NotModified
    } else if lower.contains("can't parse entities") || lower.contains("can't find end of the entity") {
        ChannelError::MarkupRejected(description.to_string())
    } else if code == 429 {
        ChannelError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(1),
        }
    } else {
        ChannelError::Api {
            code,
            description: description.to_string(),
        }
    }
}

/// [`TelegramApi`] over HTTPS with reqwest.
pub struct HttpTelegramApi {
    client: reqwest::Client,
    method_base: String,
    file_base: String,
}

impl HttpTelegramApi {
    pub fn new(api_base: &str, bot_token: &str) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ChannelError::NotConfigured(format!("HTTP client: {e}")))?;
        let base = api_base.trim_end_matches('/');
        Ok(Self {
            client,
            method_base: format!("{base}/bot{bot_token}"),
            file_base: format!("{base}/file/bot{bot_token}"),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Result<T, ChannelError> {
        trace!(method, "Telegram API call");
        let response = self
            .client
            .post(format!("{}/{method}", self.method_base))
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::Network(strip_token(&e.to_string())))?;

        let status = response.status().as_u16() as i64;
        let parsed: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| ChannelError::Network(format!("invalid response to {method}: {e}")))?;

        match (parsed.ok, parsed.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(classify_error(
                parsed.error_code.unwrap_or(status),
                parsed.description.as_deref().unwrap_or("unknown error"),
                parsed.parameters.and_then(|p| p.retry_after),
            )),
        }
    }
}

/// reqwest errors include the request URL, which carries the bot token.
fn strip_token(message: &str) -> String {
    match (message.find("/bot"), message.rfind('/')) {
        (Some(start), Some(end)) if end > start => {
            format!("{}/bot<redacted>{}", &message[..start], &message[end..])
        }
        _ => message.to_string(),
    }
}

fn with_parse_mode(mut body: serde_json::Value, markup: bool) -> serde_json::Value {
    if markup {
        body["parse_mode"] = serde_json::Value::String("Markdown".into());
    }
    body
}

#[async_trait]
impl TelegramApi for HttpTelegramApi {
    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, ChannelError> {
        self.call(
            "getUpdates",
            serde_json::json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message"],
            }),
            Duration::from_secs(timeout_secs + 10),
        )
        .await
    }

    async fn send_message(&self, chat_id: i64, text: &str, markup: bool) -> Result<i64, ChannelError> {
        let body = with_parse_mode(serde_json::json!({ "chat_id": chat_id, "text": text }), markup);
        let sent: SentMessage = self.call("sendMessage", body, Duration::from_secs(30)).await?;
        Ok(sent.message_id)
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        markup: bool,
    ) -> Result<(), ChannelError> {
        let body = with_parse_mode(
            serde_json::json!({ "chat_id": chat_id, "message_id": message_id, "text": text }),
            markup,
        );
        // The result is the edited message (or `true`); only success matters.
        let _: serde_json::Value = self.call("editMessageText", body, Duration::from_secs(30)).await?;
        Ok(())
    }

    async fn send_chat_action(&self, chat_id: i64, action: &str) -> Result<(), ChannelError> {
        let _: bool = self
            .call(
                "sendChatAction",
                serde_json::json!({ "chat_id": chat_id, "action": action }),
                Duration::from_secs(10),
            )
            .await?;
        Ok(())
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, ChannelError> {
        let file: File = self
            .call("getFile", serde_json::json!({ "file_id": file_id }), Duration::from_secs(30))
            .await?;
        let path = file
            .file_path
            .ok_or_else(|| ChannelError::Api { code: 400, description: "file has no path".into() })?;

        let response = self
            .client
            .get(format!("{}/{path}", self.file_base))
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .map_err(|e| ChannelError::Network(strip_token(&e.to_string())))?;
        if !response.status().is_success() {
            return Err(ChannelError::Api {
                code: response.status().as_u16() as i64,
                description: "file download failed".into(),
            });
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ChannelError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_errors() {
        assert!(matches!(
            classify_error(400, "Bad Request: message is not modified: specified new message content is the same", None),
            ChannelError::NotModified
        ));
        assert!(matches!(
            classify_error(400, "Bad Request: can't parse entities: Can't find end of the entity starting at byte offset 12", None),
            ChannelError::MarkupRejected(_)
        ));
        assert!(matches!(
            classify_error(429, "Too Many Requests: retry after 7", Some(7)),
            ChannelError::RateLimited { retry_after_secs: 7 }
        ));
        assert!(matches!(
            classify_error(403, "Forbidden: bot was blocked by the user", None),
            ChannelError::Api { code: 403, .. }
        ));
    }

    #[test]
    fn parses_update_with_photo() {
        let raw = r#"{
            "ok": true,
            "result": [{
                "update_id": 10,
                "message": {
                    "message_id": 5,
                    "chat": {"id": 42, "type": "private"},
                    "from": {"id": 7, "is_bot": false, "first_name": "A", "username": "ada"},
                    "caption": "what is this?",
                    "photo": [
                        {"file_id": "small", "width": 90, "height": 90},
                        {"file_id": "large", "width": 1280, "height": 1280}
                    ]
                }
            }]
        }"#;
        let parsed: ApiResponse<Vec<Update>> = serde_json::from_str(raw).unwrap();
        let update = &parsed.result.unwrap()[0];
        let message = update.message.as_ref().unwrap();
        assert_eq!(message.chat.id, 42);
        assert_eq!(message.from.as_ref().unwrap().username.as_deref(), Some("ada"));
        assert_eq!(message.photo.as_ref().unwrap().len(), 2);
        assert!(message.text.is_none());
    }

    #[test]
    fn error_response_parses() {
        let raw = r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 3","parameters":{"retry_after":3}}"#;
        let parsed: ApiResponse<SentMessage> = serde_json::from_str(raw).unwrap();
        assert!(!parsed.ok);
        assert!(parsed.result.is_none());
        assert_eq!(parsed.parameters.unwrap().retry_after, Some(3));
    }

    #[test]
    fn token_is_redacted_from_errors() {
        let msg = "error sending request for url (https://api.telegram.org/bot123:ABC/getUpdates)";
        let cleaned = strip_token(msg);
        assert!(!cleaned.contains("123:ABC"));
        assert!(cleaned.contains("/getUpdates"));
    }

    #[test]
    fn parse_mode_only_with_markup() {
        let body = with_parse_mode(serde_json::json!({"text": "hi"}), true);
        assert_eq!(body["parse_mode"], "Markdown");
        let body = with_parse_mode(serde_json::json!({"text": "hi"}), false);
        assert!(body.get("parse_mode").is_none());
    }
}
