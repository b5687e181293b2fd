//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Base64 image blocks for user attachments
//! - Streaming via SSE, surfaced as block-level [`StreamEvent`]s

use async_trait::async_trait;
use forgehand_core::error::ProviderError;
use forgehand_core::message::{ContentPart, Role, Turn};
use forgehand_core::provider::*;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    api_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: "anthropic".into(),
            api_url: DEFAULT_API_URL.into(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Point at a different Messages endpoint (e.g., a proxy or a test server).
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Convert turns to Anthropic API messages.
    ///
    /// Tool-result turns become `user` messages; consecutive messages with the
    /// same role are merged because the API requires alternation.
    fn to_api_messages(turns: &[Turn]) -> Vec<AnthropicMessage> {
        let mut result: Vec<AnthropicMessage> = Vec::new();

        for turn in turns {
            let role = match turn.role {
                Role::Agent => "assistant",
                Role::User | Role::ToolResult => "user",
            };
            let blocks: Vec<ContentBlock> = turn
                .parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } if text.is_empty() => None,
                    ContentPart::Text { text } => Some(ContentBlock::Text { text: text.clone() }),
                    ContentPart::Image { media_type, data } => Some(ContentBlock::Image {
                        source: ImageSource {
                            kind: "base64".into(),
                            media_type: media_type.clone(),
                            data: data.clone(),
                        },
                    }),
                    ContentPart::ToolUse { id, name, input } => Some(ContentBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    }),
                    ContentPart::ToolResult { tool_use_id, content, is_error } => {
                        Some(ContentBlock::ToolResult {
                            tool_use_id: tool_use_id.clone(),
                            content: content.clone(),
                            is_error: *is_error,
                        })
                    }
                })
                .collect();

            if blocks.is_empty() {
                continue;
            }

            match result.last_mut() {
                Some(last) if last.role == role => last.content.extend(blocks),
                _ => result.push(AnthropicMessage {
                    role: role.into(),
                    content: blocks,
                }),
            }
        }

        result
    }

    /// Convert tool definitions to Anthropic format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.turns),
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": true,
        });

        if !request.system.is_empty() {
            body["system"] = serde_json::json!(request.system);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(&self, request: ProviderRequest) -> Result<EventStream, ProviderError> {
        let body = Self::request_body(&request);

        debug!(
            provider = "anthropic",
            model = %request.model,
            turns = request.turns.len(),
            "Sending streaming request"
        );

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid Anthropic API key".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut parser = SseParser::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for item in parser.push(&bytes) {
                    let finished = matches!(item, Ok(StreamEvent::MessageStop { .. }) | Err(_));
                    if tx.send(item).await.is_err() || finished {
                        return;
                    }
                }
            }

            let _ = tx
                .send(Err(ProviderError::StreamInterrupted(
                    "stream ended before message_stop".into(),
                )))
                .await;
        });

        Ok(rx)
    }
}

/// Incremental parser for the Messages API SSE body.
///
/// Bytes are buffered until a full line is available, so multi-byte UTF-8
/// sequences and JSON payloads may be split anywhere across network chunks.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    usage: Usage,
    stop_reason: Option<StopReason>,
}

impl SseParser {
    /// Feed raw bytes; returns every event completed by them, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<StreamEvent, ProviderError>> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();

        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            // Event names are repeated in the payload's "type" field.
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() {
                continue;
            }

            let event: serde_json::Value = match serde_json::from_str(data) {
                Ok(v) => v,
                Err(e) => {
                    trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                    continue;
                }
            };

            if let Some(item) = self.handle(&event) {
                out.push(item);
            }
        }

        out
    }

    fn handle(&mut self, event: &serde_json::Value) -> Option<Result<StreamEvent, ProviderError>> {
        let index = event["index"].as_u64().unwrap_or(0) as usize;

        match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                let usage = &event["message"]["usage"];
                self.usage.input_tokens = usage["input_tokens"].as_u64().unwrap_or(0)
                    + usage["cache_creation_input_tokens"].as_u64().unwrap_or(0)
                    + usage["cache_read_input_tokens"].as_u64().unwrap_or(0);
                self.usage.output_tokens = usage["output_tokens"].as_u64().unwrap_or(0);
                None
            }
            "content_block_start" => {
                let block = &event["content_block"];
                match block["type"].as_str() {
                    Some("text") => Some(Ok(StreamEvent::BlockStart {
                        index,
                        block: BlockKind::Text,
                    })),
                    Some("tool_use") => Some(Ok(StreamEvent::BlockStart {
                        index,
                        block: BlockKind::ToolUse {
                            id: block["id"].as_str().unwrap_or("").to_string(),
                            name: block["name"].as_str().unwrap_or("").to_string(),
                        },
                    })),
                    // thinking, server tools, ...: not surfaced
                    _ => None,
                }
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => delta["text"].as_str().map(|text| {
                        Ok(StreamEvent::TextDelta {
                            index,
                            text: text.to_string(),
                        })
                    }),
                    Some("input_json_delta") => delta["partial_json"].as_str().map(|partial| {
                        Ok(StreamEvent::InputJsonDelta {
                            index,
                            partial_json: partial.to_string(),
                        })
                    }),
                    _ => None,
                }
            }
            "content_block_stop" => Some(Ok(StreamEvent::BlockStop { index })),
            "message_delta" => {
                if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(StopReason::parse(reason));
                }
                if let Some(out) = event["usage"]["output_tokens"].as_u64() {
                    self.usage.output_tokens = out;
                }
                None
            }
            "message_stop" => Some(Ok(StreamEvent::MessageStop {
                stop_reason: self
                    .stop_reason
                    .take()
                    .unwrap_or_else(|| StopReason::Other("unknown".into())),
                usage: self.usage,
            })),
            "error" => {
                let message = event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error")
                    .to_string();
                Some(Err(ProviderError::StreamInterrupted(message)))
            }
            _ => None,
        }
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image { source: ImageSource },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_STREAM: &str = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"usage\":{\"input_tokens\":1200,\"output_tokens\":1}}}\n\n",
        "event: content_block_start\n",
        "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
        "event: ping\n",
        "data: {\"type\":\"ping\"}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Reading the file — ok\"}}\n\n",
        "event: content_block_stop\n",
        "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
        "event: content_block_start\n",
        "data: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_1\",\"name\":\"read_file\",\"input\":{}}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"path\\\": \"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"\\\"README.md\\\"}\"}}\n\n",
        "event: content_block_stop\n",
        "data: {\"type\":\"content_block_stop\",\"index\":1}\n\n",
        "event: message_delta\n",
        "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"tool_use\"},\"usage\":{\"output_tokens\":42}}\n\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );

    fn expected_events() -> Vec<StreamEvent> {
        vec![
            StreamEvent::BlockStart { index: 0, block: BlockKind::Text },
            StreamEvent::TextDelta { index: 0, text: "Reading the file — ok".into() },
            StreamEvent::BlockStop { index: 0 },
            StreamEvent::BlockStart {
                index: 1,
                block: BlockKind::ToolUse { id: "toolu_1".into(), name: "read_file".into() },
            },
            StreamEvent::InputJsonDelta { index: 1, partial_json: "{\"path\": ".into() },
            StreamEvent::InputJsonDelta { index: 1, partial_json: "\"README.md\"}".into() },
            StreamEvent::BlockStop { index: 1 },
            StreamEvent::MessageStop {
                stop_reason: StopReason::ToolUse,
                usage: Usage { input_tokens: 1200, output_tokens: 42 },
            },
        ]
    }

    #[test]
    fn constructor_with_api_url() {
        let provider = AnthropicProvider::new("sk-ant-test")
            .unwrap()
            .with_api_url("https://custom.proxy.com/v1/messages/");
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.api_url, "https://custom.proxy.com/v1/messages");
    }

    #[test]
    fn parse_full_stream_in_one_push() {
        let mut parser = SseParser::default();
        let events: Vec<_> = parser
            .push(SAMPLE_STREAM.as_bytes())
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(events, expected_events());
    }

    #[test]
    fn parse_stream_split_at_every_byte() {
        // Includes a split inside the multi-byte em-dash.
        let mut parser = SseParser::default();
        let mut events = Vec::new();
        for byte in SAMPLE_STREAM.as_bytes() {
            events.extend(parser.push(std::slice::from_ref(byte)).into_iter().map(Result::unwrap));
        }
        assert_eq!(events, expected_events());
    }

    #[test]
    fn stream_error_event_surfaces() {
        let mut parser = SseParser::default();
        let out = parser.push(
            b"event: error\ndata: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
        );
        assert_eq!(out.len(), 1);
        match &out[0] {
            Err(ProviderError::StreamInterrupted(msg)) => assert_eq!(msg, "Overloaded"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn thinking_blocks_are_not_surfaced() {
        let mut parser = SseParser::default();
        let out = parser.push(concat!(
            "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"thinking\",\"thinking\":\"\"}}\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"hmm\"}}\n",
        ).as_bytes());
        assert!(out.is_empty());
    }

    #[test]
    fn message_conversion_merges_tool_results() {
        let turns = vec![
            Turn::user("fix it"),
            Turn::agent(vec![
                ContentPart::text("Looking"),
                ContentPart::ToolUse { id: "a".into(), name: "read_file".into(), input: serde_json::json!({}) },
                ContentPart::ToolUse { id: "b".into(), name: "list_dir".into(), input: serde_json::json!({}) },
            ]),
            Turn::tool_result("a", "contents", false),
            Turn::tool_result("b", "Error: missing", true),
        ];
        let api = AnthropicProvider::to_api_messages(&turns);
        assert_eq!(api.len(), 3);
        assert_eq!(api[0].role, "user");
        assert_eq!(api[1].role, "assistant");
        assert_eq!(api[1].content.len(), 3);
        assert_eq!(api[2].role, "user");
        assert_eq!(api[2].content.len(), 2);

        let json = serde_json::to_value(&api[2]).unwrap();
        assert_eq!(json["content"][0]["type"], "tool_result");
        assert!(json["content"][0].get("is_error").is_none());
        assert_eq!(json["content"][1]["is_error"], true);
    }

    #[test]
    fn image_parts_become_base64_sources() {
        let turns = vec![Turn::user_parts(vec![
            ContentPart::Image { media_type: "image/png".into(), data: "iVBOR".into() },
            ContentPart::text("what is this?"),
        ])];
        let json = serde_json::to_value(AnthropicProvider::to_api_messages(&turns)).unwrap();
        let image = &json[0]["content"][0];
        assert_eq!(image["type"], "image");
        assert_eq!(image["source"]["type"], "base64");
        assert_eq!(image["source"]["media_type"], "image/png");
        assert_eq!(json[0]["content"][1]["text"], "what is this?");
    }

    #[test]
    fn request_body_shape() {
        let request = ProviderRequest {
            model: "claude-test".into(),
            system: "You are careful.".into(),
            turns: vec![Turn::user("hi")],
            tools: vec![ToolDefinition {
                name: "list_dir".into(),
                description: "List".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            max_tokens: 1024,
            temperature: 0.2,
        };
        let body = AnthropicProvider::request_body(&request);
        assert_eq!(body["stream"], true);
        assert_eq!(body["system"], "You are careful.");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(body["messages"][0]["content"][0]["text"], "hi");
    }
}
