//! Conversation turn and history types.
//!
//! These are the core value objects that flow through the entire system:
//! a transport receives user input → the agent loop appends turns → the
//! provider sees the ordered history on every model call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The end user
    User,
    /// The model
    Agent,
    /// Synthetic turn carrying a tool's output back to the model
    ToolResult,
}

/// One ordered piece of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    /// Base64-encoded binary media attached by the user.
    Image {
        media_type: String,
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// A single immutable turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Unique turn ID
    pub id: String,

    /// Who produced this turn
    pub role: Role,

    /// Ordered content parts
    pub parts: Vec<ContentPart>,

    /// When the turn was appended
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    fn with_parts(role: Role, parts: Vec<ContentPart>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            parts,
            timestamp: Utc::now(),
        }
    }

    /// Create a plain-text user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_parts(Role::User, vec![ContentPart::text(content)])
    }

    /// Create a user turn from arbitrary parts (text and/or images).
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self::with_parts(Role::User, parts)
    }

    /// Create an agent turn.
    pub fn agent(parts: Vec<ContentPart>) -> Self {
        Self::with_parts(Role::Agent, parts)
    }

    /// Create a tool-result turn for one invocation.
    pub fn tool_result(
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::with_parts(
            Role::ToolResult,
            vec![ContentPart::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
                is_error,
            }],
        )
    }

    /// Concatenation of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// IDs of the tool invocations requested in this turn.
    pub fn tool_use_ids(&self) -> Vec<&str> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolUse { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// The invocation this turn answers, if it is a tool-result turn.
    pub fn answered_tool_use_id(&self) -> Option<&str> {
        self.parts.iter().find_map(|p| match p {
            ContentPart::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
            _ => None,
        })
    }
}

/// A conversation is an ordered sequence of turns owned by one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    /// Ordered turns
    pub turns: Vec<Turn>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last turn was added
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            turns: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a turn.
    pub fn push(&mut self, turn: Turn) {
        self.updated_at = Utc::now();
        self.turns.push(turn);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Text of the most recent agent turn, if any.
    pub fn last_agent_text(&self) -> Option<String> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::Agent)
            .map(Turn::text)
            .filter(|t| !t.is_empty())
    }

    /// Append a failure result for every invocation of the last agent turn
    /// that has no result yet. Returns how many results were added.
    ///
    /// Providers reject histories where a tool invocation is not followed by
    /// its result, so an interrupted batch must be closed before reuse.
    pub fn seal_unresolved_tool_uses(&mut self, note: &str) -> usize {
        let Some(agent_idx) = self.turns.iter().rposition(|t| t.role == Role::Agent) else {
            return 0;
        };
        let answered: Vec<&str> = self.turns[agent_idx + 1..]
            .iter()
            .filter_map(Turn::answered_tool_use_id)
            .collect();
        let pending: Vec<String> = self.turns[agent_idx]
            .tool_use_ids()
            .into_iter()
            .filter(|id| !answered.contains(id))
            .map(str::to_string)
            .collect();

        for id in &pending {
            self.push(Turn::tool_result(id, note, true));
        }
        pending.len()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
