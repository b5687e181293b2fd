//! # Forgehand Core
//!
//! Domain types, traits, and error definitions for the Forgehand agent.
//! This crate has **no framework dependencies**. It defines the domain model
//! that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every seam is a trait here. Implementations live in their respective
//! crates. This enables:
//! - Swapping the model backend or checkpoint storage via configuration
//! - Easy testing with scripted providers and in-memory backends
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;
pub mod event;
pub mod checkpoint;
pub mod rate_limit;

// Re-export key types at crate root for ergonomics
pub use message::{ContentPart, Conversation, ConversationId, Role, Turn};
pub use provider::{BlockKind, Provider, ProviderRequest, StopReason, StreamEvent, ToolDefinition, Usage};
pub use tool::{Tool, ToolCall, ToolResult, ToolRegistry};
pub use event::{AgentEvent, ClientInput, ImageInput, UserInput};
pub use checkpoint::{CheckpointBackend, CheckpointRecord, CheckpointStore};
pub use rate_limit::{RateLimiter, RateWindow};
