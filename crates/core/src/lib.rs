//! # Blocks Core
//!
//! Domain types, traits, and error definitions for the Blocks chat server.
//! This crate has **zero framework dependencies**: it defines the domain model
//! that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every seam is defined as a trait here (`Provider`, `Tool`, `ChatStore`).
//! Implementations live in their respective crates, so tests can swap in
//! scripted or in-memory versions and all crates depend inward on core.

pub mod error;
pub mod event;
pub mod message;
pub mod payload;
pub mod provider;
pub mod sse;
pub mod store;
pub mod stream;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, StoreError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{Message, MessageToolCall, Role};
pub use payload::{ToolInput, ToolOutput};
pub use provider::{FinishReason, Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolCallDelta, ToolDefinition};
pub use store::{ChatStore, ConversationRecord, PageRecord, StoredMessage, ToolEventRecord, TurnRecord};
pub use sse::SseDecoder;
pub use stream::{StreamEvent, DONE_FRAME};
pub use tool::{Tool, ToolContext, ToolRegistry, ToolResult};
