//! LLM Provider implementations for Blocks.
//!
//! All providers implement the `blocks_core::Provider` trait. The server uses
//! the OpenAI-compatible backend; the scripted provider replays canned rounds
//! for offline runs and tests.

pub mod openai_compat;
pub mod scripted;

pub use openai_compat::OpenAiCompatProvider;
pub use scripted::{ScriptedProvider, ScriptedRound, tool_call_chunks};
