//! The chat loop for Blocks.
//!
//! A turn runs as a series of model rounds:
//!
//! 1. **Prepend** the system prompt to the conversation history
//! 2. **Stream** the model's answer, forwarding text as it arrives
//! 3. **If tool calls**: run the first runnable call, append the call and
//!    its result to the history, and start the next round
//! 4. **Otherwise**: announce `message_complete` and stop
//!
//! The loop is bounded per round by a timeout and per turn by a round limit.

pub mod assembler;
pub mod orchestrator;
pub mod prompt;
pub mod turn;

pub use assembler::ToolCallAssembler;
pub use orchestrator::ChatOrchestrator;
pub use prompt::SYSTEM_PROMPT;
pub use turn::TurnRecorder;
