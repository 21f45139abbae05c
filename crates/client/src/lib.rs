//! Client side of the Blocks chat protocol.
//!
//! - [`event`]: payloads to [`ChatEvent`]s, ignoring anything unknown
//! - [`reducer`]: the `idle -> streaming -> idle` state machine
//! - [`api`] and [`session`]: the HTTP client and a per-conversation driver

pub mod api;
pub mod error;
pub mod event;
pub mod reducer;
pub mod session;

pub use api::{ApiClient, ChatStream, ConversationDetail, ConversationSummary};
pub use error::ClientError;
pub use event::ChatEvent;
pub use reducer::{ChatState, Effect, Phase};
pub use session::{Aborter, ChatSession, TurnOutcome};
