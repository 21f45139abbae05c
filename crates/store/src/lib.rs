//! Turn persistence implementations for Blocks.
//!
//! Both backends implement `blocks_core::ChatStore`. SQLite is the default
//! for the server; the in-memory store backs tests and throwaway sessions.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
