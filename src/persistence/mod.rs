//! Persistence boundary.
//!
//! The analytics core never touches storage. Workers and the CLI hand
//! records and summaries to a [`PersistencePort`]; what sits behind it
//! (memory, JSON Lines files, something remote) is up to the caller.

pub mod jsonl;
pub mod port;
pub mod retry;

pub use jsonl::JsonLinesStore;
pub use port::{MemoryStore, PersistencePort, SharedPort};
pub use retry::{RetryPolicy, RetryingStore};
