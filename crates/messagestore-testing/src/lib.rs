//! Testing utilities for the messagestore engine.
//!
//! - [`InMemoryRepository`] = a [`Repository`](messagestore_core::Repository)
//!   with the ordering, versioning and conflict rules of Message DB
//! - [`RecordingHandler`] = a handler that records dispatch and can fail on demand
//!
//! ```ignore
//! let repo = Arc::new(InMemoryRepository::new());
//! let store = MessageStore::new(repo.clone());
//! let handler = RecordingHandler::new("Opened");
//! ```

mod handlers;
mod memory;

pub use handlers::{RecordingHandler, Seen};
pub use memory::InMemoryRepository;
