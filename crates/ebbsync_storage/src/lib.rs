//! # ebbsync storage
//!
//! Local persistent key/value stores for the ebbsync offline engine.
//!
//! The engine keeps two kinds of state on the client: the serialized
//! mutation queue and the cached copies of server resources. Both are plain
//! strings stored under well-known keys, so a store only needs `get`, `set`
//! and `remove`.
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral sessions, with an optional byte quota
//! - [`FileStore`] - One file per key inside a locked directory
//!
//! ## Example
//!
//! ```rust
//! use ebbsync_storage::{InMemoryStore, LocalStore};
//!
//! let store = InMemoryStore::new();
//! store.set("greeting", "hello").unwrap();
//! assert_eq!(store.get("greeting").unwrap().as_deref(), Some("hello"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use store::{validate_key, LocalStore};
