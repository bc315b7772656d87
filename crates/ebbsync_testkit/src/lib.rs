//! # ebbsync Testkit
//!
//! Test utilities for ebbsync.
//!
//! This crate provides:
//! - A wired-up engine harness over in-memory or file-backed storage
//! - An event recorder observer
//! - A local store with injectable write failures
//! - Property-based test generators using proptest
//! - Concurrent enqueue stress helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ebbsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn flushes_queue() {
//!     let t = TestEngine::new(game_config());
//!     t.engine.enqueue(insert_op("agents", 1));
//!     assert_eq!(t.engine.sync().await.processed, 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faulty;
pub mod fixtures;
pub mod generators;
pub mod recorder;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faulty::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::recorder::*;
    pub use crate::stress::*;
}

pub use faulty::*;
pub use fixtures::*;
pub use generators::*;
pub use recorder::*;
pub use stress::*;
