//! # ebbsync protocol
//!
//! Wire types shared by the ebbsync engine, its stores, and its tools.
//!
//! This crate provides:
//! - [`Operation`], the validated sum type for a queued write
//! - [`QueueItem`], the persisted envelope around an operation
//! - [`ChangeEvent`] for server-pushed changes
//! - [`ConflictPolicy`] and [`Conflict`] for pull-time arbitration
//! - JSON encoding matching the persisted queue format
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod conflict;
mod error;
mod operation;
mod queue_item;
mod value;

pub use change::{ChangeEvent, ChangeType};
pub use conflict::{Conflict, ConflictPolicy, ConflictResolution};
pub use error::{ProtocolError, ProtocolResult};
pub use operation::{Operation, OperationKind};
pub use queue_item::{decode_queue, encode_queue, QueueItem};
pub use value::{record_id, Filters, Record, Scalar};
