//! Core domain models for the document anchoring queue.
//!
//! Provides strongly-typed domain primitives, the clock abstraction, and the
//! Postgres repository layer shared by the delivery crate and the daemon.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    AnchorPayload, AnchorReceipt, DocumentId, DocumentStatus, EntryId, EntryStatus, QueueEntry,
    SourceDocument,
};
pub use time::{Clock, RealClock, TestClock};
