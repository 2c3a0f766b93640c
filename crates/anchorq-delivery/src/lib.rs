//! Delivery engine turning source documents into anchored records.
//!
//! This crate implements the processing side of the anchoring queue: it
//! discovers freshly created documents, snapshots them into durable queue
//! entries, and dispatches each entry to the anchoring service over HTTP
//! with retries at two distinct time scales.
//!
//! # Architecture
//!
//! A single scheduler drives sequential processing passes. Each pass:
//!
//! 1. **Discover** - unprocessed documents become pending queue entries
//!    with an immutable payload snapshot
//! 2. **Dispatch** - every entry whose retry gate has passed gets one
//!    dispatch, itself a short series of fast HTTP attempts
//! 3. **Finalize** - outcomes land atomically on both the entry and the
//!    source document
//!
//! # Retry model
//!
//! Failures inside one dispatch back off in seconds (1s, 2s between three
//! attempts). Failures of the whole dispatch back off in minutes,
//! doubling from a one minute base, until the entry's attempt budget is
//! spent and it fails terminally.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use anchorq_core::RealClock;
//! use anchorq_delivery::{
//!     client::{AnchorClient, ClientConfig},
//!     processor::{ProcessorConfig, QueueProcessor},
//!     scheduler::{ProcessorScheduler, SchedulerConfig},
//!     storage::PostgresProcessorStorage,
//! };
//! use sqlx::PgPool;
//!
//! # async fn example(pool: PgPool) -> anchorq_delivery::Result<()> {
//! let clock = Arc::new(RealClock::new());
//! let storage = Arc::new(anchorq_core::storage::Storage::new(pool));
//! let client = AnchorClient::new(
//!     ClientConfig { endpoint_url: "https://anchor.example/api".into(), ..Default::default() },
//!     clock.clone(),
//! )?;
//! let processor = Arc::new(QueueProcessor::new(
//!     Arc::new(PostgresProcessorStorage::new(storage)),
//!     client,
//!     clock.clone(),
//!     ProcessorConfig::default(),
//! ));
//!
//! let mut scheduler = ProcessorScheduler::new(processor, clock, SchedulerConfig::default());
//! scheduler.start();
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod processor;
pub mod retry;
pub mod scheduler;
pub mod storage;

// Re-export main public API
pub use client::{AnchorClient, ClientConfig};
pub use error::{DeliveryError, Result};
pub use processor::{ProcessorConfig, QueueProcessor};
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::{ProcessorScheduler, SchedulerConfig};

/// Default maximum documents and entries handled per processing pass.
pub const DEFAULT_BATCH_SIZE: i64 = 50;

/// Default delay between processing passes.
pub const DEFAULT_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15);

/// Default HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
