//! Queue processor driving discovery and dispatch.
//!
//! One processing pass discovers freshly created documents into the queue,
//! then dispatches every entry whose retry gate has passed. A run lock
//! keeps passes strictly sequential, so the queue has a single logical
//! writer and entries are never raced by overlapping passes.

use std::sync::Arc;

use anchorq_core::{AnchorPayload, Clock, QueueEntry, SourceDocument};
use tracing::{debug, error, info, warn};

use crate::{
    client::AnchorClient,
    error::{DeliveryError, Result},
    retry::{RetryDecision, RetryPolicy},
    storage::ProcessorStorage,
};

/// Configuration for the queue processor.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Maximum documents discovered and entries dispatched per pass.
    pub batch_size: i64,

    /// Retry policy applied to failed dispatches.
    pub retry_policy: RetryPolicy,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: crate::DEFAULT_BATCH_SIZE,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Processor turning unprocessed documents into anchored ones.
///
/// Holds the storage abstraction, the HTTP client, and the injected clock.
/// [`run`](QueueProcessor::run) executes one full pass and never returns an
/// error: per-item failures are finalized or rescheduled on the entry, and
/// infrastructure failures are logged and retried on the next pass.
pub struct QueueProcessor {
    storage: Arc<dyn ProcessorStorage>,
    client: AnchorClient,
    clock: Arc<dyn Clock>,
    config: ProcessorConfig,
    run_lock: tokio::sync::Mutex<()>,
}

impl QueueProcessor {
    /// Creates a new processor.
    pub fn new(
        storage: Arc<dyn ProcessorStorage>,
        client: AnchorClient,
        clock: Arc<dyn Clock>,
        config: ProcessorConfig,
    ) -> Self {
        Self { storage, client, clock, config, run_lock: tokio::sync::Mutex::new(()) }
    }

    /// Executes one processing pass: discovery, then dispatch.
    ///
    /// If the previous pass is still in progress the call returns without
    /// doing anything, keeping the queue single-writer even under an eager
    /// scheduler.
    pub async fn run(&self) {
        let Ok(_guard) = self.run_lock.try_lock() else {
            warn!("previous processing pass still running, skipping");
            return;
        };

        match self.discover_batch().await {
            Ok(0) => {},
            Ok(discovered) => info!(discovered, "enqueued new documents"),
            Err(e) => error!(error = %e, "document discovery failed"),
        }

        match self.dispatch_batch().await {
            Ok(0) => {},
            Ok(dispatched) => info!(dispatched, "dispatched queue entries"),
            Err(e) => error!(error = %e, "queue dispatch failed"),
        }
    }

    /// Discovers unprocessed documents and enqueues them.
    ///
    /// Each document gets an immutable payload snapshot and a fresh entry,
    /// then transitions to `pending`. A document that somehow already has
    /// an active entry is only transitioned, never enqueued twice.
    ///
    /// Returns the number of entries created.
    ///
    /// # Errors
    ///
    /// Returns error if the discovery query itself fails. Per-document
    /// failures are logged and skipped so one bad row cannot stall the
    /// rest of the batch.
    pub async fn discover_batch(&self) -> Result<usize> {
        let documents = self.storage.find_unprocessed_documents(self.config.batch_size).await?;

        let mut created = 0;
        for document in documents {
            match self.enqueue_document(&document).await {
                Ok(true) => created += 1,
                Ok(false) => {},
                Err(e) => {
                    warn!(
                        document_id = %document.id,
                        error = %e,
                        "failed to enqueue document, skipping"
                    );
                },
            }
        }

        Ok(created)
    }

    /// Enqueues one discovered document.
    ///
    /// Returns true when a new entry was created.
    async fn enqueue_document(&self, document: &SourceDocument) -> Result<bool> {
        if self.storage.has_active_entry(document.id).await? {
            warn!(document_id = %document.id, "document already has an active entry");
            self.storage.mark_document_pending(document.id).await?;
            return Ok(false);
        }

        let payload = AnchorPayload::for_document(document);
        let snapshot = serde_json::to_string(&payload)
            .map_err(|e| DeliveryError::serialization(e.to_string()))?;

        let entry = QueueEntry::new(
            document.id,
            snapshot,
            self.config.retry_policy.max_attempts,
            self.clock.now_utc(),
        );
        let entry_id = self.storage.create_entry(entry).await?;

        if !self.storage.mark_document_pending(document.id).await? {
            warn!(
                document_id = %document.id,
                entry_id = %entry_id,
                "document left unset state during enqueue"
            );
            return Ok(false);
        }

        debug!(document_id = %document.id, entry_id = %entry_id, "document enqueued");
        Ok(true)
    }

    /// Dispatches every ready entry once.
    ///
    /// Returns the number of entries that completed successfully.
    ///
    /// # Errors
    ///
    /// Returns error if the readiness query fails. Dispatch outcomes are
    /// finalized per entry and never abort the batch.
    pub async fn dispatch_batch(&self) -> Result<usize> {
        let now = self.clock.now_utc();
        let entries = self.storage.find_ready_entries(now, self.config.batch_size).await?;

        let mut completed = 0;
        for entry in entries {
            let Some(claimed) = self.storage.begin_attempt(entry.id, self.clock.now_utc()).await?
            else {
                // Finalized or claimed elsewhere since the readiness query.
                debug!(entry_id = %entry.id, "entry no longer pending, skipping");
                continue;
            };

            if self.dispatch_entry(&claimed).await? {
                completed += 1;
            }
        }

        Ok(completed)
    }

    /// Runs one dispatch for a claimed entry and finalizes the outcome.
    ///
    /// Returns true when the entry completed.
    async fn dispatch_entry(&self, entry: &QueueEntry) -> Result<bool> {
        let payload: AnchorPayload = match serde_json::from_str(&entry.payload) {
            Ok(payload) => payload,
            Err(e) => {
                // Snapshots are written by us, so this is data corruption,
                // not a transient fault. Fail without burning retries.
                error!(
                    entry_id = %entry.id,
                    document_id = %entry.document_id,
                    error = %e,
                    "queue entry payload snapshot is corrupt"
                );
                self.storage
                    .fail_entry(
                        entry.id,
                        entry.document_id,
                        format!("corrupt payload snapshot: {e}"),
                        self.clock.now_utc(),
                    )
                    .await?;
                return Ok(false);
            },
        };

        match self.client.send(&payload).await {
            Ok(receipt) => {
                info!(
                    entry_id = %entry.id,
                    document_id = %entry.document_id,
                    tx_id = receipt.tx_id.as_deref().unwrap_or(""),
                    "entry anchored"
                );
                self.storage
                    .complete_entry(
                        entry.id,
                        entry.document_id,
                        receipt.tx_id,
                        receipt.record_hash,
                        self.clock.now_utc(),
                    )
                    .await?;
                Ok(true)
            },
            Err(e) => {
                self.finalize_failure(entry, &e).await?;
                Ok(false)
            },
        }
    }

    /// Applies the retry policy to a failed dispatch.
    async fn finalize_failure(&self, entry: &QueueEntry, error: &DeliveryError) -> Result<()> {
        let failed_at = self.clock.now_utc();
        let budget = RetryPolicy {
            max_attempts: entry.max_attempts,
            ..self.config.retry_policy.clone()
        };

        match budget.decide(entry.attempts, error, failed_at) {
            RetryDecision::Retry { next_attempt_at } => {
                warn!(
                    entry_id = %entry.id,
                    document_id = %entry.document_id,
                    attempts = entry.attempts,
                    next_retry_at = %next_attempt_at,
                    error = %error,
                    "dispatch failed, retry scheduled"
                );
                self.storage
                    .schedule_retry(entry.id, next_attempt_at, error.to_string(), failed_at)
                    .await?;
            },
            RetryDecision::GiveUp { reason } => {
                error!(
                    entry_id = %entry.id,
                    document_id = %entry.document_id,
                    attempts = entry.attempts,
                    reason = %reason,
                    error = %error,
                    "dispatch failed permanently"
                );
                self.storage
                    .fail_entry(entry.id, entry.document_id, error.to_string(), failed_at)
                    .await?;
            },
        }

        Ok(())
    }
}
