//! Storage abstraction layer for the queue processor.
//!
//! Provides trait-based abstractions over storage operations to enable
//! testability without database dependencies. Production implementations
//! use the concrete `anchorq_core::storage::Storage` while tests provide
//! in-memory doubles for deterministic behavior validation.

use std::{future::Future, pin::Pin, sync::Arc};

use anchorq_core::{
    error::Result,
    models::{DocumentId, EntryId, QueueEntry, SourceDocument},
};
use chrono::{DateTime, Utc};

/// Storage operations required by the queue processor.
///
/// Abstracts discovery, claiming, and finalization so processor logic,
/// retry policy, and error handling can be tested without a database.
pub trait ProcessorStorage: Send + Sync + 'static {
    /// Finds documents not yet picked up by the queue, oldest first.
    fn find_unprocessed_documents(
        &self,
        limit: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SourceDocument>>> + Send + '_>>;

    /// Transitions a document from `unset` to `pending`.
    ///
    /// Returns false if the document was no longer `unset`.
    fn mark_document_pending(
        &self,
        document_id: DocumentId,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>>;

    /// Checks whether a document already has a pending or processing entry.
    fn has_active_entry(
        &self,
        document_id: DocumentId,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>>;

    /// Persists a newly created queue entry.
    fn create_entry(
        &self,
        entry: QueueEntry,
    ) -> Pin<Box<dyn Future<Output = Result<EntryId>> + Send + '_>>;

    /// Finds entries whose retry gate has passed, oldest first.
    fn find_ready_entries(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<QueueEntry>>> + Send + '_>>;

    /// Claims an entry for an attempt, incrementing its counter.
    ///
    /// Returns `None` if the entry was no longer pending.
    fn begin_attempt(
        &self,
        entry_id: EntryId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<QueueEntry>>> + Send + '_>>;

    /// Finalizes a successful dispatch.
    ///
    /// Completes the entry and anchors the document atomically, so the two
    /// records can never disagree about the outcome.
    fn complete_entry(
        &self,
        entry_id: EntryId,
        document_id: DocumentId,
        result_tx: Option<String>,
        result_hash: Option<String>,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Returns an entry to pending with a retry gate and failure detail.
    fn schedule_retry(
        &self,
        entry_id: EntryId,
        next_retry_at: DateTime<Utc>,
        last_error: String,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Finalizes a permanent failure.
    ///
    /// Fails the entry and the document atomically.
    fn fail_entry(
        &self,
        entry_id: EntryId,
        document_id: DocumentId,
        last_error: String,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Production storage implementation using PostgreSQL.
///
/// Wraps the concrete `anchorq_core::storage::Storage`. The two
/// finalization paths run their entry and document updates inside one
/// transaction.
pub struct PostgresProcessorStorage {
    storage: Arc<anchorq_core::storage::Storage>,
}

impl PostgresProcessorStorage {
    /// Creates a new PostgreSQL storage adapter.
    pub fn new(storage: Arc<anchorq_core::storage::Storage>) -> Self {
        Self { storage }
    }
}

impl ProcessorStorage for PostgresProcessorStorage {
    fn find_unprocessed_documents(
        &self,
        limit: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SourceDocument>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.documents.find_unprocessed(limit).await })
    }

    fn mark_document_pending(
        &self,
        document_id: DocumentId,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.documents.mark_pending(document_id).await })
    }

    fn has_active_entry(
        &self,
        document_id: DocumentId,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.queue_entries.has_active(document_id).await })
    }

    fn create_entry(
        &self,
        entry: QueueEntry,
    ) -> Pin<Box<dyn Future<Output = Result<EntryId>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.queue_entries.create(&entry).await })
    }

    fn find_ready_entries(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<QueueEntry>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.queue_entries.find_ready(now, limit).await })
    }

    fn begin_attempt(
        &self,
        entry_id: EntryId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<QueueEntry>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.queue_entries.begin_attempt(entry_id, now).await })
    }

    fn complete_entry(
        &self,
        entry_id: EntryId,
        document_id: DocumentId,
        result_tx: Option<String>,
        result_hash: Option<String>,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            let mut tx = storage.queue_entries.pool().begin().await?;

            storage
                .queue_entries
                .complete_in_tx(&mut tx, entry_id, result_tx.as_deref(), result_hash.as_deref(), now)
                .await?;
            storage
                .documents
                .mark_anchored_in_tx(&mut tx, document_id, result_tx.as_deref(), result_hash.as_deref())
                .await?;

            tx.commit().await?;
            Ok(())
        })
    }

    fn schedule_retry(
        &self,
        entry_id: EntryId,
        next_retry_at: DateTime<Utc>,
        last_error: String,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage.queue_entries.schedule_retry(entry_id, next_retry_at, &last_error, now).await
        })
    }

    fn fail_entry(
        &self,
        entry_id: EntryId,
        document_id: DocumentId,
        last_error: String,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            let mut tx = storage.queue_entries.pool().begin().await?;

            storage.queue_entries.fail_in_tx(&mut tx, entry_id, &last_error, now).await?;
            storage.documents.mark_failed_in_tx(&mut tx, document_id).await?;

            tx.commit().await?;
            Ok(())
        })
    }
}

pub mod mock {
    //! Mock storage implementation for testing.
    //!
    //! In-memory state with the same gating semantics as the SQL layer,
    //! plus helpers to seed documents and inspect outcomes.

    use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

    use anchorq_core::{
        error::{CoreError, Result},
        models::{DocumentStatus, EntryStatus},
    };
    use chrono::{DateTime, Utc};
    use tokio::sync::RwLock;

    use super::{DocumentId, EntryId, ProcessorStorage, QueueEntry, SourceDocument};

    /// Mock storage for testing processor logic without a database.
    pub struct MockProcessorStorage {
        documents: Arc<RwLock<HashMap<DocumentId, SourceDocument>>>,
        entries: Arc<RwLock<HashMap<EntryId, QueueEntry>>>,
        discover_error: Arc<RwLock<Option<String>>>,
        create_entry_error: Arc<RwLock<Option<String>>>,
    }

    impl MockProcessorStorage {
        /// Creates a new mock storage with empty state.
        pub fn new() -> Self {
            Self {
                documents: Arc::new(RwLock::new(HashMap::new())),
                entries: Arc::new(RwLock::new(HashMap::new())),
                discover_error: Arc::new(RwLock::new(None)),
                create_entry_error: Arc::new(RwLock::new(None)),
            }
        }

        /// Seeds a document.
        pub async fn add_document(&self, document: SourceDocument) {
            self.documents.write().await.insert(document.id, document);
        }

        /// Seeds a queue entry directly, bypassing discovery.
        pub async fn add_entry(&self, entry: QueueEntry) {
            self.entries.write().await.insert(entry.id, entry);
        }

        /// Injects an error for the next discovery query.
        pub async fn inject_discover_error(&self, error: String) {
            *self.discover_error.write().await = Some(error);
        }

        /// Injects an error for the next entry insert.
        pub async fn inject_create_entry_error(&self, error: String) {
            *self.create_entry_error.write().await = Some(error);
        }

        /// Returns a document's current state.
        pub async fn document(&self, document_id: DocumentId) -> Option<SourceDocument> {
            self.documents.read().await.get(&document_id).cloned()
        }

        /// Returns all entries for a document, oldest first.
        pub async fn entries_for_document(&self, document_id: DocumentId) -> Vec<QueueEntry> {
            let mut entries: Vec<QueueEntry> = self
                .entries
                .read()
                .await
                .values()
                .filter(|e| e.document_id == document_id)
                .cloned()
                .collect();
            entries.sort_by_key(|e| e.created_at);
            entries
        }

        /// Verifies a document reached the expected status.
        pub async fn verify_document_status(
            &self,
            document_id: DocumentId,
            expected: DocumentStatus,
        ) -> bool {
            self.documents.read().await.get(&document_id).is_some_and(|d| d.status == expected)
        }
    }

    impl Default for MockProcessorStorage {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ProcessorStorage for MockProcessorStorage {
        fn find_unprocessed_documents(
            &self,
            limit: i64,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<SourceDocument>>> + Send + '_>> {
            let documents = self.documents.clone();
            let discover_error = self.discover_error.clone();
            Box::pin(async move {
                if let Some(error) = discover_error.write().await.take() {
                    return Err(CoreError::Database(error));
                }

                let mut unprocessed: Vec<SourceDocument> = documents
                    .read()
                    .await
                    .values()
                    .filter(|d| d.status == DocumentStatus::Unset)
                    .cloned()
                    .collect();
                unprocessed.sort_by_key(|d| d.created_at);
                unprocessed.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
                Ok(unprocessed)
            })
        }

        fn mark_document_pending(
            &self,
            document_id: DocumentId,
        ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
            let documents = self.documents.clone();
            Box::pin(async move {
                let mut documents = documents.write().await;
                match documents.get_mut(&document_id) {
                    Some(doc) if doc.status == DocumentStatus::Unset => {
                        doc.status = DocumentStatus::Pending;
                        Ok(true)
                    },
                    _ => Ok(false),
                }
            })
        }

        fn has_active_entry(
            &self,
            document_id: DocumentId,
        ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
            let entries = self.entries.clone();
            Box::pin(async move {
                let active = entries.read().await.values().any(|e| {
                    e.document_id == document_id
                        && matches!(e.status, EntryStatus::Pending | EntryStatus::Processing)
                });
                Ok(active)
            })
        }

        fn create_entry(
            &self,
            entry: QueueEntry,
        ) -> Pin<Box<dyn Future<Output = Result<EntryId>> + Send + '_>> {
            let entries = self.entries.clone();
            let create_entry_error = self.create_entry_error.clone();
            Box::pin(async move {
                if let Some(error) = create_entry_error.write().await.take() {
                    return Err(CoreError::Database(error));
                }

                let id = entry.id;
                entries.write().await.insert(id, entry);
                Ok(id)
            })
        }

        fn find_ready_entries(
            &self,
            now: DateTime<Utc>,
            limit: i64,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<QueueEntry>>> + Send + '_>> {
            let entries = self.entries.clone();
            Box::pin(async move {
                let mut ready: Vec<QueueEntry> = entries
                    .read()
                    .await
                    .values()
                    .filter(|e| {
                        e.status == EntryStatus::Pending
                            && e.next_retry_at.is_none_or(|at| at <= now)
                    })
                    .cloned()
                    .collect();
                ready.sort_by_key(|e| e.created_at);
                ready.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
                Ok(ready)
            })
        }

        fn begin_attempt(
            &self,
            entry_id: EntryId,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<Option<QueueEntry>>> + Send + '_>> {
            let entries = self.entries.clone();
            Box::pin(async move {
                let mut entries = entries.write().await;
                match entries.get_mut(&entry_id) {
                    Some(entry) if entry.status == EntryStatus::Pending => {
                        entry.status = EntryStatus::Processing;
                        entry.attempts += 1;
                        entry.last_attempt_at = Some(now);
                        entry.updated_at = now;
                        Ok(Some(entry.clone()))
                    },
                    _ => Ok(None),
                }
            })
        }

        fn complete_entry(
            &self,
            entry_id: EntryId,
            document_id: DocumentId,
            result_tx: Option<String>,
            result_hash: Option<String>,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let entries = self.entries.clone();
            let documents = self.documents.clone();
            Box::pin(async move {
                if let Some(entry) = entries.write().await.get_mut(&entry_id) {
                    entry.status = EntryStatus::Completed;
                    entry.result_tx = result_tx.clone();
                    entry.result_hash = result_hash.clone();
                    entry.next_retry_at = None;
                    entry.last_error = None;
                    entry.updated_at = now;
                }
                if let Some(doc) = documents.write().await.get_mut(&document_id) {
                    doc.status = DocumentStatus::Anchored;
                    doc.anchor_tx = result_tx;
                    doc.anchor_hash = result_hash;
                }
                Ok(())
            })
        }

        fn schedule_retry(
            &self,
            entry_id: EntryId,
            next_retry_at: DateTime<Utc>,
            last_error: String,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let entries = self.entries.clone();
            Box::pin(async move {
                if let Some(entry) = entries.write().await.get_mut(&entry_id) {
                    entry.status = EntryStatus::Pending;
                    entry.next_retry_at = Some(next_retry_at);
                    entry.last_error = Some(last_error);
                    entry.updated_at = now;
                }
                Ok(())
            })
        }

        fn fail_entry(
            &self,
            entry_id: EntryId,
            document_id: DocumentId,
            last_error: String,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let entries = self.entries.clone();
            let documents = self.documents.clone();
            Box::pin(async move {
                if let Some(entry) = entries.write().await.get_mut(&entry_id) {
                    entry.status = EntryStatus::Failed;
                    entry.next_retry_at = None;
                    entry.last_error = Some(last_error);
                    entry.updated_at = now;
                }
                if let Some(doc) = documents.write().await.get_mut(&document_id) {
                    doc.status = DocumentStatus::Failed;
                }
                Ok(())
            })
        }
    }
}
