//! Repository for queue entry database operations.
//!
//! Owns the `anchor_queue` table. Entries move through the lifecycle via
//! status-gated updates so a single logical writer never re-runs an attempt
//! that is already in flight.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres, Transaction};

use crate::{
    error::Result,
    models::{DocumentId, EntryId, EntryStatus, QueueEntry},
};

const ENTRY_COLUMNS: &str = "id, document_id, payload, attempts, max_attempts, status, \
     next_retry_at, last_attempt_at, last_error, result_tx, result_hash, \
     created_at, updated_at";

/// Repository for queue entry database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Inserts a new queue entry.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails or constraints are violated.
    pub async fn create(&self, entry: &QueueEntry) -> Result<EntryId> {
        self.create_impl(&*self.pool, entry).await
    }

    /// Inserts a queue entry within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn create_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entry: &QueueEntry,
    ) -> Result<EntryId> {
        self.create_impl(&mut **tx, entry).await
    }

    async fn create_impl<'e, E>(&self, executor: E, entry: &QueueEntry) -> Result<EntryId>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO anchor_queue (
                id, document_id, payload, attempts, max_attempts, status,
                next_retry_at, last_attempt_at, last_error, result_tx,
                result_hash, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13
            )
            RETURNING id
            "#,
        )
        .bind(entry.id)
        .bind(entry.document_id)
        .bind(&entry.payload)
        .bind(entry.attempts)
        .bind(entry.max_attempts)
        .bind(entry.status)
        .bind(entry.next_retry_at)
        .bind(entry.last_attempt_at)
        .bind(&entry.last_error)
        .bind(&entry.result_tx)
        .bind(&entry.result_hash)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .fetch_one(executor)
        .await?;

        Ok(EntryId(id))
    }

    /// Checks whether a document already has an active entry.
    ///
    /// Active means pending or processing. Terminal entries from earlier
    /// operator resets do not count, so a reset document can be enqueued
    /// again while its audit trail is retained.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn has_active(&self, document_id: DocumentId) -> Result<bool> {
        let exists: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM anchor_queue
                WHERE document_id = $1
                  AND status IN ('pending', 'processing')
            )
            "#,
        )
        .bind(document_id)
        .fetch_one(&*self.pool)
        .await?;

        Ok(exists.0)
    }

    /// Finds entries eligible for dispatch.
    ///
    /// An entry is eligible when it is pending and its retry gate has
    /// passed (or was never set). Oldest first, bounded by the batch
    /// limit.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_ready(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<QueueEntry>> {
        let entries = sqlx::query_as::<_, QueueEntry>(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM anchor_queue
            WHERE status = 'pending'
              AND (next_retry_at IS NULL OR next_retry_at <= $1)
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        Ok(entries)
    }

    /// Claims an entry for an attempt.
    ///
    /// Transitions pending -> processing and increments the attempt
    /// counter in one gated update. Returns the claimed entry, or `None`
    /// if the entry was no longer pending (already claimed or finalized
    /// since it was read).
    ///
    /// The claim commits before any network call, so a crash mid-attempt
    /// leaves the entry visibly stuck in processing rather than silently
    /// re-runnable.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn begin_attempt(
        &self,
        entry_id: EntryId,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>> {
        let entry = sqlx::query_as::<_, QueueEntry>(&format!(
            r#"
            UPDATE anchor_queue
            SET status = 'processing',
                attempts = attempts + 1,
                last_attempt_at = $2,
                updated_at = $2
            WHERE id = $1 AND status = 'pending'
            RETURNING {ENTRY_COLUMNS}
            "#,
        ))
        .bind(entry_id)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(entry)
    }

    /// Marks an entry as completed with the anchoring result.
    ///
    /// Terminal state. Clears the retry gate and last error.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn complete(
        &self,
        entry_id: EntryId,
        result_tx: Option<&str>,
        result_hash: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.complete_impl(&*self.pool, entry_id, result_tx, result_hash, now).await
    }

    /// Marks an entry as completed within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn complete_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entry_id: EntryId,
        result_tx: Option<&str>,
        result_hash: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.complete_impl(&mut **tx, entry_id, result_tx, result_hash, now).await
    }

    async fn complete_impl<'e, E>(
        &self,
        executor: E,
        entry_id: EntryId,
        result_tx: Option<&str>,
        result_hash: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            UPDATE anchor_queue
            SET status = 'completed',
                result_tx = $2,
                result_hash = $3,
                next_retry_at = NULL,
                last_error = NULL,
                updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(entry_id)
        .bind(result_tx)
        .bind(result_hash)
        .bind(now)
        .execute(executor)
        .await?;

        Ok(())
    }

    /// Returns a processing entry to pending with a retry gate.
    ///
    /// Records the failure detail and the earliest time the next attempt
    /// may run.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn schedule_retry(
        &self,
        entry_id: EntryId,
        next_retry_at: DateTime<Utc>,
        last_error: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE anchor_queue
            SET status = 'pending',
                next_retry_at = $2,
                last_error = $3,
                updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(entry_id)
        .bind(next_retry_at)
        .bind(last_error)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Marks an entry as permanently failed.
    ///
    /// Terminal state, reached when attempts are exhausted or the failure
    /// is not retryable. The row is retained for audit.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn fail(&self, entry_id: EntryId, last_error: &str, now: DateTime<Utc>) -> Result<()> {
        self.fail_impl(&*self.pool, entry_id, last_error, now).await
    }

    /// Marks an entry as failed within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn fail_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entry_id: EntryId,
        last_error: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.fail_impl(&mut **tx, entry_id, last_error, now).await
    }

    async fn fail_impl<'e, E>(
        &self,
        executor: E,
        entry_id: EntryId,
        last_error: &str,
        now: DateTime<Utc>,
    ) -> Result<()>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            UPDATE anchor_queue
            SET status = 'failed',
                next_retry_at = NULL,
                last_error = $2,
                updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(entry_id)
        .bind(last_error)
        .bind(now)
        .execute(executor)
        .await?;

        Ok(())
    }

    /// Finds an entry by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, entry_id: EntryId) -> Result<Option<QueueEntry>> {
        let entry = sqlx::query_as::<_, QueueEntry>(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM anchor_queue
            WHERE id = $1
            "#,
        ))
        .bind(entry_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(entry)
    }

    /// Finds all entries for a document, newest first.
    ///
    /// Includes terminal entries from earlier resets.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_document(&self, document_id: DocumentId) -> Result<Vec<QueueEntry>> {
        let entries = sqlx::query_as::<_, QueueEntry>(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM anchor_queue
            WHERE document_id = $1
            ORDER BY created_at DESC
            "#,
        ))
        .bind(document_id)
        .fetch_all(&*self.pool)
        .await?;

        Ok(entries)
    }

    /// Counts entries by status.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_by_status(&self, status: EntryStatus) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM anchor_queue
            WHERE status = $1
            "#,
        )
        .bind(status)
        .fetch_one(&*self.pool)
        .await?;

        Ok(count.0)
    }

    /// Resets failed entries back to pending for another attempt series.
    ///
    /// Operator recovery path. Attempt counters restart so the reset
    /// entries get a full retry budget. Returns the number of entries
    /// reset.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn reset_failed(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE anchor_queue
            SET status = 'pending',
                attempts = 0,
                next_retry_at = NULL,
                last_error = NULL,
                updated_at = $1
            WHERE status = 'failed'
            "#,
        )
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repository_can_be_created() {
        let pool = sqlx::PgPool::connect_lazy("postgresql://test").unwrap();
        let _repo = Repository::new(Arc::new(pool));
    }
}
