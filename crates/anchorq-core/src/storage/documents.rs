//! Repository for source document database operations.
//!
//! The documents table belongs to the host store; this repository touches
//! only the anchoring columns (`status`, `anchor_tx`, `anchor_hash`) and
//! reads the fields needed to build the delivery payload.

use std::sync::Arc;

use sqlx::{Executor, PgPool, Postgres, Transaction};

use crate::{
    error::Result,
    models::{DocumentId, DocumentStatus, SourceDocument},
};

const DOCUMENT_COLUMNS: &str = "id, patient_uuid, file_path, file_hash, mime_type, \
     category, status, anchor_tx, anchor_hash, created_at";

/// Repository for source document database operations.
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

    /// Finds documents not yet picked up by the queue.
    ///
    /// Returns documents in creation order (oldest first) so anchoring
    /// roughly follows upload order. The limit bounds each discovery pass.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_unprocessed(&self, limit: i64) -> Result<Vec<SourceDocument>> {
        let documents = sqlx::query_as::<_, SourceDocument>(&format!(
            r#"
            SELECT {DOCUMENT_COLUMNS}
            FROM documents
            WHERE status = 'unset'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        ))
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        Ok(documents)
    }

    /// Finds a document by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, document_id: DocumentId) -> Result<Option<SourceDocument>> {
        let document = sqlx::query_as::<_, SourceDocument>(&format!(
            r#"
            SELECT {DOCUMENT_COLUMNS}
            FROM documents
            WHERE id = $1
            "#,
        ))
        .bind(document_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(document)
    }

    /// Marks a document as pending after its queue entry is created.
    ///
    /// The update is gated on the current status still being `unset`, so a
    /// concurrent pickup of the same document cannot double-transition it.
    /// Returns true if the row was transitioned.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_pending(&self, document_id: DocumentId) -> Result<bool> {
        self.mark_pending_impl(&*self.pool, document_id).await
    }

    /// Marks a document as pending within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_pending_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        document_id: DocumentId,
    ) -> Result<bool> {
        self.mark_pending_impl(&mut **tx, document_id).await
    }

    async fn mark_pending_impl<'e, E>(&self, executor: E, document_id: DocumentId) -> Result<bool>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET status = 'pending'
            WHERE id = $1 AND status = 'unset'
            "#,
        )
        .bind(document_id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Records a successful anchoring result on the document.
    ///
    /// Sets the status to `anchored` and stores the transaction id and
    /// record hash returned by the anchoring service. Terminal state.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_anchored(
        &self,
        document_id: DocumentId,
        anchor_tx: Option<&str>,
        anchor_hash: Option<&str>,
    ) -> Result<()> {
        self.mark_anchored_impl(&*self.pool, document_id, anchor_tx, anchor_hash).await
    }

    /// Records a successful anchoring result within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_anchored_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        document_id: DocumentId,
        anchor_tx: Option<&str>,
        anchor_hash: Option<&str>,
    ) -> Result<()> {
        self.mark_anchored_impl(&mut **tx, document_id, anchor_tx, anchor_hash).await
    }

    async fn mark_anchored_impl<'e, E>(
        &self,
        executor: E,
        document_id: DocumentId,
        anchor_tx: Option<&str>,
        anchor_hash: Option<&str>,
    ) -> Result<()>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            UPDATE documents
            SET status = 'anchored', anchor_tx = $2, anchor_hash = $3
            WHERE id = $1
            "#,
        )
        .bind(document_id)
        .bind(anchor_tx)
        .bind(anchor_hash)
        .execute(executor)
        .await?;

        Ok(())
    }

    /// Marks a document as permanently failed.
    ///
    /// Terminal state; an operator reset is the only way back into the
    /// pipeline.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_failed(&self, document_id: DocumentId) -> Result<()> {
        self.mark_failed_impl(&*self.pool, document_id).await
    }

    /// Marks a document as failed within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_failed_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        document_id: DocumentId,
    ) -> Result<()> {
        self.mark_failed_impl(&mut **tx, document_id).await
    }

    async fn mark_failed_impl<'e, E>(&self, executor: E, document_id: DocumentId) -> Result<()>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            UPDATE documents
            SET status = 'failed'
            WHERE id = $1
            "#,
        )
        .bind(document_id)
        .execute(executor)
        .await?;

        Ok(())
    }

    /// Resets failed documents back to `unset` for re-discovery.
    ///
    /// Operator recovery path, used together with
    /// [`queue_entries::Repository::reset_failed`](crate::storage::queue_entries::Repository::reset_failed).
    /// Returns the number of documents reset.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn reset_failed(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET status = 'unset'
            WHERE status = 'failed'
            "#,
        )
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Counts documents by anchoring status.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_by_status(&self, status: DocumentStatus) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM documents
            WHERE status = $1
            "#,
        )
        .bind(status)
        .fetch_one(&*self.pool)
        .await?;

        Ok(count.0)
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
