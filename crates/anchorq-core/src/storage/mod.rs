//! Database access layer implementing the repository pattern for queue
//! persistence.
//!
//! The repository layer translates between domain models and database rows.
//! All database operations MUST go through these repositories. Direct SQL
//! queries outside this module are forbidden to maintain consistency.

use std::sync::Arc;

use sqlx::PgPool;

pub mod documents;
pub mod queue_entries;

use crate::error::Result;

/// Container for all repository instances providing unified database access.
///
/// Manages a shared connection pool and provides type-safe access to the
/// documents table (owned by the host store) and the queue table (owned by
/// the anchoring daemon).
#[derive(Clone)]
pub struct Storage {
    /// Repository for source document operations.
    pub documents: Arc<documents::Repository>,

    /// Repository for queue entry operations.
    pub queue_entries: Arc<queue_entries::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    ///
    /// Both repositories share the same pool via Arc.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            documents: Arc::new(documents::Repository::new(pool.clone())),
            queue_entries: Arc::new(queue_entries::Repository::new(pool)),
        }
    }

    /// Performs a health check on the database connection.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy or the
    /// query times out.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.documents.pool()).await?;

        Ok(())
    }
}
