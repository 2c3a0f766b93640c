//! Core domain models and strongly-typed identifiers.
//!
//! Defines source documents, queue entries, the normalized anchoring payload,
//! and newtype ID wrappers for compile-time type safety. Includes database
//! serialization traits and the status enums driving the queue lifecycle.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Source system tag sent with every anchoring payload.
pub const SOURCE_SYSTEM: &str = "OpenEMR";

/// Event type tag sent with every anchoring payload.
pub const EVENT_TYPE: &str = "document.created";

/// Strongly-typed identifier of a source document.
///
/// Wraps the host store's integer primary key. The core never generates
/// these; they come from the polled documents table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub i64);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for DocumentId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl sqlx::Type<PgDb> for DocumentId {
    fn type_info() -> PgTypeInfo {
        <i64 as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for DocumentId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let id = <i64 as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(id))
    }
}

impl sqlx::Encode<'_, PgDb> for DocumentId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <i64 as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed queue entry identifier.
///
/// Wraps a UUID to prevent mixing with document ids. Entries are created
/// once at discovery and this id follows them through their lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub Uuid);

impl EntryId {
    /// Creates a new random entry ID.
    ///
    /// Uses UUID v4 for globally unique identifiers without coordination.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EntryId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for EntryId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EntryId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for EntryId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Anchoring status of a source document.
///
/// Owned by the host store; the core only performs these transitions:
///
/// ```text
/// Unset -> Pending -> Anchored
///                  -> Failed
/// ```
///
/// An operator may reset `Failed` back to `Unset` out-of-band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Not yet discovered by the queue.
    Unset,

    /// A queue entry exists and delivery is in progress or scheduled.
    Pending,

    /// Successfully anchored; `anchor_tx`/`anchor_hash` are populated.
    ///
    /// Terminal success state.
    Anchored,

    /// Delivery permanently failed after exhausting retries.
    ///
    /// Terminal failure state; requires operator intervention.
    Failed,
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => write!(f, "unset"),
            Self::Pending => write!(f, "pending"),
            Self::Anchored => write!(f, "anchored"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl sqlx::Type<PgDb> for DocumentStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for DocumentStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "unset" => Ok(Self::Unset),
            "pending" => Ok(Self::Pending),
            "anchored" => Ok(Self::Anchored),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid document status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for DocumentStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Lifecycle status of a queue entry.
///
/// State transitions are strictly controlled:
///
/// ```text
/// Pending -> Processing -> Completed
///         ^             -> Failed (non-retryable or attempts exhausted)
///         `-- Processing (retry scheduled)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Waiting for dispatch, possibly behind a `next_retry_at` gate.
    Pending,

    /// An attempt is in flight.
    ///
    /// Committed before the network call so a crash mid-call leaves the
    /// entry visibly in flight rather than silently re-runnable.
    Processing,

    /// Successfully delivered; `result_tx`/`result_hash` are populated.
    ///
    /// Terminal success state.
    Completed,

    /// Permanently failed.
    ///
    /// Terminal failure state after attempts exhausted or a non-retryable
    /// error. Retained for audit; an operator reset is the only way back.
    Failed,
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl sqlx::Type<PgDb> for EntryStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EntryStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid entry status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for EntryStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Subset of the host store's document row that the core reads and writes.
///
/// The documents table is owned by the host application; the core polls it
/// for `Unset` rows and writes back status plus the anchoring result.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SourceDocument {
    /// Host store primary key.
    pub id: DocumentId,

    /// Owning patient, when the document is attached to one.
    pub patient_uuid: Option<Uuid>,

    /// Content locator within the host store.
    pub file_path: String,

    /// Content hash computed by the host at upload time.
    pub file_hash: String,

    /// MIME type of the stored content.
    pub mime_type: String,

    /// Host-side document category, when classified.
    pub category: Option<String>,

    /// Anchoring status, owned jointly with the host (see transitions).
    pub status: DocumentStatus,

    /// Transaction id returned by the anchoring service on success.
    pub anchor_tx: Option<String>,

    /// Record hash returned by the anchoring service on success.
    pub anchor_hash: Option<String>,

    /// When the document was created in the host store.
    pub created_at: DateTime<Utc>,
}

/// Durable unit of work tracking one delivery attempt-series for a document.
///
/// Created exactly once at discovery, mutated thereafter, never deleted by
/// normal operation. The payload is an immutable snapshot captured at
/// enqueue time, decoupling delivery from later mutation of the document.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueEntry {
    /// Unique identifier, assigned on creation.
    pub id: EntryId,

    /// Source document this entry anchors.
    ///
    /// Not unique alone: a document can accumulate terminal entries across
    /// operator resets, but at most one entry is active (pending or
    /// processing) at a time.
    pub document_id: DocumentId,

    /// Serialized [`AnchorPayload`] snapshot, stored as JSON text.
    pub payload: String,

    /// Number of attempts made so far. Only ever increases.
    pub attempts: i32,

    /// Attempt ceiling; the entry fails terminally once reached.
    pub max_attempts: i32,

    /// Current queue-level status.
    pub status: EntryStatus,

    /// Earliest time the next attempt may run.
    ///
    /// The entry is eligible for dispatch only when this is null or in the
    /// past.
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Timestamp of the most recent attempt.
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// Last failure detail, for diagnostics.
    pub last_error: Option<String>,

    /// Transaction id returned by the anchoring service (terminal success).
    pub result_tx: Option<String>,

    /// Record hash returned by the anchoring service (terminal success).
    pub result_hash: Option<String>,

    /// When this entry was created.
    pub created_at: DateTime<Utc>,

    /// When this entry was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Creates a fresh entry for a document with the given payload snapshot.
    pub fn new(
        document_id: DocumentId,
        payload: String,
        max_attempts: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EntryId::new(),
            document_id,
            payload,
            attempts: 0,
            max_attempts,
            status: EntryStatus::Pending,
            next_retry_at: None,
            last_attempt_at: None,
            last_error: None,
            result_tx: None,
            result_hash: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the entry is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, EntryStatus::Completed | EntryStatus::Failed)
    }
}

/// Normalized payload sent to the remote anchoring service.
///
/// Field names are the wire format; do not rename them. The snapshot is
/// captured at enqueue time and stored verbatim on the queue entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorPayload {
    /// Owning patient, serialized as a string or null.
    pub patient_uuid: Option<Uuid>,

    /// Host store document id.
    pub document_id: i64,

    /// Content locator within the host store.
    pub file_path: String,

    /// Content hash of the document.
    pub file_hash: String,

    /// MIME type of the document.
    pub mime_type: String,

    /// Document creation time, serialized as ISO-8601.
    pub timestamp: DateTime<Utc>,

    /// Host-side document category (empty when unclassified).
    pub category: String,

    /// Constant source tag, always [`SOURCE_SYSTEM`].
    pub source_system: String,

    /// Constant event tag, always [`EVENT_TYPE`].
    pub event_type: String,
}

impl AnchorPayload {
    /// Builds the normalized payload for a source document.
    pub fn for_document(document: &SourceDocument) -> Self {
        Self {
            patient_uuid: document.patient_uuid,
            document_id: document.id.0,
            file_path: document.file_path.clone(),
            file_hash: document.file_hash.clone(),
            mime_type: document.mime_type.clone(),
            timestamp: document.created_at,
            category: document.category.clone().unwrap_or_default(),
            source_system: SOURCE_SYSTEM.to_string(),
            event_type: EVENT_TYPE.to_string(),
        }
    }
}

/// Anchoring result extracted from a successful service response.
///
/// The service is loose about field names, so extraction probes a set of
/// known keys instead of deserializing strictly. Both fields may be absent:
/// a 2xx response with an unparseable body still counts as success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorReceipt {
    /// Anchoring transaction identifier, when the response carried one.
    pub tx_id: Option<String>,

    /// Record hash, when the response carried one.
    pub record_hash: Option<String>,
}

impl AnchorReceipt {
    /// Accepted keys for the transaction identifier, probed in order.
    const TX_KEYS: [&'static str; 3] = ["blockchain_tx", "tx_hash", "transaction_id"];

    /// Accepted keys for the record hash, probed in order.
    const HASH_KEYS: [&'static str; 2] = ["record_hash", "hash"];

    /// Extracts a receipt from a response body value. Unknown fields are
    /// ignored; missing fields stay `None`.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let probe = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| value.get(key))
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        };

        Self { tx_id: probe(&Self::TX_KEYS), record_hash: probe(&Self::HASH_KEYS) }
    }

    /// Whether the response carried neither identifier.
    pub fn is_empty(&self) -> bool {
        self.tx_id.is_none() && self.record_hash.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_matches_database_representation() {
        assert_eq!(DocumentStatus::Unset.to_string(), "unset");
        assert_eq!(DocumentStatus::Pending.to_string(), "pending");
        assert_eq!(DocumentStatus::Anchored.to_string(), "anchored");
        assert_eq!(DocumentStatus::Failed.to_string(), "failed");

        assert_eq!(EntryStatus::Pending.to_string(), "pending");
        assert_eq!(EntryStatus::Processing.to_string(), "processing");
        assert_eq!(EntryStatus::Completed.to_string(), "completed");
        assert_eq!(EntryStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn payload_serializes_with_wire_field_names() {
        let doc = SourceDocument {
            id: DocumentId(42),
            patient_uuid: None,
            file_path: "/documents/42.pdf".to_string(),
            file_hash: "abc123".to_string(),
            mime_type: "application/pdf".to_string(),
            category: Some("Lab Report".to_string()),
            status: DocumentStatus::Unset,
            anchor_tx: None,
            anchor_hash: None,
            created_at: Utc::now(),
        };

        let payload = AnchorPayload::for_document(&doc);
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["patient_uuid"], serde_json::Value::Null);
        assert_eq!(value["document_id"], 42);
        assert_eq!(value["file_path"], "/documents/42.pdf");
        assert_eq!(value["file_hash"], "abc123");
        assert_eq!(value["mime_type"], "application/pdf");
        assert_eq!(value["category"], "Lab Report");
        assert_eq!(value["source_system"], "OpenEMR");
        assert_eq!(value["event_type"], "document.created");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn receipt_probes_alternate_key_names() {
        let body = serde_json::json!({"blockchain_tx": "0xabc", "record_hash": "h1"});
        let receipt = AnchorReceipt::from_json(&body);
        assert_eq!(receipt.tx_id.as_deref(), Some("0xabc"));
        assert_eq!(receipt.record_hash.as_deref(), Some("h1"));

        let body = serde_json::json!({"transaction_id": "tx-9", "hash": "h2", "extra": 1});
        let receipt = AnchorReceipt::from_json(&body);
        assert_eq!(receipt.tx_id.as_deref(), Some("tx-9"));
        assert_eq!(receipt.record_hash.as_deref(), Some("h2"));
    }

    #[test]
    fn receipt_tolerates_missing_fields() {
        let receipt = AnchorReceipt::from_json(&serde_json::json!({"status": "ok"}));
        assert!(receipt.is_empty());
    }

    #[test]
    fn new_entry_starts_pending_with_zero_attempts() {
        let now = Utc::now();
        let entry = QueueEntry::new(DocumentId(7), "{}".to_string(), 5, now);

        assert_eq!(entry.document_id, DocumentId(7));
        assert_eq!(entry.attempts, 0);
        assert_eq!(entry.max_attempts, 5);
        assert_eq!(entry.status, EntryStatus::Pending);
        assert!(entry.next_retry_at.is_none());
        assert!(!entry.is_terminal());
    }
}
