use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

/// Row contents keyed by column name.
pub type Payload = Map<String, Value>;

/// One stored row, tagged with the name of the table it belongs to.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Record {
    /// Store-assigned id, increasing in insertion order
    pub id: i64,
    /// Name of the owning table
    pub table_name: String,
    /// Row contents, replaced as a whole on update
    pub payload: Payload,
    /// Insertion time
    pub created_at: DateTime<Utc>,
}

/// A record matched by the cross-table search.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchHit {
    pub table: String,
    pub payload: Payload,
}
