use serde::{Deserialize, Serialize};

/// One pending row in the span store. `payload` is the pre-encoded wire JSON
/// of a single span and is never interpreted by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedSpanRecord {
    pub id: i64,
    pub inserted_at_us: i64,
    pub payload: String,
}

impl PersistedSpanRecord {
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}
