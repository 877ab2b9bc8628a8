use beacon_core::error::{BeaconError, Result};
use beacon_core::model::record::PersistedSpanRecord;

use crate::SpanStore;
use crate::schema::ROW_OVERHEAD_BYTES;

impl SpanStore {
    /// Returns up to `limit` rows, oldest first, without removing them.
    pub fn fetch_oldest(&self, limit: usize) -> Result<Vec<PersistedSpanRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id, inserted_at, payload FROM pending_spans
             ORDER BY inserted_at ASC, id ASC
             LIMIT {limit}"
        );

        let inner = self.inner();
        let mut stmt = inner
            .conn
            .prepare(&sql)
            .map_err(|e| BeaconError::Store(format!("prepare fetch failed: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(PersistedSpanRecord {
                    id: row.get(0)?,
                    inserted_at_us: row.get(1)?,
                    payload: row.get(2)?,
                })
            })
            .map_err(|e| BeaconError::Store(format!("fetch query failed: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| BeaconError::Store(format!("fetch row decode failed: {e}")))
    }

    pub fn count(&self) -> Result<usize> {
        let inner = self.inner();
        inner
            .conn
            .query_row("SELECT COUNT(*) FROM pending_spans", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|v| v as usize)
            .map_err(|e| BeaconError::Store(format!("count query failed: {e}")))
    }

    /// Logical size of the queue: payload bytes plus a fixed per-row cost.
    /// Unlike the database file, this shrinks as soon as rows are deleted.
    pub fn size_bytes(&self) -> Result<u64> {
        let inner = self.inner();
        let (payload_bytes, rows) = inner
            .conn
            .query_row(
                "SELECT CAST(COALESCE(SUM(strlen(payload)), 0) AS BIGINT), COUNT(*)
                 FROM pending_spans",
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .map_err(|e| BeaconError::Store(format!("size query failed: {e}")))?;
        Ok(payload_bytes as u64 + rows as u64 * ROW_OVERHEAD_BYTES)
    }
}
