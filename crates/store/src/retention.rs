use beacon_core::error::{BeaconError, Result};

use crate::SpanStore;

impl SpanStore {
    /// Drops the oldest fifth of the queue and reclaims file space.
    /// Returns how many rows were deleted.
    pub fn truncate(&self) -> Result<usize> {
        let inner = self.inner();
        let rows = inner
            .conn
            .query_row("SELECT COUNT(*) FROM pending_spans", [], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(|e| BeaconError::Store(format!("truncate count failed: {e}")))?;

        let doomed = rows / 5;
        if doomed == 0 {
            return Ok(0);
        }

        let deleted = inner
            .conn
            .execute(
                &format!(
                    "DELETE FROM pending_spans WHERE id IN (
                       SELECT id FROM pending_spans ORDER BY inserted_at ASC, id ASC LIMIT {doomed}
                     )"
                ),
                [],
            )
            .map_err(|e| BeaconError::Store(format!("span deletion failed on truncate: {e}")))?;

        if !self.is_in_memory() {
            inner
                .conn
                .execute_batch("CHECKPOINT;")
                .map_err(|e| BeaconError::Store(format!("checkpoint after truncate failed: {e}")))?;
        }

        tracing::info!(deleted, remaining = rows as usize - deleted, "truncated span store");
        Ok(deleted)
    }

    /// Truncates once if the logical size has reached `max_bytes`.
    pub fn truncate_if_over(&self, max_bytes: u64) -> Result<Option<usize>> {
        let size = self.size_bytes()?;
        if size < max_bytes {
            return Ok(None);
        }
        tracing::warn!(size, max_bytes, "span store over budget, dropping oldest spans");
        self.truncate().map(Some)
    }
}

#[cfg(test)]
mod tests {
    use crate::SpanStore;

    fn fill(store: &SpanStore, n: usize) {
        let payloads: Vec<String> = (0..n).map(|i| format!("{{\"n\":{i}}}")).collect();
        store.insert(&payloads).unwrap();
    }

    #[test]
    fn truncate_keeps_newest_eighty_percent() {
        let store = SpanStore::open_in_memory().unwrap();
        fill(&store, 10);

        assert_eq!(store.truncate().unwrap(), 2);

        let left = store.fetch_oldest(100).unwrap();
        assert_eq!(left.len(), 8);
        assert_eq!(left[0].payload, "{\"n\":2}");
        assert_eq!(left[7].payload, "{\"n\":9}");
    }

    #[test]
    fn truncate_rounds_remaining_up() {
        let store = SpanStore::open_in_memory().unwrap();
        fill(&store, 7);
        store.truncate().unwrap();
        // ceil(7 * 0.8) = 6
        assert_eq!(store.count().unwrap(), 6);
    }

    #[test]
    fn truncate_small_store_is_noop() {
        let store = SpanStore::open_in_memory().unwrap();
        fill(&store, 4);
        assert_eq!(store.truncate().unwrap(), 0);
        assert_eq!(store.count().unwrap(), 4);
    }

    #[test]
    fn truncate_if_over_respects_budget() {
        let store = SpanStore::open_in_memory().unwrap();
        fill(&store, 20);
        let size = store.size_bytes().unwrap();

        assert_eq!(store.truncate_if_over(size + 1).unwrap(), None);
        assert_eq!(store.truncate_if_over(size).unwrap(), Some(4));
        assert_eq!(store.count().unwrap(), 16);
        assert!(store.size_bytes().unwrap() < size);
    }

    #[test]
    fn truncate_on_file_store_checkpoints() {
        let temp = tempfile::tempdir().unwrap();
        let store = SpanStore::open(&temp.path().join("spans.duckdb")).unwrap();
        fill(&store, 50);
        assert_eq!(store.truncate().unwrap(), 10);
        assert_eq!(store.count().unwrap(), 40);
    }
}
