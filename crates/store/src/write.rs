use beacon_core::error::{BeaconError, Result};
use beacon_core::time::now_unix_micros;
use duckdb::params;

use crate::SpanStore;

impl SpanStore {
    /// Appends encoded spans in one transaction: either every row is
    /// committed or none is.
    pub fn insert<S: AsRef<str>>(&self, payloads: &[S]) -> Result<()> {
        if payloads.is_empty() {
            return Ok(());
        }

        let mut inner = self.inner();
        let inserted_at = now_unix_micros().max(inner.last_inserted_at);

        let tx = inner
            .conn
            .transaction()
            .map_err(|e| BeaconError::Store(format!("begin tx failed: {e}")))?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO pending_spans (id, inserted_at, payload)
                     VALUES (nextval('pending_span_id_seq'), ?, ?)",
                )
                .map_err(|e| BeaconError::Store(format!("prepare insert spans failed: {e}")))?;

            for payload in payloads {
                stmt.execute(params![inserted_at, payload.as_ref()])
                    .map_err(|e| BeaconError::Store(format!("insert span failed: {e}")))?;
            }
        }

        tx.commit()
            .map_err(|e| BeaconError::Store(format!("commit spans failed: {e}")))?;
        inner.last_inserted_at = inserted_at;
        Ok(())
    }

    /// Deletes exactly the given rows. Unknown ids are ignored.
    pub fn erase(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut inner = self.inner();
        let tx = inner
            .conn
            .transaction()
            .map_err(|e| BeaconError::Store(format!("begin tx failed: {e}")))?;

        {
            let mut stmt = tx
                .prepare("DELETE FROM pending_spans WHERE id = ?")
                .map_err(|e| BeaconError::Store(format!("prepare erase failed: {e}")))?;
            for id in ids {
                stmt.execute(params![*id])
                    .map_err(|e| BeaconError::Store(format!("erase span failed: {e}")))?;
            }
        }

        tx.commit()
            .map_err(|e| BeaconError::Store(format!("commit erase failed: {e}")))
    }
}
