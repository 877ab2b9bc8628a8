pub const SCHEMA_SQL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS pending_span_id_seq;

CREATE TABLE IF NOT EXISTS pending_spans (
  id BIGINT PRIMARY KEY,
  inserted_at BIGINT NOT NULL,
  payload TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pending_spans_order ON pending_spans(inserted_at, id);
"#;

/// Fixed per-row cost added to payload bytes when estimating store size.
pub const ROW_OVERHEAD_BYTES: u64 = 32;
