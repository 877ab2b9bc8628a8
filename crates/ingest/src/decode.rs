use beacon_core::error::{BeaconError, Result};
use beacon_core::model::span::Span;
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(untagged)]
enum SpanBatch {
    Many(Vec<Span>),
    One(Box<Span>),
}

/// Decodes a JSON array of spans, a single span object, or JSON lines with
/// one span (or array of spans) per line.
pub fn decode_spans(input: &[u8]) -> Result<Vec<Span>> {
    let text = std::str::from_utf8(input)
        .map_err(|e| BeaconError::Parse(format!("span input is not utf-8: {e}")))?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if let Ok(batch) = serde_json::from_str::<SpanBatch>(trimmed) {
        return Ok(batch.into_spans());
    }

    let mut spans = Vec::new();
    for (line_no, line) in trimmed.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let batch: SpanBatch = serde_json::from_str(line).map_err(|e| {
            BeaconError::Parse(format!("invalid span on line {}: {e}", line_no + 1))
        })?;
        spans.extend(batch.into_spans());
    }
    Ok(spans)
}

impl SpanBatch {
    fn into_spans(self) -> Vec<Span> {
        match self {
            Self::Many(spans) => spans,
            Self::One(span) => vec![*span],
        }
    }
}

#[cfg(test)]
mod tests {
    use beacon_core::model::span::SpanKind;

    use super::*;

    const SPAN: &str = r#"{"traceId":"ab000000000000000000000000000001","spanId":"0000000000000007","name":"GET /a","kind":"client","startTime":"2026-02-01T00:00:00Z","endTime":"2026-02-01T00:00:01Z"}"#;

    #[test]
    fn accepts_array_object_and_lines() {
        let one = decode_spans(SPAN.as_bytes()).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].kind, SpanKind::Client);

        let array = decode_spans(format!("[{SPAN},{SPAN}]").as_bytes()).unwrap();
        assert_eq!(array.len(), 2);

        let lines = decode_spans(format!("{SPAN}\n\n{SPAN}\n[{SPAN}]\n").as_bytes()).unwrap();
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn empty_input_is_no_spans() {
        assert!(decode_spans(b"  \n").unwrap().is_empty());
    }

    #[test]
    fn bad_line_is_reported() {
        let err = decode_spans(format!("{SPAN}\n{{\"name\":1}}").as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
    }
}
