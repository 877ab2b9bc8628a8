use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use tower_http::trace::TraceLayer;
use tracing::Level;

use crate::decode::decode_spans;
use crate::pipeline::Pipeline;

#[derive(Clone)]
pub struct HttpIngestState {
    pub pipeline: Pipeline,
}

pub fn router(pipeline: Pipeline) -> Router {
    Router::new()
        .route("/v1/spans", post(ingest_spans))
        .layer(
            TraceLayer::new_for_http()
                .on_request(tower_http::trace::DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(tower_http::trace::DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .with_state(HttpIngestState { pipeline })
}

async fn ingest_spans(State(state): State<HttpIngestState>, body: Bytes) -> StatusCode {
    let spans = match decode_spans(&body) {
        Ok(spans) => spans,
        Err(e) => {
            tracing::warn!(error = ?e, "span ingest decode failed");
            return StatusCode::BAD_REQUEST;
        }
    };
    tracing::debug!(count = spans.len(), "span ingest accepted");
    state.pipeline.submit_spans(spans).await;
    StatusCode::ACCEPTED
}
