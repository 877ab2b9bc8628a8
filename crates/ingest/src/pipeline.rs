use std::time::Duration;

use beacon_core::config::Config;
use beacon_core::model::span::Span;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::ingestor::{IngestReport, Ingestor};

/// Async front door to an [`Ingestor`] owned by a single writer task.
#[derive(Clone)]
pub struct Pipeline {
    spans_tx: mpsc::Sender<Vec<Span>>,
}

pub struct PipelineConfig {
    pub channel_capacity: usize,
    pub flush_interval: Duration,
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            flush_interval: Duration::from_millis(200),
            batch_size: 256,
        }
    }
}

impl PipelineConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            batch_size: cfg.write_batch_size.max(1),
            flush_interval: Duration::from_millis(cfg.write_flush_ms.max(1)),
            ..Self::default()
        }
    }
}

/// Completes once every [`Pipeline`] clone is dropped and the writer has
/// flushed what it buffered.
pub struct WriterHandle {
    task: JoinHandle<IngestReport>,
}

impl WriterHandle {
    pub async fn join(self) -> IngestReport {
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = ?e, "span writer task failed");
                IngestReport::default()
            }
        }
    }
}

impl Pipeline {
    pub fn new(ingestor: Ingestor, cfg: PipelineConfig) -> (Self, WriterHandle) {
        let (spans_tx, spans_rx) = mpsc::channel(cfg.channel_capacity);
        let task = tokio::spawn(run_span_writer(
            ingestor,
            spans_rx,
            cfg.batch_size,
            cfg.flush_interval,
        ));
        (Self { spans_tx }, WriterHandle { task })
    }

    pub async fn submit_spans(&self, spans: Vec<Span>) {
        if spans.is_empty() {
            return;
        }
        if self.spans_tx.send(spans).await.is_err() {
            warn!("span pipeline dropped batch: receiver closed");
        }
    }
}

async fn run_span_writer(
    mut ingestor: Ingestor,
    mut rx: mpsc::Receiver<Vec<Span>>,
    batch_size: usize,
    flush_interval: Duration,
) -> IngestReport {
    let mut ticker = tokio::time::interval(flush_interval);
    let mut buffer = Vec::new();
    let mut total = IngestReport::default();
    loop {
        tokio::select! {
            received = rx.recv() => {
                let Some(batch) = received else { break };
                buffer.extend(batch);
                if buffer.len() >= batch_size {
                    flush_spans(&mut ingestor, &mut buffer, &mut total);
                }
            }
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush_spans(&mut ingestor, &mut buffer, &mut total);
                }
            }
        }
    }
    if !buffer.is_empty() {
        flush_spans(&mut ingestor, &mut buffer, &mut total);
    }
    total
}

fn flush_spans(ingestor: &mut Ingestor, buffer: &mut Vec<Span>, total: &mut IngestReport) {
    let report = ingestor.ingest_batch(std::mem::take(buffer));
    if report.lost > 0 {
        warn!(lost = report.lost, "span batch was not persisted");
    }
    tracing::debug!(
        received = report.received,
        stored = report.stored,
        "flushed span batch"
    );
    total.merge(report);
}
