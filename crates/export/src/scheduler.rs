use std::time::Duration;

use beacon_core::config::Config;
use beacon_store::SpanStore;
use bytes::Bytes;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::bandwidth::BandwidthTracker;
use crate::transport::{HttpTransport, Transport};
use crate::uploader::{ExportUploader, Payload, UploadOutcome, build_upload_url};

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub batch_size: usize,
    pub max_payload_bytes: usize,
    /// KiB/s ceiling above which a cycle is skipped.
    pub max_bandwidth_kib: f64,
    pub bandwidth_window: Duration,
    pub bandwidth_max_samples: usize,
    pub idle_delay: Duration,
    pub throttle_delay: Duration,
    pub burst_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SchedulerConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            batch_size: cfg.batch_size,
            max_payload_bytes: cfg.max_payload_bytes,
            max_bandwidth_kib: cfg.max_bandwidth_kib,
            bandwidth_window: cfg.bandwidth_window,
            bandwidth_max_samples: cfg.bandwidth_max_samples,
            idle_delay: cfg.idle_delay,
            throttle_delay: cfg.throttle_delay,
            burst_delay: cfg.burst_delay,
        }
    }
}

/// What one pass of the export loop did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Throttled,
    Empty,
    Delivered { spans: usize },
    /// Collector refused the batch for good; rows were dropped.
    Rejected { spans: usize },
    /// Upload failed; rows stay queued.
    Retained { spans: usize },
    /// Every fetched row was too large to ever upload and was dropped.
    Discarded { spans: usize },
    StoreUnavailable,
}

impl CycleOutcome {
    pub fn next_delay(&self, config: &SchedulerConfig) -> Duration {
        match self {
            Self::Throttled => config.throttle_delay,
            Self::Delivered { .. } | Self::Rejected { .. } | Self::Discarded { .. } => {
                config.burst_delay
            }
            Self::Empty | Self::Retained { .. } | Self::StoreUnavailable => config.idle_delay,
        }
    }
}

pub struct ExportScheduler<T> {
    store: SpanStore,
    uploader: ExportUploader<T>,
    config: SchedulerConfig,
    bandwidth: BandwidthTracker,
    origin: Instant,
}

impl ExportScheduler<HttpTransport> {
    /// Scheduler posting to the configured endpoint over HTTP.
    pub fn from_config(store: SpanStore, cfg: &Config) -> beacon_core::Result<Self> {
        let endpoint = cfg.endpoint.as_deref().ok_or_else(|| {
            beacon_core::BeaconError::Config("no export endpoint configured".to_string())
        })?;
        let url = build_upload_url(
            endpoint,
            cfg.auth_token.as_deref(),
            cfg.allow_insecure_endpoint,
        )?;
        let transport = HttpTransport::new(cfg.upload_timeout);
        let uploader = ExportUploader::new(transport, url, cfg.upload_timeout)
            .with_compression(cfg.compression);
        Ok(Self::new(store, uploader, SchedulerConfig::from_config(cfg)))
    }
}

impl<T: Transport> ExportScheduler<T> {
    pub fn new(store: SpanStore, uploader: ExportUploader<T>, config: SchedulerConfig) -> Self {
        let bandwidth = BandwidthTracker::new(config.bandwidth_window, config.bandwidth_max_samples);
        Self {
            store,
            uploader,
            config,
            bandwidth,
            origin: Instant::now(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Current upload rate in KiB/s.
    pub fn current_bandwidth(&self) -> f64 {
        self.bandwidth.bandwidth(self.elapsed())
    }

    fn elapsed(&self) -> Duration {
        Instant::now().saturating_duration_since(self.origin)
    }

    /// One export attempt. Never fails; faults are logged and reflected in
    /// the outcome.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let rate = self.current_bandwidth();
        if rate > self.config.max_bandwidth_kib {
            tracing::debug!(
                rate_kib = rate,
                ceiling_kib = self.config.max_bandwidth_kib,
                "upload bandwidth over ceiling, skipping cycle"
            );
            return CycleOutcome::Throttled;
        }

        let records = match self.store.fetch_oldest(self.config.batch_size) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = ?e, "failed to read pending spans");
                return CycleOutcome::StoreUnavailable;
            }
        };
        if records.is_empty() {
            return CycleOutcome::Empty;
        }

        let payload = Payload::build(&records, self.config.max_payload_bytes);
        if !payload.oversized.is_empty() {
            tracing::warn!(
                spans = payload.oversized.len(),
                max_payload_bytes = self.config.max_payload_bytes,
                "dropping spans larger than the upload ceiling"
            );
            if let Err(e) = self.store.erase(&payload.oversized) {
                tracing::warn!(error = ?e, "failed to erase oversized spans");
            }
        }
        if payload.is_empty() {
            return CycleOutcome::Discarded {
                spans: payload.oversized.len(),
            };
        }

        let spans = payload.ids.len();
        let sent_at = self.elapsed();
        let upload = self.uploader.upload(Bytes::from(payload.body)).await;
        let bytes = upload.wire_bytes;
        self.bandwidth.add(bytes, sent_at);
        let outcome = upload.outcome;

        if !outcome.is_safe_to_delete() {
            return CycleOutcome::Retained { spans };
        }

        if let Err(e) = self.store.erase(&payload.ids) {
            // Rows stay queued and will be sent again.
            tracing::warn!(error = ?e, spans, "failed to erase uploaded spans");
        }
        match outcome {
            UploadOutcome::Rejected(_) => CycleOutcome::Rejected { spans },
            _ => {
                tracing::debug!(spans, bytes, "exported spans");
                CycleOutcome::Delivered { spans }
            }
        }
    }

    /// Runs cycles until `shutdown` flips to true or its sender is dropped.
    /// A cycle in progress is always allowed to finish.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(url = self.uploader.url(), "export scheduler started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let outcome = self.run_cycle().await;
            let delay = outcome.next_delay(&self.config);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("export scheduler stopped");
    }
}

pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = ?e, "export scheduler task failed");
        }
    }
}

pub fn spawn_scheduler<T>(scheduler: ExportScheduler<T>) -> SchedulerHandle
where
    T: Transport + 'static,
{
    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(scheduler.run(rx));
    SchedulerHandle { shutdown: tx, task }
}
