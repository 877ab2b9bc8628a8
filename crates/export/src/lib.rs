pub mod bandwidth;
pub mod scheduler;
pub mod transport;
pub mod uploader;

pub use bandwidth::BandwidthTracker;
pub use scheduler::{CycleOutcome, ExportScheduler, SchedulerConfig, SchedulerHandle, spawn_scheduler};
pub use transport::{HttpTransport, Transport, TransportError};
pub use uploader::{ExportUploader, Payload, Upload, UploadOutcome, build_upload_url, classify_status};
