pub mod decode;
pub mod http;
pub mod ingestor;
pub mod pipeline;
pub mod server;

pub use decode::decode_spans;
pub use ingestor::{IngestReport, Ingestor, TruncationPolicy};
pub use pipeline::{Pipeline, PipelineConfig, WriterHandle};
pub use server::run_ingest_server;
