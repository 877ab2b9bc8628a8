use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use beacon_core::config::Compression;
use beacon_core::limits::AttributeLimiter;
use beacon_core::wire::encode_span;
use beacon_export::{
    CycleOutcome, ExportScheduler, ExportUploader, HttpTransport, SchedulerConfig, Transport,
    TransportError, build_upload_url, spawn_scheduler,
};
use beacon_store::SpanStore;
use bytes::Bytes;
use testkit::{FakeCollector, sample_span, sample_spans, span_with_attr};

fn roomy() -> SchedulerConfig {
    SchedulerConfig {
        max_bandwidth_kib: f64::MAX,
        ..SchedulerConfig::default()
    }
}

fn encoded(spans: &[beacon_core::model::span::Span]) -> Vec<String> {
    spans.iter().map(|s| encode_span(s).unwrap()).collect()
}

#[derive(Clone, Default)]
struct Exclusive {
    in_flight: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl Transport for Exclusive {
    async fn post(
        &self,
        _url: &str,
        _body: Bytes,
        _content_encoding: Option<&'static str>,
    ) -> Result<u16, TransportError> {
        assert!(
            !self.in_flight.swap(true, Ordering::SeqCst),
            "two uploads in flight"
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.in_flight.store(false, Ordering::SeqCst);
        Ok(202)
    }
}

#[tokio::test(start_paused = true)]
async fn at_most_one_upload_in_flight() -> anyhow::Result<()> {
    let store = SpanStore::open_in_memory()?;
    store.insert(&encoded(&sample_spans(20)))?;

    let transport = Exclusive::default();
    let uploader = ExportUploader::new(
        transport.clone(),
        "https://collector/v1/rum".into(),
        Duration::from_secs(10),
    );
    let handle = spawn_scheduler(ExportScheduler::new(
        store.clone(),
        uploader,
        SchedulerConfig {
            batch_size: 4,
            ..roomy()
        },
    ));

    for _ in 0..200 {
        if store.count()? == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    handle.shutdown().await;

    assert_eq!(store.count()?, 0);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 5);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_in_flight_upload() -> anyhow::Result<()> {
    let store = SpanStore::open_in_memory()?;
    store.insert(&encoded(&sample_spans(2)))?;

    let transport = Exclusive::default();
    let uploader = ExportUploader::new(
        transport.clone(),
        "https://collector/v1/rum".into(),
        Duration::from_secs(10),
    );
    let handle = spawn_scheduler(ExportScheduler::new(store.clone(), uploader, roomy()));

    // Let the first cycle reach the transport, then stop mid-upload.
    tokio::time::sleep(Duration::from_millis(10)).await;
    handle.shutdown().await;

    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.count()?, 0);
    Ok(())
}

#[test]
fn long_attributes_are_capped_before_upload() -> anyhow::Result<()> {
    let store = SpanStore::open_in_memory()?;
    let limiter = AttributeLimiter::default();
    let mut span = span_with_attr("long", "db.statement", "q".repeat(10_000));
    limiter.limit_span(&mut span);
    store.insert(&[encode_span(&span)?])?;

    let records = store.fetch_oldest(1)?;
    let parsed: serde_json::Value = serde_json::from_str(&records[0].payload)?;
    let statement = parsed["tags"]["db.statement"].as_str().unwrap();
    assert_eq!(statement.chars().count(), 4096);
    Ok(())
}

async fn http_scheduler(
    store: &SpanStore,
    collector: &FakeCollector,
    compression: Compression,
) -> anyhow::Result<ExportScheduler<HttpTransport>> {
    let url = build_upload_url(&collector.endpoint(), Some("t0k"), true)?;
    let transport = HttpTransport::new(Duration::from_secs(5));
    let uploader =
        ExportUploader::new(transport, url, Duration::from_secs(5)).with_compression(compression);
    Ok(ExportScheduler::new(store.clone(), uploader, roomy()))
}

#[tokio::test]
async fn uploads_to_http_collector() -> anyhow::Result<()> {
    let collector = FakeCollector::start(&[]).await?;
    let store = SpanStore::open_in_memory()?;
    store.insert(&encoded(&[sample_span("GET /a", 0), sample_span("GET /b", 3)]))?;

    let mut sched = http_scheduler(&store, &collector, Compression::None).await?;
    assert_eq!(sched.run_cycle().await, CycleOutcome::Delivered { spans: 2 });
    assert_eq!(store.count()?, 0);

    let uploads = collector.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].query.as_deref(), Some("auth=t0k"));
    assert_eq!(uploads[0].content_type.as_deref(), Some("application/json"));
    assert!(uploads[0].content_encoding.is_none());

    let body = uploads[0].json();
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["GET /a", "GET /b"]);
    assert_eq!(body[0]["localEndpoint"]["serviceName"], "app");
    Ok(())
}

#[tokio::test]
async fn gzip_uploads_are_marked() -> anyhow::Result<()> {
    let collector = FakeCollector::start(&[]).await?;
    let store = SpanStore::open_in_memory()?;
    store.insert(&encoded(&sample_spans(3)))?;

    let mut sched = http_scheduler(&store, &collector, Compression::Gzip).await?;
    assert_eq!(sched.run_cycle().await, CycleOutcome::Delivered { spans: 3 });

    let uploads = collector.uploads();
    assert_eq!(uploads[0].content_encoding.as_deref(), Some("gzip"));
    assert_eq!(collector.span_count(), 3);
    Ok(())
}

#[tokio::test]
async fn collector_errors_drive_retention() -> anyhow::Result<()> {
    let collector = FakeCollector::start(&[503, 413]).await?;
    let store = SpanStore::open_in_memory()?;
    store.insert(&encoded(&sample_spans(2)))?;

    let mut sched = http_scheduler(&store, &collector, Compression::None).await?;
    assert_eq!(sched.run_cycle().await, CycleOutcome::Retained { spans: 2 });
    assert_eq!(store.count()?, 2);

    assert_eq!(sched.run_cycle().await, CycleOutcome::Rejected { spans: 2 });
    assert_eq!(store.count()?, 0);
    assert_eq!(collector.uploads().len(), 2);
    Ok(())
}

#[tokio::test]
async fn unreachable_collector_keeps_rows() -> anyhow::Result<()> {
    let store = SpanStore::open_in_memory()?;
    store.insert(&encoded(&sample_spans(1)))?;

    // Bind then drop to get a port nobody listens on.
    let port = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await?
        .local_addr()?
        .port();
    let url = build_upload_url(&format!("http://127.0.0.1:{port}/v1/rum"), None, true)?;
    let uploader = ExportUploader::new(
        HttpTransport::new(Duration::from_secs(2)),
        url,
        Duration::from_secs(2),
    );
    let mut sched = ExportScheduler::new(store.clone(), uploader, roomy());

    assert_eq!(sched.run_cycle().await, CycleOutcome::Retained { spans: 1 });
    assert_eq!(store.count()?, 1);
    Ok(())
}

#[test]
fn fetch_then_erase_keeps_fifo_head() -> anyhow::Result<()> {
    let store = SpanStore::open_in_memory()?;
    let spans = [
        sample_span("t0", 0),
        sample_span("t3", 3),
        sample_span("t6", 6),
    ];
    for span in &spans {
        store.insert(&[encode_span(span)?])?;
    }

    let head = store.fetch_oldest(2)?;
    let stamps: Vec<i64> = head
        .iter()
        .map(|r| {
            let value: serde_json::Value = serde_json::from_str(&r.payload).unwrap();
            value["timestamp"].as_i64().unwrap()
        })
        .collect();
    let base = beacon_core::time::unix_micros(spans[0].start_time);
    assert_eq!(stamps, vec![base, base + 3]);

    store.erase(&head.iter().map(|r| r.id).collect::<Vec<_>>())?;
    let rest = store.fetch_oldest(10)?;
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].payload, encode_span(&spans[2])?);
    Ok(())
}
