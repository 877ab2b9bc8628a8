mod output;
mod telemetry;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use beacon_core::config::{Compression, Config};
use beacon_export::{CycleOutcome, ExportScheduler, spawn_scheduler};
use beacon_ingest::{Ingestor, Pipeline, PipelineConfig, decode_spans, run_ingest_server};
use beacon_store::SpanStore;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::sync::watch;

use crate::output::{print_ingest_human, print_reset_human, print_status_human};
use crate::telemetry::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "beacon")]
#[command(about = "Durable span queue with a bandwidth-paced collector upload loop")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    db_path: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Default)]
struct ExportArgs {
    #[arg(long)]
    endpoint: Option<String>,
    #[arg(long)]
    auth_token: Option<String>,
    #[arg(long)]
    allow_insecure_endpoint: bool,
    #[arg(long, help = "none or gzip")]
    compression: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Accept spans over HTTP and upload them until ctrl-c")]
    Run {
        #[command(flatten)]
        export: ExportArgs,
        #[arg(long)]
        ingest_http_addr: Option<String>,
    },
    #[command(about = "Upload everything pending, then exit")]
    Flush {
        #[command(flatten)]
        export: ExportArgs,
    },
    #[command(about = "Persist spans from a JSON file, or stdin with '-'")]
    Ingest { input: String },
    #[command(about = "Show the pending span queue")]
    Status,
    #[command(about = "Delete the span database and everything in it")]
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut cfg = Config::load().context("load config")?;
    if let Some(v) = cli.db_path {
        cfg.db_path = v;
    }

    match cli.command {
        Commands::Run {
            export,
            ingest_http_addr,
        } => {
            init_tracing("info");
            apply_export_args(&mut cfg, export)?;
            if let Some(v) = ingest_http_addr {
                cfg.ingest_http_addr = v;
            }
            run_agent(cfg).await
        }
        Commands::Flush { export } => {
            init_tracing("info");
            apply_export_args(&mut cfg, export)?;
            flush(cfg, cli.json).await
        }
        Commands::Ingest { input } => {
            init_tracing("warn");
            ingest(cfg, &input, cli.json).await
        }
        Commands::Status => {
            init_tracing("warn");
            let store = SpanStore::open(&cfg.db_path)
                .with_context(|| format!("open {}", cfg.db_path.display()))?;
            let status = store.status()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status_human(&status);
            }
            Ok(())
        }
        Commands::Reset => {
            init_tracing("warn");
            let removed = SpanStore::delete_database(&cfg.db_path)?;
            let path = cfg.db_path.display().to_string();
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ResetResult { path, removed })?
                );
            } else {
                print_reset_human(&path, removed);
            }
            Ok(())
        }
    }
}

#[derive(Debug, Serialize)]
struct ResetResult {
    path: String,
    removed: bool,
}

#[derive(Debug, Default, Serialize)]
struct FlushResult {
    delivered: usize,
    rejected: usize,
    discarded: usize,
    pending: usize,
}

fn apply_export_args(cfg: &mut Config, args: ExportArgs) -> anyhow::Result<()> {
    if let Some(v) = args.endpoint {
        cfg.endpoint = Some(v);
    }
    if let Some(v) = args.auth_token {
        cfg.auth_token = Some(v);
    }
    if args.allow_insecure_endpoint {
        cfg.allow_insecure_endpoint = true;
    }
    if let Some(v) = args.compression {
        cfg.compression = v.parse::<Compression>()?;
    }
    Ok(())
}

async fn run_agent(cfg: Config) -> anyhow::Result<()> {
    let store = SpanStore::open(&cfg.db_path)
        .with_context(|| format!("open {}", cfg.db_path.display()))?;
    let scheduler =
        ExportScheduler::from_config(store.clone(), &cfg).context("configure exporter")?;
    let ingest_addr: SocketAddr = cfg
        .ingest_http_addr
        .parse()
        .with_context(|| format!("bad ingest_http_addr {}", cfg.ingest_http_addr))?;

    eprintln!("beacon run");
    eprintln!("  db: {}", cfg.db_path.display());
    eprintln!("  ingest http: {ingest_addr}");
    eprintln!("  endpoint: {}", cfg.endpoint.as_deref().unwrap_or("-"));

    let exporter = spawn_scheduler(scheduler);
    let (pipeline, writer) = Pipeline::new(
        Ingestor::new(store.clone(), &cfg),
        PipelineConfig::from_config(&cfg),
    );

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let mut server = tokio::spawn(run_ingest_server(pipeline, ingest_addr, async move {
        let _ = stop_rx.changed().await;
    }));

    let server_result = tokio::select! {
        res = &mut server => Some(res),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
            None
        }
    };
    let server_result = match server_result {
        Some(res) => res,
        None => {
            let _ = stop_tx.send(true);
            server.await
        }
    };

    // The server owned the last pipeline handle, so the writer now drains.
    let report = writer.join().await;
    tracing::info!(stored = report.stored, "span writer stopped");
    exporter.shutdown().await;

    server_result
        .context("ingest server task failed")?
        .context("ingest server failed")?;
    Ok(())
}

async fn flush(cfg: Config, json: bool) -> anyhow::Result<()> {
    let store = SpanStore::open(&cfg.db_path)
        .with_context(|| format!("open {}", cfg.db_path.display()))?;
    let mut scheduler =
        ExportScheduler::from_config(store.clone(), &cfg).context("configure exporter")?;

    let mut result = FlushResult::default();
    loop {
        let outcome = tokio::select! {
            outcome = scheduler.run_cycle() => outcome,
            _ = tokio::signal::ctrl_c() => break,
        };
        match &outcome {
            CycleOutcome::Empty => break,
            CycleOutcome::Delivered { spans } => result.delivered += *spans,
            CycleOutcome::Rejected { spans } => result.rejected += *spans,
            CycleOutcome::Discarded { spans } => result.discarded += *spans,
            CycleOutcome::Throttled
            | CycleOutcome::Retained { .. }
            | CycleOutcome::StoreUnavailable => {}
        }
        let delay = outcome.next_delay(scheduler.config());
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    result.pending = store.count()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "delivered={} rejected={} discarded={} pending={}",
            result.delivered, result.rejected, result.discarded, result.pending
        );
    }
    Ok(())
}

async fn ingest(cfg: Config, input: &str, json: bool) -> anyhow::Result<()> {
    let raw = if input == "-" {
        let mut buf = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buf)
            .await
            .context("read spans from stdin")?;
        buf
    } else {
        tokio::fs::read(input)
            .await
            .with_context(|| format!("read {input}"))?
    };
    let spans = decode_spans(&raw).context("decode spans")?;

    let store = SpanStore::open(&cfg.db_path)
        .with_context(|| format!("open {}", cfg.db_path.display()))?;
    let mut ingestor = Ingestor::new(store, &cfg);
    let report = ingestor.ingest_batch(spans);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_ingest_human(&report);
    }
    if report.lost > 0 {
        anyhow::bail!("{} spans could not be persisted", report.lost);
    }
    Ok(())
}
