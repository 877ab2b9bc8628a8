use std::io::IsTerminal;

use beacon_ingest::IngestReport;
use beacon_store::StoreStatus;
use chrono::SecondsFormat;
use owo_colors::OwoColorize;

fn colored() -> bool {
    std::io::stdout().is_terminal()
}

pub fn print_status_human(v: &StoreStatus) {
    println!("db_path={}", v.db_path);
    let pending = v.pending_spans.to_string();
    if colored() && v.pending_spans > 0 {
        println!("pending_spans={}", pending.yellow());
    } else if colored() {
        println!("pending_spans={}", pending.green());
    } else {
        println!("pending_spans={pending}");
    }
    println!("size_bytes={}", v.size_bytes);
    println!("file_size_bytes={}", v.file_size_bytes);
    if let Some(oldest) = v.oldest_inserted_at {
        println!(
            "oldest={}",
            oldest.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
    }
    if let Some(newest) = v.newest_inserted_at {
        println!(
            "newest={}",
            newest.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
    }
}

pub fn print_ingest_human(v: &IngestReport) {
    let stored = v.stored.to_string();
    let stored = if colored() {
        stored.green().to_string()
    } else {
        stored
    };
    println!("received={} stored={stored}", v.received);

    let dropped = [
        ("sampled_out", v.sampled_out),
        ("filtered", v.filtered),
        ("rate_limited", v.rate_limited),
        ("encode_failed", v.encode_failed),
        ("lost", v.lost),
        ("truncated", v.truncated),
    ];
    let line: Vec<String> = dropped
        .iter()
        .filter(|(_, n)| *n > 0)
        .map(|(k, n)| format!("{k}={n}"))
        .collect();
    if !line.is_empty() {
        let line = line.join(" ");
        if colored() {
            println!("{}", line.yellow());
        } else {
            println!("{line}");
        }
    }
}

pub fn print_reset_human(path: &str, removed: bool) {
    if removed {
        println!("removed {path}");
    } else {
        println!("nothing to remove at {path}");
    }
}
