use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use feeds_cache::{BulkFetch, CacheConfig, CoalescingCache};
use feeds_core::prelude::*;
use feeds_store::{spawn_dispatch, CommentThread, PaginatedCollection};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "feedsctl", version, about = "Feeds sync CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay an NDJSON stream of collection events and print the final list
    ReplayList {
        /// File with one event per line, e.g. {"type":"added","item":{...}}
        file: PathBuf,
        /// Newest first instead of oldest first
        #[arg(long = "desc", action = ArgAction::SetTrue)]
        desc: bool,
    },
    /// Replay an NDJSON stream of comment thread events and print the tree
    ReplayThread {
        file: PathBuf,
        /// Id of the signed-in user (decides which reactions are "own")
        #[arg(long = "user")]
        user: String,
    },
    /// Drive the lookup cache against a simulated bulk endpoint
    Coalesce {
        /// Comma-separated keys every caller asks for
        #[arg(long = "keys", value_delimiter = ',', required = true)]
        keys: Vec<String>,
        /// Concurrent callers per key
        #[arg(long = "callers", default_value_t = 4)]
        callers: usize,
        /// Fail this many bulk calls before answering
        #[arg(long = "fail-first", default_value_t = 0)]
        fail_first: usize,
        /// Give up on a caller after this long
        #[arg(long = "timeout-ms", default_value_t = 5000)]
        timeout_ms: u64,
    },
}

/// Filter directives from `FEEDS_LOG`, e.g. `info,feeds_cache=debug`.
/// Missing or unparsable directives fall back to `info`.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::from_str(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn init_tracing() {
    let directives = std::env::var("FEEDS_LOG").ok();
    // stdout carries command output; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(directives.as_deref()))
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Serve the store and cache metrics over HTTP when `FEEDS_METRICS_ADDR` is set.
fn init_metrics() {
    let Ok(addr) = std::env::var("FEEDS_METRICS_ADDR") else {
        return;
    };
    let sock = match addr.parse::<SocketAddr>() {
        Ok(sock) => sock,
        Err(e) => {
            warn!(addr = %addr, error = %e, "FEEDS_METRICS_ADDR is not host:port; metrics disabled");
            return;
        }
    };
    match PrometheusBuilder::new().with_http_listener(sock).install() {
        Ok(()) => info!(%sock, "serving feeds metrics"),
        Err(e) => warn!(error = %e, "metrics endpoint not started"),
    }
}

fn queue_cap() -> usize {
    std::env::var("FEEDS_QUEUE_CAP").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(1024)
}

/// A generic feed item: an id, a timestamp and whatever else the server sent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Record {
    id: String,
    created_at: DateTime<Utc>,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

impl Entity for Record {
    type Key = String;

    fn key(&self) -> String { self.id.clone() }
}

fn record_order(desc: bool) -> Comparator<Record> {
    if desc {
        Sort::desc(|r: &Record| r.created_at).then_desc(|r| r.id.clone()).into_comparator()
    } else {
        Sort::asc(|r: &Record| r.created_at).then_asc(|r| r.id.clone()).into_comparator()
    }
}

/// Parse one value per non-blank line; errors carry `file:line`.
fn parse_ndjson<T: DeserializeOwned>(path: &Path, text: &str) -> Result<Vec<T>> {
    text.lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(n, l)| serde_json::from_str(l).with_context(|| format!("{}:{}", path.display(), n + 1)))
        .collect()
}

async fn replay<E, S>(sink: Arc<S>, events: Vec<E>) -> Result<u64>
where
    E: Send + 'static,
    S: feeds_store::EventSink<E> + 'static,
{
    let (tx, handle) = spawn_dispatch(sink, queue_cap());
    for ev in events {
        if tx.send(ev).await.is_err() {
            warn!("dispatch loop stopped early");
            break;
        }
    }
    drop(tx);
    Ok(handle.await?)
}

async fn replay_list(path: &Path, desc: bool, output: Output) -> Result<()> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let events: Vec<CollectionEvent<Record>> = parse_ndjson(path, &text)?;
    info!(file = %path.display(), events = events.len(), desc, "replay-list invoked");

    let list = Arc::new(PaginatedCollection::new(record_order(desc)));
    let applied = replay(Arc::clone(&list), events).await?;
    let snap = list.current();

    match output {
        Output::Human => {
            println!("{:<24} {:<26}", "ID", "CREATED_AT");
            for r in snap.items.iter() {
                println!("{:<24} {}", r.id, r.created_at.to_rfc3339());
            }
            println!("next: {}", snap.pagination.next.as_deref().unwrap_or("-"));
            println!("events: {applied}  epoch: {}", snap.epoch);
        }
        Output::Json => {
            #[derive(Serialize)]
            struct Out<'a> { epoch: u64, items: &'a [Record], pagination: &'a Pagination }
            println!("{}", serde_json::to_string_pretty(&Out { epoch: snap.epoch, items: &snap.items, pagination: &snap.pagination })?);
        }
    }
    Ok(())
}

fn print_tree(nodes: &[Arc<CommentNode>], depth: usize) {
    for c in nodes {
        let kinds: Vec<String> = c
            .reactions
            .groups
            .iter()
            .map(|(kind, g)| {
                let own = if c.reactions.has_own(kind) { "*" } else { "" };
                format!("{kind}{own}:{}", g.count)
            })
            .collect();
        println!(
            "{:indent$}{}  replies={}  reactions=[{}]",
            "",
            c.id,
            c.reply_count,
            kinds.join(" "),
            indent = depth * 2
        );
        print_tree(&c.replies, depth + 1);
    }
}

async fn replay_thread(path: &Path, user: &str, output: Output) -> Result<()> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let events: Vec<ThreadEvent> = parse_ndjson(path, &text)?;
    info!(file = %path.display(), events = events.len(), user, "replay-thread invoked");

    let order = Sort::asc(|c: &CommentNode| c.created_at).then_asc(|c| c.id.clone()).into_comparator();
    let thread = Arc::new(CommentThread::new(order, user));
    let applied = replay(Arc::clone(&thread), events).await?;
    let snap = thread.current();

    match output {
        Output::Human => {
            print_tree(&snap.comments, 0);
            println!("next: {}", snap.pagination.next.as_deref().unwrap_or("-"));
            println!("events: {applied}  epoch: {}", snap.epoch);
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&snap.comments)?),
    }
    Ok(())
}

/// Bulk endpoint stand-in: answers `value:<key>` after failing its first calls.
struct SimulatedEndpoint {
    calls: AtomicUsize,
    fail_first: usize,
}

#[async_trait::async_trait]
impl BulkFetch<String, String> for SimulatedEndpoint {
    async fn fetch(&self, keys: Vec<String>) -> Result<HashMap<String, String>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        info!(call = n, keys = ?keys, "bulk endpoint called");
        tokio::time::sleep(Duration::from_millis(5)).await;
        if n <= self.fail_first {
            anyhow::bail!("simulated outage (call {n})");
        }
        Ok(keys.into_iter().map(|k| { let v = format!("value:{k}"); (k, v) }).collect())
    }
}

async fn coalesce(keys: Vec<String>, callers: usize, fail_first: usize, timeout: Duration, output: Output) -> Result<()> {
    let config = CacheConfig::from_env();
    info!(keys = keys.len(), callers, fail_first, ?config, "coalesce invoked");
    let endpoint = Arc::new(SimulatedEndpoint { calls: AtomicUsize::new(0), fail_first });
    let cache = Arc::new(CoalescingCache::<String, String>::new(config, endpoint.clone()));

    let mut tasks = Vec::with_capacity(keys.len() * callers.max(1));
    for key in &keys {
        for _ in 0..callers.max(1) {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            tasks.push(tokio::spawn(async move {
                let out = tokio::time::timeout(timeout, cache.fetch(key.clone())).await;
                (key, out)
            }));
        }
    }

    let mut values: HashMap<String, String> = HashMap::new();
    let mut timed_out = 0usize;
    for res in futures::future::join_all(tasks).await {
        let (key, out) = res?;
        match out {
            Ok(Ok(v)) => { values.insert(key, v); }
            Ok(Err(e)) => warn!(key = %key, error = %e, "fetch failed"),
            Err(_) => timed_out += 1,
        }
    }
    let stats = cache.stats();
    let calls = endpoint.calls.load(Ordering::SeqCst);

    match output {
        Output::Human => {
            for key in &keys {
                println!("{:<20} {}", key, values.get(key).map(String::as_str).unwrap_or("(pending)"));
            }
            println!(
                "bulk calls: {calls}  bulk fetches: {}  failures: {}  offers: {}  hits: {}  misses: {}  timed out: {timed_out}",
                stats.bulk_fetches, stats.bulk_failures, stats.offers, stats.hits, stats.misses
            );
        }
        Output::Json => {
            #[derive(Serialize)]
            struct Out<'a> {
                values: &'a HashMap<String, String>,
                bulk_calls: usize,
                bulk_fetches: u64,
                bulk_failures: u64,
                offers: u64,
                hits: u64,
                misses: u64,
                timed_out: usize,
            }
            let out = Out {
                values: &values,
                bulk_calls: calls,
                bulk_fetches: stats.bulk_fetches,
                bulk_failures: stats.bulk_failures,
                offers: stats.offers,
                hits: stats.hits,
                misses: stats.misses,
                timed_out,
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::ReplayList { file, desc } => replay_list(&file, desc, cli.output).await?,
        Commands::ReplayThread { file, user } => replay_thread(&file, &user, cli.output).await?,
        Commands::Coalesce { keys, callers, fail_first, timeout_ms } => {
            coalesce(keys, callers, fail_first, Duration::from_millis(timeout_ms), cli.output).await?
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_filter_falls_back_to_info() {
        assert_eq!(log_filter(None).to_string(), "info");
        assert_eq!(log_filter(Some("feeds_cache=debug")).to_string(), "feeds_cache=debug");
    }

    #[test]
    fn record_keeps_unknown_fields() {
        let r: Record = serde_json::from_str(r#"{"id":"a","created_at":"2024-01-01T00:00:00Z","text":"hi"}"#).expect("parse");
        assert_eq!(r.key(), "a");
        assert_eq!(r.rest.get("text").and_then(|v| v.as_str()), Some("hi"));
    }

    #[test]
    fn ndjson_errors_name_the_line() {
        let text = "{\"type\":\"removed\",\"key\":\"a\"}\n\nnot json\n";
        let err = parse_ndjson::<CollectionEvent<Record>>(Path::new("events.ndjson"), text).expect_err("bad line");
        assert_eq!(err.to_string(), "events.ndjson:3");
    }

    #[tokio::test]
    async fn replay_applies_events_in_file_order() {
        let text = concat!(
            r#"{"type":"added","item":{"id":"b","created_at":"2024-01-02T00:00:00Z"}}"#, "\n",
            r#"{"type":"added","item":{"id":"a","created_at":"2024-01-01T00:00:00Z"}}"#, "\n",
            r#"{"type":"removed","key":"b"}"#, "\n",
        );
        let events: Vec<CollectionEvent<Record>> = parse_ndjson(Path::new("t"), text).expect("parse");
        let list = Arc::new(PaginatedCollection::new(record_order(false)));
        let applied = replay(Arc::clone(&list), events).await.expect("replay");
        assert_eq!(applied, 3);
        let ids: Vec<_> = list.items().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a".to_string()]);
    }
}
