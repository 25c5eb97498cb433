//! Usage metering
//!
//! Persists one row per request to SQLite for analytics. Writes go
//! through a bounded in-memory queue drained by a dedicated writer
//! thread, so the response path never blocks on the database:
//!
//! ```text
//! request handler
//!     │ log()  (lock, push, notify - microseconds)
//!     ▼
//! bounded queue (drop-oldest on overflow, dropped counter)
//!     │
//!     ▼
//! usage-writer thread
//!     ├── batch buffer (50 rows or 100 ms)
//!     └── SQLite (WAL mode)
//! ```
//!
//! Metering is strictly best-effort: a full queue drops the oldest
//! rows, a failed insert increments a counter, and neither ever fails
//! a request.

pub mod json_scan;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};

use crate::pricing;
use crate::protocol::anthropic::{ContentBlock, MessageContent, MessagesRequest};
use json_scan::JsonScan;

/// Rows per transaction before an early flush.
const BATCH_SIZE: usize = 50;
/// Maximum time a row waits in the batch buffer.
const FLUSH_INTERVAL: Duration = Duration::from_millis(100);
/// Queue bound; beyond this the oldest pending row is dropped.
const QUEUE_CAPACITY: usize = 10_000;

// ─────────────────────────────────────────────────────────────────────────────
// Record
// ─────────────────────────────────────────────────────────────────────────────

/// One metered request.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub request_id: String,
    pub ts: DateTime<Utc>,
    pub model_requested: String,
    pub model_routed: String,
    pub endpoint: String,
    pub tier: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub thinking_tokens: u64,
    pub duration_ms: u64,
    pub stream: bool,
    pub message_count: u32,
    pub has_system: bool,
    pub has_tools: bool,
    pub has_images: bool,
    pub status: String,
    pub error_message: Option<String>,
    pub has_json_content: bool,
    pub json_bytes: u64,
}

impl UsageRecord {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn tokens_per_second(&self) -> f64 {
        if self.duration_ms == 0 {
            return 0.0;
        }
        self.output_tokens as f64 / (self.duration_ms as f64 / 1000.0)
    }

    pub fn estimated_cost_usd(&self) -> f64 {
        pricing::calculate_cost(&self.model_routed, self.input_tokens, self.output_tokens)
    }
}

/// Request-side facts recorded alongside token counts.
#[derive(Debug, Clone, Default)]
pub struct RequestStats {
    pub message_count: u32,
    pub has_system: bool,
    pub has_tools: bool,
    pub has_images: bool,
    pub json: JsonScan,
}

impl RequestStats {
    /// Single pass over a parsed request. Tool traffic counts as JSON
    /// by definition (the arguments are JSON); free text is scanned for
    /// embedded regions.
    pub fn from_request(req: &MessagesRequest) -> Self {
        let mut stats = Self {
            message_count: req.messages.len() as u32,
            has_system: req.system.is_some(),
            has_tools: req.tools.as_ref().is_some_and(|t| !t.is_empty()),
            has_images: false,
            json: JsonScan::default(),
        };

        for msg in &req.messages {
            match &msg.content {
                MessageContent::Text(text) => {
                    stats.json = stats.json.merge(json_scan::scan_text(text));
                }
                MessageContent::Blocks(blocks) => {
                    for block in blocks {
                        match block {
                            ContentBlock::Text { text } => {
                                stats.json = stats.json.merge(json_scan::scan_text(text));
                            }
                            ContentBlock::Image { .. } => stats.has_images = true,
                            ContentBlock::ToolUse { input, .. } => {
                                stats.json.has_json = true;
                                stats.json.json_bytes +=
                                    serde_json::to_string(input).map(|s| s.len()).unwrap_or(0)
                                        as u64;
                            }
                            ContentBlock::ToolResult { content, .. } => {
                                stats.json.has_json = true;
                                if let Some(content) = content {
                                    stats.json.json_bytes += serde_json::to_string(content)
                                        .map(|s| s.len())
                                        .unwrap_or(0)
                                        as u64;
                                }
                            }
                            ContentBlock::Thinking { .. } => {}
                        }
                    }
                }
            }
        }

        stats
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Metrics
// ─────────────────────────────────────────────────────────────────────────────

/// Observability for the metering path itself.
#[derive(Debug, Default)]
pub struct UsageMetrics {
    /// Rows successfully written
    pub rows_stored: AtomicU64,
    /// Rows dropped because the queue was full
    pub rows_dropped: AtomicU64,
    /// Rows that failed to insert
    pub rows_failed: AtomicU64,
    /// Number of batch flushes
    pub flush_count: AtomicU64,
    /// Total flush latency, for averaging
    pub write_latency_us: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub rows_stored: u64,
    pub rows_dropped: u64,
    pub rows_failed: u64,
    pub avg_write_latency_us: u64,
}

impl UsageMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        let flushes = self.flush_count.load(Ordering::Relaxed);
        MetricsSnapshot {
            rows_stored: self.rows_stored.load(Ordering::Relaxed),
            rows_dropped: self.rows_dropped.load(Ordering::Relaxed),
            rows_failed: self.rows_failed.load(Ordering::Relaxed),
            avg_write_latency_us: if flushes > 0 {
                self.write_latency_us.load(Ordering::Relaxed) / flushes
            } else {
                0
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue
// ─────────────────────────────────────────────────────────────────────────────

enum WriterCommand {
    Store(Box<UsageRecord>),
    Shutdown,
}

struct SharedQueue {
    items: Mutex<VecDeque<WriterCommand>>,
    capacity: usize,
    available: Condvar,
}

impl SharedQueue {
    fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity,
            available: Condvar::new(),
        }
    }

    /// Push without blocking; a full queue evicts the oldest pending
    /// row rather than the newest (recent traffic is the interesting
    /// part of an analytics store).
    fn push(&self, command: WriterCommand, metrics: &UsageMetrics) {
        let mut items = self.items.lock().unwrap();
        if items.len() >= self.capacity {
            items.pop_front();
            metrics.rows_dropped.fetch_add(1, Ordering::Relaxed);
        }
        items.push_back(command);
        drop(items);
        self.available.notify_one();
    }

    /// Drain everything currently queued, waiting up to `timeout` when
    /// empty.
    fn drain(&self, timeout: Duration) -> Vec<WriterCommand> {
        let mut items = self.items.lock().unwrap();
        if items.is_empty() {
            let (guard, _) = self.available.wait_timeout(items, timeout).unwrap();
            items = guard;
        }
        items.drain(..).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Meter
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to the metering pipeline. Cloneable and cheap; all clones
/// feed the same writer thread.
#[derive(Clone)]
pub struct UsageMeter {
    queue: Arc<SharedQueue>,
    metrics: Arc<UsageMetrics>,
    writer_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl UsageMeter {
    /// Spawn the writer thread against the given database file.
    pub fn new(db_path: &Path) -> anyhow::Result<Self> {
        Self::with_capacity(db_path, QUEUE_CAPACITY)
    }

    fn with_capacity(db_path: &Path, capacity: usize) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let queue = Arc::new(SharedQueue::new(capacity));
        let metrics = Arc::new(UsageMetrics::default());

        let writer_queue = queue.clone();
        let writer_metrics = metrics.clone();
        let writer_db_path: PathBuf = db_path.to_path_buf();

        let writer_handle = thread::Builder::new()
            .name("usage-writer".into())
            .spawn(move || {
                if let Err(e) = writer_thread(writer_queue, writer_db_path, writer_metrics) {
                    tracing::error!("Usage writer thread error: {}", e);
                }
            })?;

        Ok(Self {
            queue,
            metrics,
            writer_handle: Arc::new(Mutex::new(Some(writer_handle))),
        })
    }

    /// Fire-and-forget: enqueue one record. Never blocks beyond the
    /// queue lock.
    pub fn log(&self, record: UsageRecord) {
        self.queue
            .push(WriterCommand::Store(Box::new(record)), &self.metrics);
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Flush outstanding rows and stop the writer thread.
    pub fn shutdown(&self) {
        self.queue.push(WriterCommand::Shutdown, &self.metrics);
        if let Some(handle) = self.writer_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Writer thread
// ─────────────────────────────────────────────────────────────────────────────

fn writer_thread(
    queue: Arc<SharedQueue>,
    db_path: PathBuf,
    metrics: Arc<UsageMetrics>,
) -> anyhow::Result<()> {
    let conn = Connection::open(&db_path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    init_schema(&conn)?;

    let mut batch: Vec<UsageRecord> = Vec::with_capacity(BATCH_SIZE);
    let mut last_flush = Instant::now();

    loop {
        let commands = queue.drain(FLUSH_INTERVAL);

        let mut shutting_down = false;
        for command in commands {
            match command {
                WriterCommand::Store(record) => batch.push(*record),
                WriterCommand::Shutdown => shutting_down = true,
            }
        }

        if batch.len() >= BATCH_SIZE
            || shutting_down
            || (!batch.is_empty() && last_flush.elapsed() >= FLUSH_INTERVAL)
        {
            flush_batch(&conn, &mut batch, &metrics);
            last_flush = Instant::now();
        }

        if shutting_down {
            tracing::debug!("Usage writer thread shutting down");
            return Ok(());
        }
    }
}

fn flush_batch(conn: &Connection, batch: &mut Vec<UsageRecord>, metrics: &UsageMetrics) {
    if batch.is_empty() {
        return;
    }

    let start = Instant::now();
    let count = batch.len() as u64;
    let mut failed = 0u64;

    if conn.execute("BEGIN TRANSACTION", []).is_err() {
        metrics.rows_failed.fetch_add(count, Ordering::Relaxed);
        batch.clear();
        return;
    }

    for record in batch.drain(..) {
        if let Err(e) = insert_record(conn, &record) {
            tracing::warn!("Failed to store usage row {}: {}", record.request_id, e);
            failed += 1;
        }
    }

    if conn.execute("COMMIT", []).is_err() {
        metrics.rows_failed.fetch_add(count, Ordering::Relaxed);
        return;
    }

    metrics
        .rows_stored
        .fetch_add(count - failed, Ordering::Relaxed);
    metrics.rows_failed.fetch_add(failed, Ordering::Relaxed);
    metrics.flush_count.fetch_add(1, Ordering::Relaxed);
    metrics
        .write_latency_us
        .fetch_add(start.elapsed().as_micros() as u64, Ordering::Relaxed);
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS api_requests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            request_id TEXT NOT NULL,
            ts INTEGER NOT NULL,
            model_requested TEXT NOT NULL,
            model_routed TEXT NOT NULL,
            endpoint TEXT NOT NULL,
            tier TEXT NOT NULL,
            input_tokens INTEGER NOT NULL,
            output_tokens INTEGER NOT NULL,
            thinking_tokens INTEGER NOT NULL,
            total_tokens INTEGER NOT NULL,
            duration_ms INTEGER NOT NULL,
            tokens_per_second REAL NOT NULL,
            estimated_cost_usd REAL NOT NULL,
            stream INTEGER NOT NULL,
            message_count INTEGER NOT NULL,
            has_system INTEGER NOT NULL,
            has_tools INTEGER NOT NULL,
            has_images INTEGER NOT NULL,
            status TEXT NOT NULL,
            error_message TEXT,
            has_json_content INTEGER NOT NULL,
            json_bytes INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_api_requests_ts ON api_requests(ts);
        CREATE INDEX IF NOT EXISTS idx_api_requests_model ON api_requests(model_routed);
        CREATE VIEW IF NOT EXISTS model_usage_summary AS
            SELECT model_routed,
                   COUNT(*) AS request_count,
                   SUM(total_tokens) AS total_tokens,
                   AVG(estimated_cost_usd) AS avg_cost
            FROM api_requests
            GROUP BY model_routed;
        "#,
    )
}

fn insert_record(conn: &Connection, record: &UsageRecord) -> rusqlite::Result<()> {
    conn.execute(
        r#"INSERT INTO api_requests (
            request_id, ts, model_requested, model_routed, endpoint, tier,
            input_tokens, output_tokens, thinking_tokens, total_tokens,
            duration_ms, tokens_per_second, estimated_cost_usd, stream,
            message_count, has_system, has_tools, has_images,
            status, error_message, has_json_content, json_bytes
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22)"#,
        params![
            record.request_id,
            record.ts.timestamp_millis(),
            record.model_requested,
            record.model_routed,
            record.endpoint,
            record.tier,
            record.input_tokens,
            record.output_tokens,
            record.thinking_tokens,
            record.total_tokens(),
            record.duration_ms,
            record.tokens_per_second(),
            record.estimated_cost_usd(),
            record.stream,
            record.message_count,
            record.has_system,
            record.has_tools,
            record.has_images,
            record.status,
            record.error_message,
            record.has_json_content,
            record.json_bytes,
        ],
    )?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Queries (read side)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ModelUsageRow {
    pub model: String,
    pub request_count: u64,
    pub total_tokens: u64,
    pub avg_cost: f64,
}

#[derive(Debug, Clone, Default)]
pub struct UsageSummary {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub thinking_tokens: u64,
    pub cost_usd: f64,
    pub avg_latency_ms: f64,
    pub avg_tokens_per_sec: f64,
}

fn cutoff_millis(window_days: u32) -> i64 {
    (Utc::now() - chrono::Duration::days(window_days as i64)).timestamp_millis()
}

fn open_read_only(db_path: &Path) -> anyhow::Result<Connection> {
    use rusqlite::OpenFlags;
    Ok(Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?)
}

/// Heaviest-use models inside the window.
pub fn top_models(
    db_path: &Path,
    limit: u32,
    window_days: u32,
) -> anyhow::Result<Vec<ModelUsageRow>> {
    let conn = open_read_only(db_path)?;
    let mut stmt = conn.prepare(
        r#"SELECT model_routed, COUNT(*), SUM(total_tokens), AVG(estimated_cost_usd)
           FROM api_requests
           WHERE ts >= ?1
           GROUP BY model_routed
           ORDER BY COUNT(*) DESC
           LIMIT ?2"#,
    )?;

    let rows = stmt.query_map(params![cutoff_millis(window_days), limit], |row| {
        Ok(ModelUsageRow {
            model: row.get(0)?,
            request_count: row.get(1)?,
            total_tokens: row.get::<_, Option<u64>>(2)?.unwrap_or(0),
            avg_cost: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
        })
    })?;

    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Aggregate statistics for the window.
pub fn summary(db_path: &Path, window_days: u32) -> anyhow::Result<UsageSummary> {
    let conn = open_read_only(db_path)?;
    let result = conn.query_row(
        r#"SELECT COUNT(*),
                  SUM(input_tokens), SUM(output_tokens), SUM(thinking_tokens),
                  SUM(estimated_cost_usd), AVG(duration_ms), AVG(tokens_per_second)
           FROM api_requests
           WHERE ts >= ?1"#,
        params![cutoff_millis(window_days)],
        |row| {
            Ok(UsageSummary {
                requests: row.get(0)?,
                input_tokens: row.get::<_, Option<u64>>(1)?.unwrap_or(0),
                output_tokens: row.get::<_, Option<u64>>(2)?.unwrap_or(0),
                thinking_tokens: row.get::<_, Option<u64>>(3)?.unwrap_or(0),
                cost_usd: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                avg_latency_ms: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
                avg_tokens_per_sec: row.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
            })
        },
    )?;
    Ok(result)
}

/// Dump the window's rows as CSV; returns the row count.
pub fn export_csv(db_path: &Path, out_path: &Path, window_days: u32) -> anyhow::Result<usize> {
    use std::io::Write;

    let conn = open_read_only(db_path)?;
    let mut stmt = conn.prepare(
        r#"SELECT request_id, ts, model_requested, model_routed, endpoint, tier,
                  input_tokens, output_tokens, thinking_tokens, total_tokens,
                  duration_ms, tokens_per_second, estimated_cost_usd, stream,
                  message_count, has_system, has_tools, has_images,
                  status, error_message, has_json_content, json_bytes
           FROM api_requests WHERE ts >= ?1 ORDER BY ts"#,
    )?;

    let mut file = std::fs::File::create(out_path)?;
    writeln!(
        file,
        "request_id,ts,model_requested,model_routed,endpoint,tier,\
         input_tokens,output_tokens,thinking_tokens,total_tokens,\
         duration_ms,tokens_per_second,estimated_cost_usd,stream,\
         message_count,has_system,has_tools,has_images,\
         status,error_message,has_json_content,json_bytes"
    )?;

    let mut count = 0usize;
    let mut rows = stmt.query(params![cutoff_millis(window_days)])?;
    while let Some(row) = rows.next()? {
        let ts_millis: i64 = row.get(1)?;
        let ts = Utc
            .timestamp_millis_opt(ts_millis)
            .single()
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        writeln!(
            file,
            "{},{},{},{},{},{},{},{},{},{},{},{:.3},{:.6},{},{},{},{},{},{},{},{},{}",
            csv_field(&row.get::<_, String>(0)?),
            ts,
            csv_field(&row.get::<_, String>(2)?),
            csv_field(&row.get::<_, String>(3)?),
            csv_field(&row.get::<_, String>(4)?),
            row.get::<_, String>(5)?,
            row.get::<_, u64>(6)?,
            row.get::<_, u64>(7)?,
            row.get::<_, u64>(8)?,
            row.get::<_, u64>(9)?,
            row.get::<_, u64>(10)?,
            row.get::<_, f64>(11)?,
            row.get::<_, f64>(12)?,
            row.get::<_, bool>(13)?,
            row.get::<_, u64>(14)?,
            row.get::<_, bool>(15)?,
            row.get::<_, bool>(16)?,
            row.get::<_, bool>(17)?,
            row.get::<_, String>(18)?,
            csv_field(&row.get::<_, Option<String>>(19)?.unwrap_or_default()),
            row.get::<_, bool>(20)?,
            row.get::<_, u64>(21)?,
        )?;
        count += 1;
    }

    Ok(count)
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// TOON-conversion recommendation over the last 20 requests: more than
/// 30% carry JSON, the JSON-carrying ones average over 500 bytes, and
/// the window totals more than 10 KB of JSON.
pub fn json_recommendation(db_path: &Path) -> anyhow::Result<bool> {
    let conn = open_read_only(db_path)?;
    let mut stmt = conn.prepare(
        "SELECT has_json_content, json_bytes FROM api_requests ORDER BY id DESC LIMIT 20",
    )?;

    let rows: Vec<(bool, u64)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    if rows.is_empty() {
        return Ok(false);
    }

    let json_count = rows.iter().filter(|(has, _)| *has).count();
    let total_json: u64 = rows.iter().map(|(_, bytes)| bytes).sum();

    let ratio = json_count as f64 / rows.len() as f64;
    let avg_size = if json_count > 0 {
        total_json as f64 / json_count as f64
    } else {
        0.0
    };

    Ok(ratio > 0.3 && avg_size > 500.0 && total_json > 10 * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "crosswire-usage-test-{}-{}.db",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        path
    }

    fn record(model: &str, json_bytes: u64) -> UsageRecord {
        UsageRecord {
            request_id: "req_1".to_string(),
            ts: Utc::now(),
            model_requested: "claude-opus-4".to_string(),
            model_routed: model.to_string(),
            endpoint: "https://api.openai.com/v1".to_string(),
            tier: "big".to_string(),
            input_tokens: 100,
            output_tokens: 50,
            thinking_tokens: 10,
            duration_ms: 2000,
            stream: false,
            message_count: 2,
            has_system: true,
            has_tools: false,
            has_images: false,
            status: "ok".to_string(),
            error_message: None,
            has_json_content: json_bytes > 0,
            json_bytes,
        }
    }

    #[test]
    fn test_meter_writes_and_summary_reads() {
        let db = temp_db("summary");
        let meter = UsageMeter::new(&db).unwrap();

        for _ in 0..3 {
            meter.log(record("openai/gpt-5", 0));
        }
        meter.shutdown();

        let summary = summary(&db, 7).unwrap();
        assert_eq!(summary.requests, 3);
        assert_eq!(summary.input_tokens, 300);
        assert_eq!(summary.output_tokens, 150);
        assert!(summary.cost_usd > 0.0);
        assert!((summary.avg_latency_ms - 2000.0).abs() < 1e-6);

        let metrics = meter.metrics();
        assert_eq!(metrics.rows_stored, 3);
        assert_eq!(metrics.rows_dropped, 0);

        let _ = std::fs::remove_file(&db);
    }

    #[test]
    fn test_top_models_ordering() {
        let db = temp_db("top");
        let meter = UsageMeter::new(&db).unwrap();

        for _ in 0..5 {
            meter.log(record("openai/gpt-5", 0));
        }
        meter.log(record("openai/gpt-5-mini", 0));
        meter.shutdown();

        let top = top_models(&db, 10, 7).unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].model, "openai/gpt-5");
        assert_eq!(top[0].request_count, 5);
        assert_eq!(top[0].total_tokens, 5 * 150);

        let _ = std::fs::remove_file(&db);
    }

    #[test]
    fn test_queue_drops_oldest_on_overflow() {
        let db = temp_db("overflow");
        // Tiny capacity, and hold the writer back by flooding faster
        // than a single drain cycle. Capacity 2: the third push evicts
        // the oldest entry.
        let queue = SharedQueue::new(2);
        let metrics = UsageMetrics::default();

        queue.push(WriterCommand::Store(Box::new(record("a", 0))), &metrics);
        queue.push(WriterCommand::Store(Box::new(record("b", 0))), &metrics);
        queue.push(WriterCommand::Store(Box::new(record("c", 0))), &metrics);

        assert_eq!(metrics.rows_dropped.load(Ordering::Relaxed), 1);
        let drained = queue.drain(Duration::from_millis(1));
        assert_eq!(drained.len(), 2);

        let _ = std::fs::remove_file(&db);
    }

    #[test]
    fn test_export_csv_roundtrip() {
        let db = temp_db("csv");
        let meter = UsageMeter::new(&db).unwrap();
        let mut with_comma = record("openai/gpt-5", 0);
        with_comma.error_message = Some("bad, very bad".to_string());
        with_comma.status = "error".to_string();
        meter.log(with_comma);
        meter.shutdown();

        let out = std::env::temp_dir().join(format!("crosswire-csv-{}.csv", std::process::id()));
        let count = export_csv(&db, &out, 7).unwrap();
        assert_eq!(count, 1);

        let content = std::fs::read_to_string(&out).unwrap();
        assert!(content.lines().count() >= 2);
        assert!(content.contains("\"bad, very bad\""));

        let _ = std::fs::remove_file(&db);
        let _ = std::fs::remove_file(&out);
    }

    #[test]
    fn test_json_recommendation_predicate() {
        let db = temp_db("toon");
        let meter = UsageMeter::new(&db).unwrap();
        // 20 requests, half carrying ~1.5KB of JSON each:
        // ratio 0.5 > 0.3, avg 1500 > 500, total 15KB > 10KB
        for i in 0..20 {
            meter.log(record("m", if i % 2 == 0 { 1500 } else { 0 }));
        }
        meter.shutdown();
        assert!(json_recommendation(&db).unwrap());

        let _ = std::fs::remove_file(&db);
    }

    #[test]
    fn test_json_recommendation_negative() {
        let db = temp_db("toon-neg");
        let meter = UsageMeter::new(&db).unwrap();
        for _ in 0..20 {
            meter.log(record("m", 50));
        }
        meter.shutdown();
        // every request has JSON but sizes are tiny
        assert!(!json_recommendation(&db).unwrap());

        let _ = std::fs::remove_file(&db);
    }

    #[test]
    fn test_request_stats_flags() {
        let req: MessagesRequest = serde_json::from_value(serde_json::json!({
            "model": "claude-opus-4",
            "max_tokens": 100,
            "system": "sys",
            "tools": [{"name": "f", "input_schema": {"type": "object"}}],
            "messages": [
                {"role": "user", "content": [
                    {"type": "text", "text": "look"},
                    {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AA"}}
                ]},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "t1", "name": "f", "input": {"key": "value"}}
                ]}
            ]
        }))
        .unwrap();

        let stats = RequestStats::from_request(&req);
        assert_eq!(stats.message_count, 2);
        assert!(stats.has_system);
        assert!(stats.has_tools);
        assert!(stats.has_images);
        assert!(stats.json.has_json);
        assert!(stats.json.json_bytes > 0);
    }

    #[test]
    fn test_tokens_per_second() {
        let r = record("m", 0);
        // 50 output tokens over 2 seconds
        assert!((r.tokens_per_second() - 25.0).abs() < 1e-9);
    }
}
