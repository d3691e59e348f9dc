//! The data session worker: the heart of the ingestion pipeline.
//!
//! Owns a journal connection, a bounded time-hint buffer, per-table read
//! cursors, and a dedicated worker thread that drives polling and
//! publication. Grounded on the teacher's `pipeline::lifestats::LifestatsProcessor`
//! (dedicated writer thread, bounded `sync_channel`, `CompletionSignal`-gated
//! shutdown).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rusqlite::{params, types::ValueRef, Connection};

use crate::model::{Chunk, Frame, SessionId, Value};
use crate::pipeline::CompletionSignal;
use crate::repository::FrameRepository;
use crate::schema::{self, CancelToken};
use crate::util::{quote_ident, round1, time_key};

const TIME_BUFFER_CAPACITY: usize = 1000;
const YIELD_EVERY: u32 = 50;
const YIELD_SLEEP: Duration = Duration::from_millis(10);
const QUERY_MARGIN: f64 = 1e-6;
const RECV_POLL: Duration = Duration::from_millis(50);
/// Sentinel meaning "nothing read yet" for a per-table cursor. `s_time` is
/// a non-negative simulation clock, so this is strictly less than any
/// legal value (see DESIGN.md's Open Question decision).
const CURSOR_SENTINEL: f64 = -1.0;

/// State machine the worker thread progresses through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    ConnectWait,
    SchemaWait,
    Processing,
    DrainTail,
    Finalizing,
    Disposed,
}

type CompleteCallback = Box<dyn FnOnce() + Send>;
type ChunkSubscriber = Box<dyn Fn(&Chunk) + Send + Sync>;

/// The session's public handle. Cloning is not supported; all mutation
/// goes through interior `Arc`-shared state so both the handle and the
/// worker thread can touch it.
pub struct DataSession {
    tx: SyncSender<f64>,
    closed: Arc<std::sync::atomic::AtomicBool>,
    cancel: CancelToken,
    completion_callback: Arc<Mutex<Option<CompleteCallback>>>,
    on_chunk_processed: Arc<RwLock<Vec<ChunkSubscriber>>>,
    state: Arc<Mutex<WorkerState>>,
    disposed: Arc<CompletionSignal>,
    session_id: SessionId,
    _handle: Option<JoinHandle<()>>,
}

impl DataSession {
    /// Launch a new session worker thread for `session_id` against
    /// `db_path`. Returns immediately; the worker begins in `Starting`.
    pub fn spawn(
        db_path: PathBuf,
        query_interval: f64,
        expected_column_counts: HashMap<String, usize>,
        repository: Arc<FrameRepository>,
        session_id: SessionId,
    ) -> Self {
        let (tx, rx) = mpsc::sync_channel::<f64>(TIME_BUFFER_CAPACITY);
        let closed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let cancel = CancelToken::new();
        let completion_callback: Arc<Mutex<Option<CompleteCallback>>> = Arc::new(Mutex::new(None));
        let on_chunk_processed: Arc<RwLock<Vec<ChunkSubscriber>>> = Arc::new(RwLock::new(Vec::new()));
        let state = Arc::new(Mutex::new(WorkerState::Starting));
        let disposed = Arc::new(CompletionSignal::new());

        let worker_closed = closed.clone();
        let worker_cancel = cancel.clone();
        let worker_completion_callback = completion_callback.clone();
        let worker_on_chunk_processed = on_chunk_processed.clone();
        let worker_state = state.clone();
        let worker_disposed = disposed.clone();

        let handle = thread::Builder::new()
            .name(format!("data-session-{session_id}"))
            .spawn(move || {
                run_worker(WorkerCtx {
                    db_path,
                    query_interval,
                    expected_column_counts,
                    repository,
                    session_id,
                    rx,
                    closed: worker_closed,
                    cancel: worker_cancel,
                    completion_callback: worker_completion_callback,
                    on_chunk_processed: worker_on_chunk_processed,
                    state: worker_state,
                    disposed: worker_disposed,
                });
            })
            .expect("failed to spawn data session worker thread");

        Self {
            tx,
            closed,
            cancel,
            completion_callback,
            on_chunk_processed,
            state,
            disposed,
            session_id,
            _handle: Some(handle),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap()
    }

    /// Non-blocking offer of a simulation-time hint. If the buffer is
    /// closed (via `mark_complete` or `stop`) or full, the value is
    /// silently dropped.
    pub fn enqueue(&self, t: f64) {
        if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        let _ = self.tx.try_send(t);
    }

    /// Install an optional completion callback and close the buffer for
    /// further input. The worker continues draining; when it exits
    /// cleanly (not via `stop`), the callback runs exactly once.
    pub fn mark_complete(&self, callback: impl FnOnce() + Send + 'static) {
        *self.completion_callback.lock().unwrap() = Some(Box::new(callback));
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Force termination. Clears the completion callback, closes the
    /// buffer, and signals cancellation. Does not wait.
    ///
    /// The callback is cleared *before* cancellation is signalled so the
    /// worker's finalizing step observes "no callback" under
    /// happens-before, guaranteeing a forced stop never lets a pending
    /// completion callback run.
    pub fn stop(&self) {
        *self.completion_callback.lock().unwrap() = None;
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        self.cancel.cancel();
    }

    /// Subscribe to "chunk processed" notifications. Used by tests to
    /// observe publication without polling the repository.
    pub fn on_chunk_processed(&self, f: impl Fn(&Chunk) + Send + Sync + 'static) {
        self.on_chunk_processed.write().unwrap().push(Box::new(f));
    }

    /// Block until the worker has fully released its resources
    /// (`Disposed`), or until `timeout` elapses. Test-only convenience;
    /// the production contract never requires callers to wait.
    pub fn wait_disposed(&self, timeout: Duration) -> bool {
        self.disposed.wait(timeout)
    }
}

struct WorkerCtx {
    db_path: PathBuf,
    query_interval: f64,
    expected_column_counts: HashMap<String, usize>,
    repository: Arc<FrameRepository>,
    session_id: SessionId,
    rx: mpsc::Receiver<f64>,
    closed: Arc<std::sync::atomic::AtomicBool>,
    cancel: CancelToken,
    completion_callback: Arc<Mutex<Option<CompleteCallback>>>,
    on_chunk_processed: Arc<RwLock<Vec<ChunkSubscriber>>>,
    state: Arc<Mutex<WorkerState>>,
    disposed: Arc<CompletionSignal>,
}

fn set_state(ctx: &WorkerCtx, state: WorkerState) {
    *ctx.state.lock().unwrap() = state;
    tracing::debug!(session = %ctx.session_id, ?state, "data session state transition");
}

fn run_worker(ctx: WorkerCtx) {
    set_state(&ctx, WorkerState::ConnectWait);

    let conn = match connect_with_retry(&ctx.db_path, &ctx.cancel) {
        Some(conn) => conn,
        None => {
            finalize(&ctx, None);
            return;
        }
    };

    set_state(&ctx, WorkerState::SchemaWait);
    let schema = match schema::discover(&conn, &ctx.expected_column_counts, &ctx.cancel) {
        Some(schema) => schema,
        None => {
            finalize(&ctx, Some(&conn));
            return;
        }
    };
    ctx.repository.install_schema(schema.clone(), ctx.session_id);

    set_state(&ctx, WorkerState::Processing);
    let mut cursors: HashMap<String, f64> = schema
        .tables()
        .map(|t| (t.physical_name.clone(), CURSOR_SENTINEL))
        .collect();
    let mut next_checkpoint = round1(ctx.query_interval);
    let mut last_seen_time: Option<f64> = None;
    let mut iterations: u32 = 0u32;
    let mut cancelled_mid_processing = false;

    loop {
        if ctx.cancel.is_cancelled() {
            cancelled_mid_processing = true;
            break;
        }

        match ctx.rx.recv_timeout(RECV_POLL) {
            Ok(t) => {
                last_seen_time = Some(last_seen_time.map_or(t, |prev: f64| prev.max(t)));

                if t >= next_checkpoint {
                    process_range(
                        &conn,
                        &schema,
                        &mut cursors,
                        next_checkpoint,
                        Some(next_checkpoint),
                        &ctx,
                    );

                    let gap = t - next_checkpoint;
                    if gap > ctx.query_interval {
                        process_range(&conn, &schema, &mut cursors, t + QUERY_MARGIN, Some(t), &ctx);
                        let intervals = (gap / ctx.query_interval).floor() + 1.0;
                        next_checkpoint = round1(next_checkpoint + intervals * ctx.query_interval);
                    } else {
                        next_checkpoint = round1(next_checkpoint + ctx.query_interval);
                    }
                }

                iterations += 1;
                if iterations.is_multiple_of(YIELD_EVERY) && ctx.cancel.sleep_cancellable(YIELD_SLEEP) {
                    cancelled_mid_processing = true;
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if ctx.closed.load(std::sync::atomic::Ordering::SeqCst) {
                    // No more input may arrive; make sure the channel is
                    // truly drained before declaring the tail reached.
                    match ctx.rx.try_recv() {
                        Ok(t) => {
                            last_seen_time = Some(last_seen_time.map_or(t, |prev: f64| prev.max(t)));
                            // Re-run the same checkpoint bookkeeping as above
                            // for this last straggling hint.
                            if t >= next_checkpoint {
                                process_range(
                                    &conn,
                                    &schema,
                                    &mut cursors,
                                    next_checkpoint,
                                    Some(next_checkpoint),
                                    &ctx,
                                );
                                let gap = t - next_checkpoint;
                                if gap > ctx.query_interval {
                                    process_range(
                                        &conn,
                                        &schema,
                                        &mut cursors,
                                        t + QUERY_MARGIN,
                                        Some(t),
                                        &ctx,
                                    );
                                    let intervals = (gap / ctx.query_interval).floor() + 1.0;
                                    next_checkpoint =
                                        round1(next_checkpoint + intervals * ctx.query_interval);
                                } else {
                                    next_checkpoint = round1(next_checkpoint + ctx.query_interval);
                                }
                            }
                        }
                        Err(_) => break, // closed and empty: reached the tail
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if cancelled_mid_processing {
        finalize(&ctx, Some(&conn));
        return;
    }

    set_state(&ctx, WorkerState::DrainTail);
    if let Some(end) = last_seen_time {
        process_range(&conn, &schema, &mut cursors, end, None, &ctx);
    }

    finalize(&ctx, Some(&conn));
}

fn connect_with_retry(db_path: &PathBuf, cancel: &CancelToken) -> Option<Connection> {
    loop {
        if cancel.is_cancelled() {
            return None;
        }
        match Connection::open(db_path) {
            Ok(conn) => {
                if conn.execute_batch("PRAGMA journal_mode=WAL;").is_ok() {
                    return Some(conn);
                }
            }
            Err(e) => {
                tracing::debug!("Cannot open journal store yet: {}", e);
            }
        }
        if cancel.sleep_cancellable(Duration::from_millis(500)) {
            return None;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn process_range(
    conn: &Connection,
    schema: &crate::model::Schema,
    cursors: &mut HashMap<String, f64>,
    end: f64,
    forced: Option<f64>,
    ctx: &WorkerCtx,
) {
    let mut chunk: Chunk = Chunk::new();

    for table in schema.tables() {
        let cursor = *cursors.get(&table.physical_name).unwrap_or(&CURSOR_SENTINEL);
        if cursor >= end {
            continue;
        }

        match read_table_range(conn, table, cursor, end) {
            Ok(rows) => {
                let mut max_seen = cursor;
                for (s_time, columns) in rows {
                    if s_time > max_seen {
                        max_seen = s_time;
                    }
                    let key = time_key(round1(s_time));
                    let frame = chunk.entry(key).or_insert_with(|| Frame::new(round1(s_time)));
                    let row = frame.table_or_insert(&table.logical_object_name);
                    for (col, value) in columns {
                        if col.eq_ignore_ascii_case("s_time") || value.is_null() {
                            continue;
                        }
                        if let Some(attribute) = table.attribute_for_physical(&col) {
                            row.set(attribute, value);
                        }
                    }
                }
                if max_seen > cursor {
                    cursors.insert(table.physical_name.clone(), max_seen);
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Query error on table '{}', skipping for this pass: {}",
                    table.physical_name,
                    e
                );
            }
        }
    }

    if let Some(t) = forced {
        let key = time_key(round1(t));
        chunk.entry(key).or_insert_with(|| Frame::new(round1(t)));
    }

    if chunk.is_empty() {
        return;
    }

    ctx.repository.store_chunk(chunk.clone(), ctx.session_id);
    for subscriber in ctx.on_chunk_processed.read().unwrap().iter() {
        subscriber(&chunk);
    }
}

/// One row read from a table: its simulation time and (column, value) pairs.
type TableRowRead = (f64, Vec<(String, Value)>);

fn read_table_range(
    conn: &Connection,
    table: &crate::model::TableInfo,
    cursor: f64,
    end: f64,
) -> rusqlite::Result<Vec<TableRowRead>> {
    let sql = format!(
        "SELECT * FROM {} WHERE s_time > ?1 AND s_time <= ?2",
        quote_ident(&table.physical_name)
    );
    let mut stmt = conn.prepare(&sql)?;
    let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let s_time_idx = column_names.iter().position(|c| c.eq_ignore_ascii_case("s_time"));

    let rows = stmt.query_map(params![cursor, end], move |row| {
        let mut s_time = 0.0_f64;
        let mut columns = Vec::with_capacity(column_names.len());
        for (i, name) in column_names.iter().enumerate() {
            let value = sqlite_value_to_value(row.get_ref(i)?);
            if Some(i) == s_time_idx {
                s_time = match &value {
                    Value::Number(n) => *n,
                    Value::Integer(n) => *n as f64,
                    _ => 0.0,
                };
            }
            columns.push((name.clone(), value));
        }
        Ok((s_time, columns))
    })?;

    rows.collect()
}

fn sqlite_value_to_value(value_ref: ValueRef<'_>) -> Value {
    match value_ref {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Number(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        // Blobs have no place in this domain's column set; treat as null
        // (a swallowed per-row conversion, per spec.md §4.2.4).
        ValueRef::Blob(_) => Value::Null,
    }
}

fn finalize(ctx: &WorkerCtx, conn: Option<&Connection>) {
    set_state(ctx, WorkerState::Finalizing);

    if let Some(callback) = ctx.completion_callback.lock().unwrap().take() {
        callback();
    }

    if let Some(conn) = conn {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);");
        let db_path = conn.path().map(PathBuf::from);
        drop_connection_and_cleanup(db_path);
    }

    set_state(ctx, WorkerState::Disposed);
    ctx.disposed.complete();
}

fn drop_connection_and_cleanup(db_path: Option<PathBuf>) {
    if let Some(path) = db_path {
        for suffix in ["-wal", "-shm"] {
            let sibling = append_suffix(&path, suffix);
            let _ = std::fs::remove_file(sibling);
        }
    }
}

fn append_suffix(path: &std::path::Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}
