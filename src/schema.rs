//! Schema discovery and validation.
//!
//! Given an open connection, produce a [`Schema`] whose physical tables all
//! exist, all carry the mandatory `s_time` column, and whose metadata
//! matches the physical layout. Blocks (with cancellation checks) until the
//! journal store is self-consistent or the caller cancels.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rusqlite::Connection;

use crate::model::{ColumnInfo, Schema, TableInfo};
use crate::util::quote_ident;

const OBJECT_INFO_WAIT: Duration = Duration::from_millis(500);
const VALIDATION_WAIT: Duration = Duration::from_millis(1000);

/// Cooperative cancellation handle, checked at every wait point in the
/// discovery loop.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `dur`, waking early (and reporting so via the return
    /// value) if cancellation fires while asleep.
    pub(crate) fn sleep_cancellable(&self, dur: Duration) -> bool {
        const STEP: Duration = Duration::from_millis(50);
        let mut remaining = dur;
        while remaining > Duration::ZERO {
            if self.is_cancelled() {
                return true;
            }
            let step = remaining.min(STEP);
            thread::sleep(step);
            remaining = remaining.saturating_sub(step);
        }
        self.is_cancelled()
    }
}

/// Block until the journal store exposes a self-consistent schema, or
/// until `cancel` fires (in which case `None` is returned).
///
/// This is deliberately unbounded: a permanently empty or malformed store
/// blocks forever, because the writer may simply not have started yet.
/// `cancel` is the only escape.
pub fn discover(
    conn: &Connection,
    expected_column_counts: &HashMap<String, usize>,
    cancel: &CancelToken,
) -> Option<Schema> {
    loop {
        if cancel.is_cancelled() {
            return None;
        }

        if !object_info_present(conn) {
            tracing::debug!("Object_Info not yet present, waiting");
            if cancel.sleep_cancellable(OBJECT_INFO_WAIT) {
                return None;
            }
            continue;
        }

        let schema = match load_provisional_schema(conn) {
            Ok(schema) => schema,
            Err(e) => {
                tracing::debug!("Transient error reading schema metadata: {}", e);
                if cancel.sleep_cancellable(VALIDATION_WAIT) {
                    return None;
                }
                continue;
            }
        };

        match validate(conn, &schema, expected_column_counts) {
            Ok(true) => return Some(schema),
            Ok(false) => {
                tracing::debug!("Schema not yet self-consistent, retrying");
            }
            Err(e) => {
                tracing::debug!("Transient error validating schema: {}", e);
            }
        }

        if cancel.sleep_cancellable(VALIDATION_WAIT) {
            return None;
        }
    }
}

fn object_info_present(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='Object_Info'",
        [],
        |row| row.get::<_, bool>(0),
    )
    .unwrap_or(false)
}

fn load_provisional_schema(conn: &Connection) -> rusqlite::Result<Schema> {
    let mut schema = Schema::new();

    let mut object_stmt = conn.prepare("SELECT object_name, table_name FROM Object_Info")?;
    let tables = object_stmt.query_map([], |row| {
        let object_name: String = row.get(0)?;
        let table_name: String = row.get(1)?;
        Ok((object_name, table_name))
    })?;
    for entry in tables {
        let (object_name, table_name) = entry?;
        schema.insert_table(TableInfo::new(table_name, object_name));
    }

    let mut column_stmt = conn
        .prepare("SELECT table_name, column_name, attribute_name, data_type FROM Column_Info")?;
    let columns = column_stmt.query_map([], |row| {
        let table_name: String = row.get(0)?;
        let column_name: String = row.get(1)?;
        let attribute_name: String = row.get(2)?;
        let data_type: String = row.get(3)?;
        Ok((table_name, column_name, attribute_name, data_type))
    })?;
    for entry in columns {
        let (table_name, column_name, attribute_name, data_type) = entry?;
        // Column entries whose table_name is absent from Object_Info are
        // dropped here; the live worker never synthesizes a fallback table
        // for them (that's the history-path's job, see synthesize_from_columns).
        if let Some(table) = schema.table_by_physical_mut(&table_name) {
            table.add_column(ColumnInfo {
                physical_name: column_name,
                attribute_name,
                data_type,
            });
        }
    }

    Ok(schema)
}

/// Check every table's live column list against its metadata. Returns
/// `Ok(true)` only if every table passes.
fn validate(
    conn: &Connection,
    schema: &Schema,
    expected_column_counts: &HashMap<String, usize>,
) -> rusqlite::Result<bool> {
    if schema.is_empty() {
        return Ok(false);
    }

    for table in schema.tables() {
        let live_columns = live_column_names(conn, &table.physical_name)?;
        if live_columns.is_empty() {
            return Ok(false); // table not created yet
        }
        if !live_columns.iter().any(|c| c.eq_ignore_ascii_case("s_time")) {
            return Ok(false);
        }

        let metadata_count = table.columns_by_physical.len();
        let live_count = live_columns.len();

        let ok = match expected_column_counts.get(&table.logical_object_name) {
            Some(&expected) => live_count == expected && metadata_count == expected - 1,
            None => live_count == metadata_count + 1,
        };
        if !ok {
            return Ok(false);
        }
    }

    Ok(true)
}

fn live_column_names(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let sql = format!("PRAGMA table_info({})", quote_ident(table));
    let mut stmt = conn.prepare(&sql)?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    names.collect()
}

/// History-path fallback: synthesize a schema entry for a physical table
/// that appears only in `Column_Info` (no matching `Object_Info` row),
/// using the physical name as its own logical name.
///
/// Per spec.md §9, this is used by the post-analysis / history loader
/// only. `discover` (the live worker's path) never calls this.
#[allow(dead_code)]
pub fn synthesize_from_columns(conn: &Connection) -> rusqlite::Result<Schema> {
    let mut schema = load_provisional_schema(conn)?;

    let mut stmt = conn.prepare("SELECT DISTINCT table_name FROM Column_Info")?;
    let orphan_tables: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<_>>()?;

    for table_name in orphan_tables {
        if schema.table_by_physical(&table_name).is_some() {
            continue;
        }
        let mut table = TableInfo::new(table_name.clone(), table_name.clone());
        let mut col_stmt = conn.prepare(
            "SELECT column_name, attribute_name, data_type FROM Column_Info WHERE table_name = ?1",
        )?;
        let cols = col_stmt.query_map([&table_name], |row| {
            Ok(ColumnInfo {
                physical_name: row.get(0)?,
                attribute_name: row.get(1)?,
                data_type: row.get(2)?,
            })
        })?;
        for col in cols {
            table.add_column(col?);
        }
        schema.insert_table(table);
    }

    Ok(schema)
}
