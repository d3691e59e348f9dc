//! Core value types: session identifiers, schema, frames, dynamically-typed
//! column values.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque session identifier, stamped on every chunk published during one
/// start-to-stop lifecycle of the pipeline. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Mint a fresh, never-before-seen session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A dynamically-typed scalar column value, as produced by the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Number(f64),
    Text(String),
    Boolean(bool),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// A column of a physical table, mapping the journal's physical name to
/// its logical attribute name and declared type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub physical_name: String,
    pub attribute_name: String,
    pub data_type: String,
}

/// One physical table as described by the journal's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub physical_name: String,
    pub logical_object_name: String,
    pub columns_by_physical: HashMap<String, ColumnInfo>,
    pub columns_by_attribute: HashMap<String, ColumnInfo>,
}

impl TableInfo {
    pub fn new(physical_name: impl Into<String>, logical_object_name: impl Into<String>) -> Self {
        Self {
            physical_name: physical_name.into(),
            logical_object_name: logical_object_name.into(),
            columns_by_physical: HashMap::new(),
            columns_by_attribute: HashMap::new(),
        }
    }

    /// Attach a column, indexing it under both its physical and attribute
    /// names (case-insensitively).
    pub fn add_column(&mut self, column: ColumnInfo) {
        self.columns_by_physical
            .insert(column.physical_name.to_ascii_lowercase(), column.clone());
        self.columns_by_attribute
            .insert(column.attribute_name.to_ascii_lowercase(), column);
    }

    /// Translate a physical column name to its logical attribute name, if
    /// the schema knows about it.
    pub fn attribute_for_physical(&self, physical: &str) -> Option<&str> {
        self.columns_by_physical
            .get(&physical.to_ascii_lowercase())
            .map(|c| c.attribute_name.as_str())
    }
}

/// In-memory description of the journal's tables, indexed two ways.
/// Both indices are case-insensitive; a physical name is unique across the
/// schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    by_physical: HashMap<String, TableInfo>,
    by_logical: HashMap<String, String>, // logical (lowercased) -> physical key (lowercased)
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a table entry, keyed case-insensitively by physical name.
    /// A second call with a physical name differing only by case from one
    /// already present overwrites that entry — schema discovery's own
    /// retry loop is what keeps this from being observed against a
    /// malformed journal; `insert_table` itself trusts the caller.
    pub fn insert_table(&mut self, table: TableInfo) {
        let phys_key = table.physical_name.to_ascii_lowercase();
        let logical_key = table.logical_object_name.to_ascii_lowercase();
        self.by_logical.insert(logical_key, phys_key.clone());
        self.by_physical.insert(phys_key, table);
    }

    pub fn table_by_physical(&self, physical: &str) -> Option<&TableInfo> {
        self.by_physical.get(&physical.to_ascii_lowercase())
    }

    pub fn table_by_logical(&self, logical: &str) -> Option<&TableInfo> {
        self.by_logical
            .get(&logical.to_ascii_lowercase())
            .and_then(|phys| self.by_physical.get(phys))
    }

    pub fn table_by_physical_mut(&mut self, physical: &str) -> Option<&mut TableInfo> {
        self.by_physical.get_mut(&physical.to_ascii_lowercase())
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableInfo> {
        self.by_physical.values()
    }

    pub fn is_empty(&self) -> bool {
        self.by_physical.is_empty()
    }
}

/// The merged state of one table at one simulation time.
///
/// Column lookup is case-insensitive. The column count and logical name
/// are never mutated after the row is published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub logical_object_name: String,
    pub columns: HashMap<String, Value>,
}

impl TableRow {
    pub fn new(logical_object_name: impl Into<String>) -> Self {
        Self {
            logical_object_name: logical_object_name.into(),
            columns: HashMap::new(),
        }
    }

    pub fn set(&mut self, attribute: &str, value: Value) {
        self.columns.insert(attribute.to_ascii_lowercase(), value);
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.columns.get(&attribute.to_ascii_lowercase())
    }

    /// Merge another row's columns into this one, later values overriding
    /// earlier ones.
    pub fn merge_from(&mut self, other: &TableRow) {
        for (k, v) in &other.columns {
            self.columns.insert(k.clone(), v.clone());
        }
    }
}

/// The merged state at one simulation time, keyed by logical object name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub time: f64,
    pub tables: HashMap<String, TableRow>,
}

impl Frame {
    pub fn new(time: f64) -> Self {
        Self {
            time,
            tables: HashMap::new(),
        }
    }

    /// Union another frame's tables into this one. Collisions (same
    /// logical object) merge column sets, later values overriding earlier
    /// ones.
    pub fn merge_from(&mut self, other: &Frame) {
        for (logical, row) in &other.tables {
            self.tables
                .entry(logical.clone())
                .and_modify(|existing| existing.merge_from(row))
                .or_insert_with(|| row.clone());
        }
    }

    pub fn table_or_insert(&mut self, logical_object_name: &str) -> &mut TableRow {
        self.tables
            .entry(logical_object_name.to_string())
            .or_insert_with(|| TableRow::new(logical_object_name))
    }
}

/// A map from simulation time (as an exact [`crate::util::time_key`]) to
/// frame, produced by one range read.
pub type Chunk = HashMap<i64, Frame>;
