//! Typed view of the host application's table.
//!
//! The core never needs the table schema, only column lookups, so rows are
//! plain maps from column name to a tagged cell value.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::ObjectKind;

/// A single table cell.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(s) => s.is_empty(),
            Self::Bool(_) | Self::Number(_) => false,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

pub type Row = HashMap<String, CellValue>;

/// Text of `column` in `row`; missing columns read as empty.
pub fn cell_text(row: &Row, column: &str) -> String {
    row.get(column).map(ToString::to_string).unwrap_or_default()
}

/// Read-only snapshot of the loaded table and its active grouping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub rows: Vec<Row>,
    /// Columns the grid currently groups rows by, outermost first.
    #[serde(default)]
    pub group_by: Vec<String>,
}

impl Dataset {
    /// Rows equal to `anchor` on every one of `columns`.
    pub fn siblings<'a>(
        &'a self,
        anchor: &'a Row,
        columns: &'a [String],
    ) -> impl Iterator<Item = &'a Row> + 'a {
        self.rows.iter().filter(move |row| {
            columns
                .iter()
                .all(|column| row.get(column) == anchor.get(column))
        })
    }
}

/// Accessor for the table the host application currently shows.
pub trait DatasetSource: Send + Sync {
    fn snapshot(&self) -> Dataset;
}

impl DatasetSource for parking_lot::RwLock<Dataset> {
    fn snapshot(&self) -> Dataset {
        self.read().clone()
    }
}

/// A user's cross-probe request from the grid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionEvent {
    /// Selected rows; the first one is the anchor.
    pub rows: Vec<Row>,
    pub object_kind: Option<ObjectKind>,
    /// Column holding the object names.
    #[serde(default)]
    pub column: String,
    #[serde(default)]
    pub group_by_columns: Vec<String>,
}
