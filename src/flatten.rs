//! Row Flattening
//!
//! Turns an engine-native result set of unknown shape into uniform,
//! string-keyed rows. Engines describe the result (column names), scan every
//! cell into a generic [`Cell`] slot, and this module renders each slot to
//! text with one rule shared by all engines:
//!
//! | Cell            | Text                                        |
//! |-----------------|---------------------------------------------|
//! | `Null`          | [`NULL_TEXT`]                               |
//! | `Int` / `UInt`  | decimal                                     |
//! | `Float`         | shortest round-trip decimal (`NaN`, `inf`)  |
//! | `Text`          | verbatim                                    |
//! | `Bytes`         | UTF-8 if valid, otherwise `\x` + lower hex  |
//!
//! Flattening is all-or-nothing: any failure discards every row.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::engine::Connection;
use crate::error::{DbQueryError, Result};

/// Text written for SQL NULL
pub const NULL_TEXT: &str = "NULL";

/// One scanned cell, before rendering
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Cell {
    /// Render the cell as text
    #[must_use]
    pub fn render(self) -> String {
        match self {
            Self::Null => NULL_TEXT.to_string(),
            Self::Int(v) => v.to_string(),
            Self::UInt(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Text(v) => v,
            Self::Bytes(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(err) => format!("\\x{}", hex::encode(err.as_bytes())),
            },
        }
    }
}

/// A described and scanned result set: column names plus one slot per cell
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl RowSet {
    #[must_use]
    pub const fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self { columns, rows }
    }

    /// Render every row into a [`ResultRow`] keyed by the column list
    ///
    /// Fails if any row's arity differs from the column list.
    pub fn into_result(self) -> Result<QueryResult> {
        let Self { columns, rows } = self;

        let mut flattened = Vec::with_capacity(rows.len());
        for (index, cells) in rows.into_iter().enumerate() {
            if cells.len() != columns.len() {
                return Err(DbQueryError::query_failed(format!(
                    "row {index} has {} values but the result describes {} columns",
                    cells.len(),
                    columns.len()
                )));
            }

            let row: ResultRow = columns
                .iter()
                .cloned()
                .zip(cells.into_iter().map(Cell::render))
                .collect();
            flattened.push(row);
        }

        Ok(QueryResult { columns, rows: flattened })
    }
}

/// Column name to rendered value
pub type ResultRow = HashMap<String, String>;

/// Flattened query output, rows in the order the engine returned them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names in result order
    pub columns: Vec<String>,

    /// Result rows (each row maps every column name to its text)
    pub rows: Vec<ResultRow>,
}

/// Run `query` on `connection` and flatten the result
///
/// Errors surface as [`DbQueryError::QueryFailed`]; no partial result is returned.
pub async fn flatten<C: Connection>(connection: &mut C, query: &str) -> Result<QueryResult> {
    connection.fetch(query).await?.into_result()
}
