//! Query Command Output
//!
//! `dbquery query` prints exactly one JSON object to stdout:
//! - Success: `{"ok": true, "engine": "postgres", "data": {"rows": [...]}, "meta": {...}}`
//! - Error: `{"ok": false, "engine": "postgres", "error": {"code": "...", "message": "..."}}`
//!
//! `dbquery serve` answers with [`crate::invoke::Reply`] instead; both carry
//! the same [`ErrorInfo`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::DbQueryError;
use crate::invoke::QueryResponse;

/// Rows of a successful query plus timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope {
    pub ok: bool,

    /// Configured engine identifier
    pub engine: String,

    pub data: QueryResponse,

    pub meta: Metadata,
}

impl SuccessEnvelope {
    /// Wrap `data`, counting its rows into the metadata
    pub fn new(engine: impl Into<String>, data: QueryResponse, execution_ms: u64) -> Self {
        let meta = Metadata { execution_ms, rows_returned: data.rows.len() };
        Self { ok: true, engine: engine.into(), data, meta }
    }
}

/// A failed query: settings, input, credential, connection or query error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub ok: bool,

    /// Configured engine identifier (may be empty or unsupported)
    pub engine: String,

    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    pub fn new(engine: impl Into<String>, err: &DbQueryError) -> Self {
        Self { ok: false, engine: engine.into(), error: ErrorInfo::from(err) }
    }
}

/// Error information structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorInfo {
    /// Stable error code (e.g. `AUTH_REJECTED`, `QUERY_FAILED`)
    pub code: String,

    /// Human-readable message, free of credentials
    pub message: String,
}

impl From<&DbQueryError> for ErrorInfo {
    fn from(err: &DbQueryError) -> Self {
        Self { code: err.error_code().to_string(), message: err.message() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Wall-clock time for the whole request, negotiation included
    pub execution_ms: u64,

    pub rows_returned: usize,
}
