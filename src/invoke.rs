//! Invocation Transport
//!
//! Line-delimited JSON over stdio: one [`QueryRequest`] per input line, one
//! reply per output line. Requests are handled one after another and share
//! nothing but the service settings.
//!
//! ```text
//! -> {"query": "SELECT id, name FROM users", "database": "crm"}
//! <- {"rows": [{"id": "1", "name": "Alice"}]}
//! -> {"query": "SELECT * FROM missing"}
//! <- {"error": {"code": "QUERY_FAILED", "message": "..."}}
//! ```
//!
//! A line that is not a valid request gets an `INVALID_INPUT` reply and the
//! loop keeps going. Only stdio failures end it.

use anyhow::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, Write};
use tracing::debug;

use crate::credential::TokenSource;
use crate::engine::Connector;
use crate::error::DbQueryError;
use crate::flatten::ResultRow;
use crate::output::ErrorInfo;
use crate::service::QueryService;

/// Inbound request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QueryRequest {
    /// SQL text, executed verbatim
    pub query: String,

    /// Target database; missing or empty means the configured default
    #[serde(default)]
    pub database: String,
}

/// Successful reply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QueryResponse {
    /// Rows in engine order; every value is text and SQL NULL is `"NULL"`
    pub rows: Vec<ResultRow>,
}

/// Failed reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorResponse {
    pub error: ErrorInfo,
}

/// One reply line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    Rows(QueryResponse),
    Error(ErrorResponse),
}

impl From<&DbQueryError> for Reply {
    fn from(err: &DbQueryError) -> Self {
        Self::Error(ErrorResponse { error: ErrorInfo::from(err) })
    }
}

/// Serve requests from stdin until EOF
#[allow(clippy::future_not_send)]
pub async fn serve<C: Connector, T: TokenSource>(service: &QueryService<C, T>) -> Result<()> {
    let stdin = io::stdin();
    let reader = stdin.lock();
    let mut stdout = io::stdout();

    serve_lines(service, reader, &mut stdout).await
}

/// Serve requests read from `reader`, writing replies to `writer`
#[allow(clippy::future_not_send)]
pub async fn serve_lines<C, T, R, W>(
    service: &QueryService<C, T>,
    reader: R,
    writer: &mut W,
) -> Result<()>
where
    C: Connector,
    T: TokenSource,
    R: BufRead,
    W: Write,
{
    for line in reader.lines() {
        let line = line?;

        // Skip empty lines
        if line.trim().is_empty() {
            continue;
        }

        let reply = handle_line(service, &line).await;
        writeln!(writer, "{}", serde_json::to_string(&reply)?)?;
        writer.flush()?;
    }

    Ok(())
}

/// Decode one request line and execute it
pub async fn handle_line<C: Connector, T: TokenSource>(
    service: &QueryService<C, T>,
    line: &str,
) -> Reply {
    let request: QueryRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            return Reply::from(&DbQueryError::invalid_input(format!("malformed request: {e}")));
        }
    };

    handle_request(service, &request).await
}

/// Execute a decoded request
pub async fn handle_request<C: Connector, T: TokenSource>(
    service: &QueryService<C, T>,
    request: &QueryRequest,
) -> Reply {
    if request.query.trim().is_empty() {
        return Reply::from(&DbQueryError::invalid_input("query must not be empty"));
    }

    match service.execute(&request.query, Some(&request.database)).await {
        Ok(result) => Reply::Rows(QueryResponse { rows: result.rows }),
        Err(e) => {
            debug!(code = e.error_code(), "request failed");
            Reply::from(&e)
        }
    }
}

/// JSON Schemas of the request and reply payloads
pub fn payload_schemas() -> serde_json::Result<serde_json::Value> {
    Ok(serde_json::json!({
        "request": serde_json::to_value(schemars::schema_for!(QueryRequest))?,
        "response": serde_json::to_value(schemars::schema_for!(QueryResponse))?,
        "error": serde_json::to_value(schemars::schema_for!(ErrorResponse))?,
    }))
}
