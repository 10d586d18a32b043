//! MySQL Database Engine Implementation
//!
//! # Connection Parameters
//! - TLS always on, server certificate verified (optional extra PEM root bundle)
//! - Client-side cleartext password plugin enabled: IAM tokens are delivered
//!   through `mysql_clear_password`, which the server only accepts over TLS
//!
//! # Implementation Notes
//! - Uses `mysql_async` (async driver, requires tokio runtime)
//! - Queries run through the text protocol (`COM_QUERY`), verbatim
//! - Column names come from the result metadata, so empty results keep them
//! - Only the first result set that describes columns is returned; leading
//!   column-less results (`SET`, DML) are skipped and later ones are drained

use mysql_async::{prelude::*, Conn, OptsBuilder, Row, SslOpts, Value};
use std::path::Path;
use tracing::debug;

use crate::engine::{ConnectionTarget, Credential};
use crate::error::{DbQueryError, Result};
use crate::flatten::{Cell, RowSet};

/// Server error codes that mean the credential was refused
///
/// 1044 DB access denied, 1045 access denied, 1698 access denied (no password
/// plugin match), 1251 client does not support the requested auth protocol.
const AUTH_ERROR_CODES: [u16; 4] = [1044, 1045, 1698, 1251];

/// An open MySQL session
pub struct MySqlSession {
    conn: Conn,
}

/// Open a TLS session to `target` authenticating with `credential`
pub async fn connect(
    target: &ConnectionTarget,
    credential: &Credential,
    ssl_root_cert: Option<&Path>,
) -> Result<MySqlSession> {
    let opts = build_mysql_opts(target, credential, ssl_root_cert);
    let conn = Conn::new(opts).await.map_err(classify_connect_error)?;
    Ok(MySqlSession { conn })
}

impl MySqlSession {
    /// Run `query` and scan its first result set that describes columns
    pub async fn fetch(&mut self, query: &str) -> Result<RowSet> {
        let mut result = self
            .conn
            .query_iter(query)
            .await
            .map_err(|e| DbQueryError::query_failed(describe_error(&e)))?;

        let mut set = RowSet::default();
        while !result.is_empty() {
            let columns: Vec<String> =
                result.columns_ref().iter().map(|c| c.name_str().into_owned()).collect();

            // Collecting also steps past sets that never carry rows (SET, DML)
            let rows: Vec<Row> = result
                .collect()
                .await
                .map_err(|e| DbQueryError::query_failed(describe_error(&e)))?;

            if !columns.is_empty() {
                set = RowSet::new(columns, rows.iter().map(row_to_cells).collect());
                break;
            }
        }

        result
            .drop_result()
            .await
            .map_err(|e| DbQueryError::query_failed(describe_error(&e)))?;

        Ok(set)
    }

    /// Send `COM_QUIT` and close the socket
    pub async fn close(self) {
        if let Err(e) = self.conn.disconnect().await {
            debug!(error = %e, "mysql disconnect failed");
        }
    }
}

/// Build MySQL connection options from a target and credential
pub fn build_mysql_opts(
    target: &ConnectionTarget,
    credential: &Credential,
    ssl_root_cert: Option<&Path>,
) -> OptsBuilder {
    let mut ssl_opts = SslOpts::default();
    if let Some(path) = ssl_root_cert {
        ssl_opts = ssl_opts.with_root_certs(vec![path.to_path_buf().into()]);
    }

    OptsBuilder::default()
        .ip_or_hostname(target.host.clone())
        .tcp_port(target.port)
        .user(Some(target.user.clone()))
        .pass(Some(credential.secret().to_string()))
        .db_name(target.database.clone())
        .ssl_opts(Some(ssl_opts))
        .enable_cleartext_plugin(true)
}

/// Map a connect error onto the auth/connection taxonomy
fn classify_connect_error(err: mysql_async::Error) -> DbQueryError {
    match &err {
        mysql_async::Error::Server(server) if AUTH_ERROR_CODES.contains(&server.code) => {
            DbQueryError::auth_rejected(describe_error(&err))
        }
        _ => DbQueryError::connection_unavailable(describe_error(&err)),
    }
}

fn describe_error(err: &mysql_async::Error) -> String {
    match err {
        mysql_async::Error::Server(server) => {
            format!("{} (error {}, SQLSTATE {})", server.message, server.code, server.state)
        }
        other => other.to_string(),
    }
}

fn row_to_cells(row: &Row) -> Vec<Cell> {
    (0..row.len())
        .map(|idx| row.as_ref(idx).map_or(Cell::Null, value_to_cell))
        .collect()
}

/// Scan a MySQL value into a generic cell
fn value_to_cell(value: &Value) -> Cell {
    match value {
        Value::NULL => Cell::Null,
        Value::Bytes(bytes) => Cell::Bytes(bytes.clone()),
        Value::Int(i) => Cell::Int(*i),
        Value::UInt(u) => Cell::UInt(*u),
        // f32 through its own Display; widening would print 0.1 as 0.10000000149011612
        Value::Float(f) => Cell::Text(f.to_string()),
        Value::Double(d) => Cell::Float(*d),
        Value::Date(year, month, day, hour, minute, second, micro) => {
            let mut text = format!(
                "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
            );
            if *micro > 0 {
                text.push_str(&format!(".{micro:06}"));
            }
            Cell::Text(text)
        }
        Value::Time(is_negative, days, hours, minutes, seconds, micro) => {
            let sign = if *is_negative { "-" } else { "" };
            let total_hours = days * 24 + u32::from(*hours);
            let mut text = format!("{sign}{total_hours:02}:{minutes:02}:{seconds:02}");
            if *micro > 0 {
                text.push_str(&format!(".{micro:06}"));
            }
            Cell::Text(text)
        }
    }
}
