//! `PostgreSQL` Database Engine Implementation
//!
//! # Connection Parameters
//! - `sslmode=require` with a rustls connector that verifies the certificate
//!   chain against platform roots (plus an optional PEM bundle, e.g. the RDS
//!   CA bundle) and checks the hostname, i.e. verify-full semantics
//! - The IAM token (or static secret) is sent as the password
//!
//! # Implementation Notes
//! - Uses `tokio-postgres` (async driver, requires tokio runtime)
//! - Queries run through the simple-query protocol: the text is sent verbatim,
//!   no statement is prepared, and every value arrives in the server's own text
//!   form, so no per-type decoding is needed
//! - Only the first result set that describes columns is returned; leading
//!   statements without columns (`SET`, DDL, DML) are skipped

use rustls::{ClientConfig, RootCertStore};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_postgres::config::SslMode;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Config, SimpleQueryMessage};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::debug;

use crate::engine::{ConnectionTarget, Credential};
use crate::error::{DbQueryError, Result};
use crate::flatten::{Cell, RowSet};

/// An open `PostgreSQL` session
pub struct PgSession {
    client: Client,
    connection: JoinHandle<()>,
}

/// Open a TLS session to `target` authenticating with `credential`
pub async fn connect(
    target: &ConnectionTarget,
    credential: &Credential,
    ssl_root_cert: Option<&Path>,
) -> Result<PgSession> {
    let pg_config = build_pg_config(target, credential);
    let tls = build_tls_connector(ssl_root_cert)?;

    let (client, connection) = pg_config.connect(tls).await.map_err(classify_connect_error)?;

    // Spawn connection handler
    // Note: Connection errors are not logged in detail to prevent credential leakage
    let connection = tokio::spawn(async move {
        if connection.await.is_err() {
            debug!("postgres connection task ended with an error");
        }
    });

    Ok(PgSession { client, connection })
}

impl PgSession {
    /// Run `query` and scan its first result set
    pub async fn fetch(&mut self, query: &str) -> Result<RowSet> {
        let messages = self
            .client
            .simple_query(query)
            .await
            .map_err(|e| DbQueryError::query_failed(describe_error(&e)))?;

        Ok(first_result_set(messages))
    }

    /// Drop the client and wait for the connection task to wind down
    pub async fn close(self) {
        let Self { client, connection } = self;
        drop(client);
        if let Err(e) = connection.await {
            debug!(error = %e, "postgres connection task did not shut down cleanly");
        }
    }
}

/// Build `PostgreSQL` connection config from a target and credential
pub fn build_pg_config(target: &ConnectionTarget, credential: &Credential) -> Config {
    let mut pg_config = Config::new();
    pg_config
        .host(&target.host)
        .port(target.port)
        .user(&target.user)
        .password(credential.secret())
        .ssl_mode(SslMode::Require)
        .application_name("dbquery");

    if let Some(database) = &target.database {
        pg_config.dbname(database);
    }

    pg_config
}

/// Build a verifying rustls connector from platform roots and an optional PEM bundle
fn build_tls_connector(ssl_root_cert: Option<&Path>) -> Result<MakeRustlsConnect> {
    let mut roots = RootCertStore::empty();

    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        debug!(error = %err, "skipping unreadable platform certificate");
    }
    roots.add_parsable_certificates(native.certs);

    if let Some(path) = ssl_root_cert {
        let pem = std::fs::read(path).map_err(|e| {
            DbQueryError::invalid_configuration(format!(
                "could not read TLS root bundle {}: {e}",
                path.display()
            ))
        })?;
        let certs = rustls_pemfile::certs(&mut pem.as_slice())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| {
                DbQueryError::invalid_configuration(format!(
                    "invalid PEM in TLS root bundle {}: {e}",
                    path.display()
                ))
            })?;
        for cert in certs {
            roots.add(cert).map_err(|e| {
                DbQueryError::invalid_configuration(format!(
                    "rejected certificate in TLS root bundle {}: {e}",
                    path.display()
                ))
            })?;
        }
    }

    if roots.is_empty() {
        return Err(DbQueryError::connection_unavailable(
            "no root certificates available for TLS",
        ));
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| DbQueryError::connection_unavailable(format!("TLS setup failed: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(MakeRustlsConnect::new(tls_config))
}

/// Keep the rows of the first statement that describes columns
///
/// Statements before it produce no row description (or an empty one) and are
/// skipped; statements after it are ignored.
fn first_result_set(messages: Vec<SimpleQueryMessage>) -> RowSet {
    let mut columns: Option<Vec<String>> = None;
    let mut rows = Vec::new();

    for message in messages {
        match message {
            SimpleQueryMessage::RowDescription(description) if !description.is_empty() => {
                columns.get_or_insert_with(|| {
                    description.iter().map(|c| c.name().to_string()).collect()
                });
            }
            SimpleQueryMessage::Row(row) => {
                columns.get_or_insert_with(|| {
                    row.columns().iter().map(|c| c.name().to_string()).collect()
                });
                let cells = (0..row.len())
                    .map(|idx| row.get(idx).map_or(Cell::Null, |v| Cell::Text(v.to_string())))
                    .collect();
                rows.push(cells);
            }
            SimpleQueryMessage::CommandComplete(_) if columns.is_some() => break,
            _ => {}
        }
    }

    RowSet::new(columns.unwrap_or_default(), rows)
}

/// Map a connect error onto the auth/connection taxonomy
fn classify_connect_error(err: tokio_postgres::Error) -> DbQueryError {
    let detail = describe_error(&err);
    match err.code() {
        Some(code)
            if *code == SqlState::INVALID_PASSWORD
                || *code == SqlState::INVALID_AUTHORIZATION_SPECIFICATION =>
        {
            DbQueryError::auth_rejected(detail)
        }
        _ => DbQueryError::connection_unavailable(detail),
    }
}

/// Server message with SQLSTATE when available, driver message otherwise
fn describe_error(err: &tokio_postgres::Error) -> String {
    match err.as_db_error() {
        Some(db) => format!("{} (SQLSTATE {})", db.message(), db.code().code()),
        None => err.to_string(),
    }
}
