//! Database Engine Traits and Core Types
//!
//! This module defines the core abstractions for database engines.
//! Each engine (`PostgreSQL`, `MySQL`) knows how to turn a [`ConnectionTarget`]
//! plus a [`Credential`] into a live connection, including its own TLS and
//! password-transport quirks.
//!
//! # Request-Scoped Connections
//! A [`Connection`] is opened for exactly one request and closed before the
//! request returns. Nothing is pooled, cached, or shared between requests.
//!
//! # Engine Isolation
//! Each engine implementation is completely independent.
//! No shared SQL helpers or cross-engine abstractions beyond [`RowSet`].

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{DbQueryError, Result};
use crate::flatten::RowSet;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

/// Supported database engine types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// `PostgreSQL` database
    Postgres,
    /// `MySQL` database (includes Aurora MySQL and `MariaDB`)
    MySQL,
}

impl Engine {
    /// Get the engine name as a string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySQL => "mysql",
        }
    }

    /// Port the engine listens on when none is configured
    #[must_use]
    pub const fn default_port(&self) -> u16 {
        match self {
            Self::Postgres => 5432,
            Self::MySQL => 3306,
        }
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Engine {
    type Err = DbQueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" => Ok(Self::MySQL),
            other => Err(DbQueryError::invalid_configuration(format!(
                "unsupported database engine '{other}' (expected 'postgres' or 'mysql')"
            ))),
        }
    }
}

/// Where a single request connects to
///
/// Built per request from the settings and the caller's database override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    /// Database engine type
    pub engine: Engine,

    /// Endpoint hostname
    pub host: String,

    /// Endpoint port (always part of the signed token)
    pub port: u16,

    /// Database user the credential authenticates
    pub user: String,

    /// Database name; `None` lets the server pick its default
    pub database: Option<String>,
}

impl ConnectionTarget {
    /// `host:port`, the form used for both token signing and logging
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The secret presented for one connection attempt
///
/// WARNING: Sensitive data. `Debug` is redacted; never log [`Credential::secret`].
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Short-lived IAM authentication token
    IdentityToken(String),
    /// Long-lived static password
    StaticSecret(String),
}

impl Credential {
    /// Secret text sent to the server in place of a password
    #[must_use]
    pub fn secret(&self) -> &str {
        match self {
            Self::IdentityToken(secret) | Self::StaticSecret(secret) => secret,
        }
    }

    /// Short label for logging
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::IdentityToken(_) => "identity-token",
            Self::StaticSecret(_) => "static-secret",
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credential::{}(<redacted>)", self.kind())
    }
}

/// A live, exclusively owned database session
pub trait Connection: Send {
    /// Execute `query` verbatim and scan the first result set into generic cells
    ///
    /// Any failure is reported as [`DbQueryError::QueryFailed`].
    fn fetch(&mut self, query: &str) -> impl Future<Output = Result<RowSet>> + Send;

    /// Release the session. Close errors are logged, not returned.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Opens connections for a target with a given credential
///
/// Implementations classify failures as [`DbQueryError::AuthRejected`],
/// [`DbQueryError::ConnectionUnavailable`] or [`DbQueryError::InvalidConfiguration`],
/// and release anything partially opened before returning an error.
pub trait Connector: Send + Sync {
    /// Connection type produced by this connector
    type Conn: Connection;

    /// Open (but do not validate) a connection
    fn open(
        &self,
        target: &ConnectionTarget,
        credential: &Credential,
    ) -> impl Future<Output = Result<Self::Conn>> + Send;
}

/// Connector backed by the native engine drivers
#[derive(Debug, Clone, Default)]
pub struct EngineConnector {
    /// Extra PEM root bundle trusted in addition to the platform roots
    pub ssl_root_cert: Option<PathBuf>,
}

impl EngineConnector {
    /// Create a connector, optionally trusting an extra PEM root bundle
    #[must_use]
    pub const fn new(ssl_root_cert: Option<PathBuf>) -> Self {
        Self { ssl_root_cert }
    }
}

/// Connection produced by [`EngineConnector`]
pub enum EngineConnection {
    #[cfg(feature = "postgres")]
    Postgres(postgres::PgSession),
    #[cfg(feature = "mysql")]
    MySql(mysql::MySqlSession),
}

impl Connector for EngineConnector {
    type Conn = EngineConnection;

    async fn open(
        &self,
        target: &ConnectionTarget,
        credential: &Credential,
    ) -> Result<EngineConnection> {
        let ssl_root_cert = self.ssl_root_cert.as_deref();
        match target.engine {
            #[cfg(feature = "postgres")]
            Engine::Postgres => postgres::connect(target, credential, ssl_root_cert)
                .await
                .map(EngineConnection::Postgres),
            #[cfg(feature = "mysql")]
            Engine::MySQL => mysql::connect(target, credential, ssl_root_cert)
                .await
                .map(EngineConnection::MySql),
            #[allow(unreachable_patterns)]
            other => Err(DbQueryError::invalid_configuration(format!(
                "support for the '{other}' engine is not compiled into this build"
            ))),
        }
    }
}

impl Connection for EngineConnection {
    async fn fetch(&mut self, query: &str) -> Result<RowSet> {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(session) => session.fetch(query).await,
            #[cfg(feature = "mysql")]
            Self::MySql(session) => session.fetch(query).await,
        }
    }

    async fn close(self) {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(session) => session.close().await,
            #[cfg(feature = "mysql")]
            Self::MySql(session) => session.close().await,
        }
    }
}
