//! dbquery - SQL over RDS with IAM Authentication
//!
//! dbquery runs a SQL query against a PostgreSQL or MySQL database on behalf of
//! callers that hold no database password. Each request authenticates with a
//! short-lived IAM token signed from the ambient AWS identity, falls back once
//! to a static password when that fails, and returns the result as rows of
//! column name to text value.
//!
//! # Request Lifecycle
//! 1. Build a [`ConnectionTarget`] from [`ServiceSettings`] and the caller's database
//! 2. Negotiate a validated connection ([`negotiator`])
//! 3. Run the query and flatten every cell to text ([`flatten`])
//! 4. Close the connection, on every path
//!
//! # Module Organization
//! - [`error`] - Error types and handling
//! - [`config`] - Settings loading
//! - [`credential`] - IAM auth token signing
//! - [`engine`] - Engine types, connection seams and drivers
//! - [`flatten`] - Result set to string rows
//! - [`negotiator`] - Identity-then-fallback connection handshake
//! - [`service`] - Query service
//! - [`invoke`] - Line-delimited JSON invocation transport
//! - [`output`] - JSON output envelopes for the CLI

#[cfg(not(any(feature = "postgres", feature = "mysql")))]
compile_error!("dbquery needs at least one engine feature: enable `postgres` and/or `mysql`");

pub mod config;
pub mod credential;
pub mod engine;
pub mod error;
pub mod flatten;
pub mod invoke;
pub mod negotiator;
pub mod output;
pub mod service;

pub use config::ServiceSettings;
pub use credential::{IamTokenSource, IdentityCredentials, IdentitySource, TokenSource};
pub use engine::{
    Connection, ConnectionTarget, Connector, Credential, Engine, EngineConnection, EngineConnector,
};
pub use error::{DbQueryError, Result};
pub use flatten::{Cell, QueryResult, ResultRow, RowSet, NULL_TEXT};
pub use invoke::{QueryRequest, QueryResponse};
pub use negotiator::{AuthMode, MigrationIntent, Negotiated, Negotiator};
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
pub use service::QueryService;
