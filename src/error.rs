//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout dbquery.
//! All errors are structured and map to specific error codes for JSON output.
//!
//! # Error Categories
//! - `CredentialUnavailable`: No identity token could be produced
//! - `AuthRejected`: The database refused the supplied credential
//! - `ConnectionUnavailable`: Network or transport failure while connecting
//! - `QueryFailed`: The query failed on an established connection
//! - `InvalidConfiguration`: Missing, malformed or unsupported settings
//! - `InvalidInput`: Malformed request payload or command-line usage
//!
//! Messages never contain passwords, tokens or connection strings.

use thiserror::Error;

/// Main error type for dbquery operations
#[derive(Error, Debug)]
pub enum DbQueryError {
    /// Identity token could not be produced
    #[error("Credential unavailable: {0}")]
    CredentialUnavailable(String),

    /// Database refused the credential (or the probe query failed)
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    /// Network or transport failure opening a connection
    #[error("Connection unavailable: {0}")]
    ConnectionUnavailable(String),

    /// Query execution failed
    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    /// Settings are missing, malformed, or name an unsupported engine
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Invalid request payload or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl DbQueryError {
    /// Convert error to error code string for JSON output
    ///
    /// Error codes are stable and suitable for programmatic handling.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::CredentialUnavailable(_) => "CREDENTIAL_UNAVAILABLE",
            Self::AuthRejected(_) => "AUTH_REJECTED",
            Self::ConnectionUnavailable(_) => "CONNECTION_UNAVAILABLE",
            Self::QueryFailed(_) => "QUERY_FAILED",
            Self::InvalidConfiguration(_) => "INVALID_CONFIGURATION",
            Self::InvalidInput(_) => "INVALID_INPUT",
        }
    }

    /// Get human-readable error message (safe to include in JSON output)
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Whether this failure, during the identity attempt, hands over to the fallback secret
    #[must_use]
    pub const fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::CredentialUnavailable(_) | Self::AuthRejected(_) | Self::ConnectionUnavailable(_)
        )
    }

    /// Create a credential unavailable error
    pub fn credential_unavailable(message: impl Into<String>) -> Self {
        Self::CredentialUnavailable(message.into())
    }

    /// Create an authentication rejected error
    pub fn auth_rejected(message: impl Into<String>) -> Self {
        Self::AuthRejected(message.into())
    }

    /// Create a connection unavailable error
    pub fn connection_unavailable(message: impl Into<String>) -> Self {
        Self::ConnectionUnavailable(message.into())
    }

    /// Create a query failed error
    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryFailed(message.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

/// Result type alias for dbquery operations
pub type Result<T> = std::result::Result<T, DbQueryError>;
