//! Connection Negotiation
//!
//! Establishes one validated connection per request:
//!
//! ```text
//! START -> TRY_IDENTITY_AUTH -> CONNECTED_IDENTITY
//!                  |
//!                  v
//!          TRY_FALLBACK_AUTH -> CONNECTED_FALLBACK
//!                  |
//!                  v
//!               FAILED
//! ```
//!
//! The identity attempt always runs first. Any credential, auth or transport
//! failure in it hands over to exactly one fallback attempt with the static
//! secret; the fallback's error is the one returned. A connection only counts
//! as established once the probe query succeeds on it. Configuration errors
//! are not auth failures and end negotiation immediately.

use tracing::{debug, info, warn};

use crate::credential::TokenSource;
use crate::engine::{Connection, ConnectionTarget, Connector, Credential};
use crate::error::{DbQueryError, Result};

/// Query run right after connecting to prove the credential grants access
pub const PROBE_QUERY: &str = "SELECT 1";

/// Which credential authorized the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Identity,
    Fallback,
}

impl AuthMode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Fallback => "fallback",
        }
    }
}

/// Account that should be moved to identity auth
///
/// Only recorded. No grants or password changes are issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationIntent {
    pub user: String,
    pub host: String,
    pub port: u16,
}

/// A validated connection plus how it was obtained
pub struct Negotiated<C> {
    pub connection: C,
    pub mode: AuthMode,
    pub migration: Option<MigrationIntent>,
}

/// Runs the identity-then-fallback handshake for a single request
pub struct Negotiator<'a, C, T> {
    connector: &'a C,
    tokens: &'a T,
    fallback_secret: Option<&'a str>,
    switch_to_iam_auth: bool,
}

impl<'a, C: Connector, T: TokenSource> Negotiator<'a, C, T> {
    #[must_use]
    pub const fn new(
        connector: &'a C,
        tokens: &'a T,
        fallback_secret: Option<&'a str>,
        switch_to_iam_auth: bool,
    ) -> Self {
        Self { connector, tokens, fallback_secret, switch_to_iam_auth }
    }

    /// Open and validate a connection to `target`
    pub async fn negotiate(&self, target: &ConnectionTarget) -> Result<Negotiated<C::Conn>> {
        let endpoint = target.endpoint();

        match self.try_identity(target).await {
            Ok(connection) => {
                info!(engine = %target.engine, endpoint = %endpoint, user = %target.user, mode = "identity", "connected");
                return Ok(Negotiated { connection, mode: AuthMode::Identity, migration: None });
            }
            Err(e) if !e.is_auth_failure() => return Err(e),
            Err(e) => {
                warn!(
                    endpoint = %endpoint,
                    user = %target.user,
                    code = e.error_code(),
                    error = %e,
                    "identity auth failed, retrying with fallback password"
                );
            }
        }

        let connection = match self.try_fallback(target).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!(endpoint = %endpoint, user = %target.user, code = e.error_code(), "fallback auth failed");
                return Err(e);
            }
        };
        info!(engine = %target.engine, endpoint = %endpoint, user = %target.user, mode = "fallback", "connected");

        let migration = self.switch_to_iam_auth.then(|| {
            let intent = MigrationIntent {
                user: target.user.clone(),
                host: target.host.clone(),
                port: target.port,
            };
            warn!(
                target: "dbquery::migration",
                user = %intent.user,
                host = %intent.host,
                port = intent.port,
                "account authenticated with fallback password and should be switched to IAM auth (not performed)"
            );
            intent
        });

        Ok(Negotiated { connection, mode: AuthMode::Fallback, migration })
    }

    async fn try_identity(&self, target: &ConnectionTarget) -> Result<C::Conn> {
        let token = self.tokens.auth_token(target)?;
        debug!(endpoint = %target.endpoint(), "generated identity token");
        self.open_validated(target, &Credential::IdentityToken(token)).await
    }

    async fn try_fallback(&self, target: &ConnectionTarget) -> Result<C::Conn> {
        let secret = self
            .fallback_secret
            .ok_or_else(|| DbQueryError::auth_rejected("no fallback password configured"))?;
        self.open_validated(target, &Credential::StaticSecret(secret.to_string())).await
    }

    /// Open a connection and run the probe; a failed probe releases the connection
    async fn open_validated(
        &self,
        target: &ConnectionTarget,
        credential: &Credential,
    ) -> Result<C::Conn> {
        debug!(endpoint = %target.endpoint(), credential = credential.kind(), "opening connection");
        let mut connection = self.connector.open(target, credential).await?;

        match connection.fetch(PROBE_QUERY).await {
            Ok(_) => Ok(connection),
            Err(e) => {
                connection.close().await;
                let detail = match e {
                    DbQueryError::QueryFailed(detail) => detail,
                    other => other.message(),
                };
                Err(DbQueryError::auth_rejected(format!("probe query failed: {detail}")))
            }
        }
    }
}
