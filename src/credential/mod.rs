//! Credential Resolution
//!
//! Produces the short-lived IAM authentication token used in place of a
//! database password. Signing only uses the ambient identity credentials; it
//! never creates or refreshes them, and tokens are never cached or reused.
//!
//! # Ambient Identity
//! Read from the environment at resolve time:
//! - `AWS_ACCESS_KEY_ID` (or `AWS_ACCESS_KEY`)
//! - `AWS_SECRET_ACCESS_KEY` (or `AWS_SECRET_KEY`)
//! - `AWS_SESSION_TOKEN` (optional)

pub mod sigv4;

use chrono::Utc;

use crate::engine::ConnectionTarget;
use crate::error::{DbQueryError, Result};

pub use sigv4::{ConnectRequest, TOKEN_EXPIRY_SECS};

/// Signing identity (access key pair plus optional session token)
///
/// WARNING: Sensitive data. `Debug` only shows the access key id.
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl IdentityCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }

    /// Read the identity from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the identity through `lookup`, treating empty values as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |keys: &[&str]| {
            keys.iter().find_map(|key| lookup(*key).filter(|value| !value.is_empty()))
        };

        let access_key_id = get(&["AWS_ACCESS_KEY_ID", "AWS_ACCESS_KEY"]).ok_or_else(|| {
            DbQueryError::credential_unavailable("AWS_ACCESS_KEY_ID not found in environment")
        })?;
        let secret_access_key =
            get(&["AWS_SECRET_ACCESS_KEY", "AWS_SECRET_KEY"]).ok_or_else(|| {
                DbQueryError::credential_unavailable(
                    "AWS_SECRET_ACCESS_KEY not found in environment",
                )
            })?;
        let session_token = get(&["AWS_SESSION_TOKEN"]);

        Ok(Self { access_key_id, secret_access_key, session_token })
    }
}

impl std::fmt::Debug for IdentityCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Sign an auth token for `user` on `host:port` with the current time
pub fn resolve(
    host: &str,
    port: u16,
    user: &str,
    region: &str,
    identity: &IdentityCredentials,
) -> Result<String> {
    let request = ConnectRequest { host, port, user, region };
    sigv4::presign_connect(&request, identity, Utc::now())
}

/// Source of identity tokens for the negotiator
pub trait TokenSource: Send + Sync {
    /// Produce a fresh token for `target`, or [`DbQueryError::CredentialUnavailable`]
    fn auth_token(&self, target: &ConnectionTarget) -> Result<String>;
}

/// Where [`IamTokenSource`] finds its signing identity
#[derive(Debug, Clone)]
pub enum IdentitySource {
    /// Environment variables, read on every resolve
    Environment,
    /// A fixed identity
    Static(IdentityCredentials),
}

/// Signs RDS IAM tokens for a region
#[derive(Debug, Clone)]
pub struct IamTokenSource {
    region: Option<String>,
    identity: IdentitySource,
}

impl IamTokenSource {
    #[must_use]
    pub const fn new(region: Option<String>, identity: IdentitySource) -> Self {
        Self { region, identity }
    }
}

impl TokenSource for IamTokenSource {
    fn auth_token(&self, target: &ConnectionTarget) -> Result<String> {
        let region = self
            .region
            .as_deref()
            .ok_or_else(|| DbQueryError::credential_unavailable("no AWS region configured"))?;

        match &self.identity {
            IdentitySource::Environment => {
                let identity = IdentityCredentials::from_env()?;
                resolve(&target.host, target.port, &target.user, region, &identity)
            }
            IdentitySource::Static(identity) => {
                resolve(&target.host, target.port, &target.user, region, identity)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    fn target() -> ConnectionTarget {
        ConnectionTarget {
            engine: Engine::Postgres,
            host: "db.example.internal".to_string(),
            port: 5432,
            user: "app".to_string(),
            database: None,
        }
    }

    #[test]
    fn test_identity_from_lookup() {
        let identity = IdentityCredentials::from_lookup(lookup(&[
            ("AWS_ACCESS_KEY_ID", "AKIDEXAMPLE"),
            ("AWS_SECRET_ACCESS_KEY", "secret"),
            ("AWS_SESSION_TOKEN", "session"),
        ]))
        .unwrap();

        assert_eq!(identity.access_key_id, "AKIDEXAMPLE");
        assert_eq!(identity.secret_access_key, "secret");
        assert_eq!(identity.session_token.as_deref(), Some("session"));
    }

    #[test]
    fn test_identity_accepts_legacy_names() {
        let identity = IdentityCredentials::from_lookup(lookup(&[
            ("AWS_ACCESS_KEY", "AKIDLEGACY"),
            ("AWS_SECRET_KEY", "legacy-secret"),
        ]))
        .unwrap();

        assert_eq!(identity.access_key_id, "AKIDLEGACY");
        assert_eq!(identity.session_token, None);
    }

    #[test]
    fn test_identity_missing_is_credential_unavailable() {
        let err = IdentityCredentials::from_lookup(lookup(&[("AWS_SECRET_ACCESS_KEY", "s")]))
            .unwrap_err();
        assert!(matches!(err, DbQueryError::CredentialUnavailable(_)));

        let err = IdentityCredentials::from_lookup(lookup(&[
            ("AWS_ACCESS_KEY_ID", "AKIDEXAMPLE"),
            ("AWS_SECRET_ACCESS_KEY", ""),
        ]))
        .unwrap_err();
        assert!(err.message().contains("AWS_SECRET_ACCESS_KEY"));
    }

    #[test]
    fn test_identity_debug_is_redacted() {
        let identity = IdentityCredentials::new("AKIDEXAMPLE", "topsecret", Some("sess".into()));
        let rendered = format!("{identity:?}");
        assert!(rendered.contains("AKIDEXAMPLE"));
        assert!(!rendered.contains("topsecret"));
        assert!(!rendered.contains("sess\""));
    }

    #[test]
    fn test_token_source_signs_for_target() {
        let source = IamTokenSource::new(
            Some("eu-central-1".to_string()),
            IdentitySource::Static(IdentityCredentials::new("AKIDEXAMPLE", "secret", None)),
        );

        let token = source.auth_token(&target()).unwrap();
        assert!(token.starts_with("db.example.internal:5432/?Action=connect&DBUser=app&"));
        assert!(token.contains("%2Feu-central-1%2Frds-db%2Faws4_request"));
        assert!(token.contains("&X-Amz-Signature="));
    }

    #[test]
    fn test_token_source_without_region() {
        let source = IamTokenSource::new(
            None,
            IdentitySource::Static(IdentityCredentials::new("AKIDEXAMPLE", "secret", None)),
        );

        let err = source.auth_token(&target()).unwrap_err();
        assert!(matches!(err, DbQueryError::CredentialUnavailable(_)));
    }

    #[test]
    fn test_tokens_are_not_reused() {
        let identity = IdentityCredentials::new("AKIDEXAMPLE", "secret", None);
        let first = resolve("db", 3306, "app", "us-east-1", &identity).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let second = resolve("db", 3306, "app", "us-east-1", &identity).unwrap();
        assert_ne!(first, second);
    }
}
