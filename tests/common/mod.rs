//! Scripted in-memory connector for exercising negotiation and the query
//! service without a database server.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dbquery::config::SettingsFile;
use dbquery::engine::{Connection, ConnectionTarget, Connector, Credential};
use dbquery::error::{DbQueryError, Result};
use dbquery::flatten::{Cell, RowSet};
use dbquery::negotiator::PROBE_QUERY;
use dbquery::{ServiceSettings, TokenSource};

/// How the fake database behaves
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Refuse identity tokens at connect time
    pub reject_identity: bool,
    /// Accept identity tokens but fail the probe on that connection
    pub identity_probe_fails: bool,
    /// Refuse the static secret at connect time
    pub reject_fallback: bool,
    /// Every connect fails with a transport error
    pub unreachable: bool,
    /// Result returned for any query other than the probe
    pub result: RowSet,
}

/// Everything the fake database observed
#[derive(Debug, Default)]
pub struct Ledger {
    /// Credential kind of every open attempt, in order
    pub attempts: Vec<&'static str>,
    /// Secrets presented, in order
    pub secrets: Vec<String>,
    /// Targets connected to, in order
    pub targets: Vec<ConnectionTarget>,
    /// Connections opened successfully
    pub opened: usize,
    /// Connections closed
    pub closed: usize,
    /// Queries run, probe included
    pub queries: Vec<String>,
}

impl Ledger {
    pub fn open_handles(&self) -> usize {
        self.opened - self.closed
    }
}

#[derive(Clone, Default)]
pub struct ScriptedConnector {
    pub script: Script,
    pub ledger: Arc<Mutex<Ledger>>,
}

impl ScriptedConnector {
    pub fn new(script: Script) -> Self {
        Self { script, ledger: Arc::default() }
    }

    pub fn ledger(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap()
    }
}

pub struct ScriptedConnection {
    ledger: Arc<Mutex<Ledger>>,
    probe_fails: bool,
    result: RowSet,
}

impl Connector for ScriptedConnector {
    type Conn = ScriptedConnection;

    async fn open(
        &self,
        target: &ConnectionTarget,
        credential: &Credential,
    ) -> Result<ScriptedConnection> {
        let mut ledger = self.ledger.lock().unwrap();
        ledger.attempts.push(credential.kind());
        ledger.secrets.push(credential.secret().to_string());
        ledger.targets.push(target.clone());

        if self.script.unreachable {
            return Err(DbQueryError::connection_unavailable("connection refused"));
        }

        let (rejected, probe_fails) = match credential {
            Credential::IdentityToken(_) => {
                (self.script.reject_identity, self.script.identity_probe_fails)
            }
            Credential::StaticSecret(_) => (self.script.reject_fallback, false),
        };
        if rejected {
            return Err(DbQueryError::auth_rejected(format!(
                "password authentication failed for user \"{}\" ({})",
                target.user,
                credential.kind()
            )));
        }

        ledger.opened += 1;
        Ok(ScriptedConnection {
            ledger: Arc::clone(&self.ledger),
            probe_fails,
            result: self.script.result.clone(),
        })
    }
}

impl Connection for ScriptedConnection {
    async fn fetch(&mut self, query: &str) -> Result<RowSet> {
        self.ledger.lock().unwrap().queries.push(query.to_string());

        if query == PROBE_QUERY {
            if self.probe_fails {
                return Err(DbQueryError::query_failed("permission denied for database"));
            }
            return Ok(RowSet::new(
                vec!["?column?".to_string()],
                vec![vec![Cell::Text("1".to_string())]],
            ));
        }

        if query.contains("missing_table") {
            return Err(DbQueryError::query_failed(
                "relation \"missing_table\" does not exist (SQLSTATE 42P01)",
            ));
        }

        Ok(self.result.clone())
    }

    async fn close(self) {
        self.ledger.lock().unwrap().closed += 1;
    }
}

/// Token source that counts calls and can be told to fail
#[derive(Default)]
pub struct ScriptedTokens {
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl ScriptedTokens {
    pub fn working() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { fail: true, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TokenSource for ScriptedTokens {
    fn auth_token(&self, target: &ConnectionTarget) -> Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(DbQueryError::credential_unavailable("no AWS region configured"));
        }
        Ok(format!("{}/?Action=connect&DBUser={}&X-Amz-Signature=token{n}", target.endpoint(), target.user))
    }
}

pub fn target() -> ConnectionTarget {
    ConnectionTarget {
        engine: dbquery::Engine::Postgres,
        host: "orders.cluster-abc.eu-west-1.rds.amazonaws.com".to_string(),
        port: 5432,
        user: "app_user".to_string(),
        database: Some("orders".to_string()),
    }
}

/// Settings as they would come from the environment
pub fn settings(vars: &[(&str, &str)]) -> ServiceSettings {
    let mut all: Vec<(String, String)> = vec![
        ("RDS_ENGINE".into(), "postgres".into()),
        ("RDS_HOST".into(), "orders.cluster-abc.eu-west-1.rds.amazonaws.com".into()),
        ("RDS_USER".into(), "app_user".into()),
        ("RDS_DATABASE".into(), "orders".into()),
        ("RDS_PASSWORD_INITIAL".into(), "initial-password".into()),
    ];
    for (key, value) in vars {
        all.retain(|(k, _)| k != *key);
        all.push(((*key).to_string(), (*value).to_string()));
    }

    ServiceSettings::from_lookup(&SettingsFile::default(), |key| {
        all.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
    })
    .unwrap()
}

/// `users` table: id, name, email (Bob has no email)
pub fn users() -> RowSet {
    RowSet::new(
        vec!["id".to_string(), "name".to_string(), "email".to_string()],
        vec![
            vec![Cell::Int(1), Cell::Text("Alice".into()), Cell::Text("alice@example.com".into())],
            vec![Cell::Int(2), Cell::Text("Bob".into()), Cell::Null],
            vec![Cell::Int(3), Cell::Bytes(b"Carol".to_vec()), Cell::Text("carol@example.com".into())],
        ],
    )
}
