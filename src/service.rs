//! Query Service
//!
//! One request end to end: build the target, negotiate a connection, flatten
//! the query result, release the connection. Errors from negotiation and
//! flattening are returned as they are.

use tracing::{debug, info};

use crate::config::ServiceSettings;
use crate::credential::{IamTokenSource, IdentitySource, TokenSource};
use crate::engine::{Connection, ConnectionTarget, Connector, Engine, EngineConnector};
use crate::error::Result;
use crate::flatten::{flatten, QueryResult};
use crate::negotiator::Negotiator;

/// Executes queries against the configured database
///
/// Holds no connection state; every [`QueryService::execute`] call opens and
/// closes its own connection, so concurrent calls are independent.
pub struct QueryService<C = EngineConnector, T = IamTokenSource> {
    settings: ServiceSettings,
    connector: C,
    tokens: T,
}

impl QueryService {
    /// Service backed by the native drivers and environment identity credentials
    #[must_use]
    pub fn from_settings(settings: ServiceSettings) -> Self {
        let connector = EngineConnector::new(settings.ssl_root_cert.clone());
        let tokens = IamTokenSource::new(settings.region.clone(), IdentitySource::Environment);
        Self::new(settings, connector, tokens)
    }
}

impl<C: Connector, T: TokenSource> QueryService<C, T> {
    #[must_use]
    pub const fn new(settings: ServiceSettings, connector: C, tokens: T) -> Self {
        Self { settings, connector, tokens }
    }

    /// Build the connection target, with `database` overriding the default
    ///
    /// An empty override means "use the default". Fails with
    /// `InvalidConfiguration` for an unknown engine.
    pub fn target(&self, database: Option<&str>) -> Result<ConnectionTarget> {
        let engine: Engine = self.settings.engine.parse()?;
        let database = database
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .or_else(|| self.settings.database.clone());

        Ok(ConnectionTarget {
            engine,
            host: self.settings.host.clone(),
            port: self.settings.port_for(engine),
            user: self.settings.user.clone(),
            database,
        })
    }

    /// Run `query` and return every row, or a single error
    pub async fn execute(&self, query: &str, database: Option<&str>) -> Result<QueryResult> {
        let target = self.target(database)?;

        let negotiator = Negotiator::new(
            &self.connector,
            &self.tokens,
            self.settings.password_initial.as_deref(),
            self.settings.switch_to_iam_auth,
        );
        let negotiated = negotiator.negotiate(&target).await?;
        let mut connection = negotiated.connection;

        debug!(database = ?target.database, "executing query");
        let result = flatten(&mut connection, query).await;

        connection.close().await;
        debug!(endpoint = %target.endpoint(), "connection released");

        let result = result?;
        info!(
            endpoint = %target.endpoint(),
            mode = negotiated.mode.as_str(),
            rows = result.rows.len(),
            "query completed"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettingsFile;
    use crate::error::DbQueryError;

    fn settings(engine: &str, database: Option<&str>) -> ServiceSettings {
        let mut vars = vec![
            ("RDS_ENGINE".to_string(), engine.to_string()),
            ("RDS_HOST".to_string(), "db.internal".to_string()),
            ("RDS_USER".to_string(), "app".to_string()),
        ];
        if let Some(database) = database {
            vars.push(("RDS_DATABASE".to_string(), database.to_string()));
        }
        ServiceSettings::from_lookup(&SettingsFile::default(), |key| {
            vars.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
        })
        .unwrap()
    }

    #[test]
    fn test_target_uses_default_database() {
        let service = QueryService::from_settings(settings("postgres", Some("orders")));

        let target = service.target(None).unwrap();
        assert_eq!(target.engine, Engine::Postgres);
        assert_eq!(target.port, 5432);
        assert_eq!(target.database.as_deref(), Some("orders"));

        let target = service.target(Some("")).unwrap();
        assert_eq!(target.database.as_deref(), Some("orders"));
    }

    #[test]
    fn test_target_override_wins() {
        let service = QueryService::from_settings(settings("mysql", Some("orders")));

        let target = service.target(Some("analytics")).unwrap();
        assert_eq!(target.engine, Engine::MySQL);
        assert_eq!(target.port, 3306);
        assert_eq!(target.database.as_deref(), Some("analytics"));
    }

    #[test]
    fn test_target_rejects_unknown_engine() {
        let service = QueryService::from_settings(settings("sqlserver", None));
        let err = service.target(None).unwrap_err();
        assert!(matches!(err, DbQueryError::InvalidConfiguration(_)));
    }
}
