//! Connection negotiation: identity first, exactly one fallback, nothing leaked

mod common;

use common::{target, Script, ScriptedConnector, ScriptedTokens};
use dbquery::engine::Connection;
use dbquery::negotiator::{AuthMode, MigrationIntent, Negotiator, PROBE_QUERY};
use dbquery::DbQueryError;
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_identity_success_never_falls_back() {
    let connector = ScriptedConnector::new(Script::default());
    let tokens = ScriptedTokens::working();
    let negotiator = Negotiator::new(&connector, &tokens, Some("initial-password"), true);

    let negotiated = negotiator.negotiate(&target()).await.unwrap();
    assert_eq!(negotiated.mode, AuthMode::Identity);
    assert_eq!(negotiated.migration, None);
    negotiated.connection.close().await;

    let ledger = connector.ledger();
    assert_eq!(ledger.attempts, vec!["identity-token"]);
    assert_eq!(ledger.queries, vec![PROBE_QUERY.to_string()]);
    assert_eq!(tokens.calls(), 1);
    assert_eq!(ledger.open_handles(), 0);
}

#[tokio::test]
async fn test_token_carries_the_port() {
    let connector = ScriptedConnector::new(Script::default());
    let tokens = ScriptedTokens::working();
    let negotiator = Negotiator::new(&connector, &tokens, None, false);

    let negotiated = negotiator.negotiate(&target()).await.unwrap();
    negotiated.connection.close().await;

    let ledger = connector.ledger();
    assert!(ledger.secrets[0].starts_with("orders.cluster-abc.eu-west-1.rds.amazonaws.com:5432/"));
}

#[tokio::test]
async fn test_signing_failure_falls_back_once() {
    let connector = ScriptedConnector::new(Script::default());
    let tokens = ScriptedTokens::failing();
    let negotiator = Negotiator::new(&connector, &tokens, Some("initial-password"), false);

    let negotiated = negotiator.negotiate(&target()).await.unwrap();
    assert_eq!(negotiated.mode, AuthMode::Fallback);
    negotiated.connection.close().await;

    let ledger = connector.ledger();
    // The identity attempt never reached the database
    assert_eq!(ledger.attempts, vec!["static-secret"]);
    assert_eq!(ledger.secrets, vec!["initial-password".to_string()]);
    assert_eq!(ledger.open_handles(), 0);
}

#[tokio::test]
async fn test_auth_rejection_falls_back_once() {
    let connector =
        ScriptedConnector::new(Script { reject_identity: true, ..Script::default() });
    let tokens = ScriptedTokens::working();
    let negotiator = Negotiator::new(&connector, &tokens, Some("initial-password"), false);

    let negotiated = negotiator.negotiate(&target()).await.unwrap();
    assert_eq!(negotiated.mode, AuthMode::Fallback);
    negotiated.connection.close().await;

    let ledger = connector.ledger();
    assert_eq!(ledger.attempts, vec!["identity-token", "static-secret"]);
    assert_eq!(ledger.open_handles(), 0);
}

#[tokio::test]
async fn test_probe_failure_releases_identity_connection_before_fallback() {
    let connector =
        ScriptedConnector::new(Script { identity_probe_fails: true, ..Script::default() });
    let tokens = ScriptedTokens::working();
    let negotiator = Negotiator::new(&connector, &tokens, Some("initial-password"), false);

    let negotiated = negotiator.negotiate(&target()).await.unwrap();
    assert_eq!(negotiated.mode, AuthMode::Fallback);

    {
        let ledger = connector.ledger();
        assert_eq!(ledger.attempts, vec!["identity-token", "static-secret"]);
        // Identity connection closed, only the fallback connection is live
        assert_eq!(ledger.opened, 2);
        assert_eq!(ledger.closed, 1);
        assert_eq!(ledger.queries, vec![PROBE_QUERY.to_string(), PROBE_QUERY.to_string()]);
    }

    negotiated.connection.close().await;
    assert_eq!(connector.ledger().open_handles(), 0);
}

#[tokio::test]
async fn test_both_attempts_fail_surfaces_fallback_error() {
    let connector = ScriptedConnector::new(Script {
        reject_identity: true,
        reject_fallback: true,
        ..Script::default()
    });
    let tokens = ScriptedTokens::working();
    let negotiator = Negotiator::new(&connector, &tokens, Some("wrong-password"), true);

    let err = negotiator.negotiate(&target()).await.err().unwrap();
    assert!(matches!(err, DbQueryError::AuthRejected(_)));
    assert!(err.message().contains("static-secret"));

    let ledger = connector.ledger();
    assert_eq!(ledger.attempts, vec!["identity-token", "static-secret"]);
    assert_eq!(ledger.open_handles(), 0);
}

#[tokio::test]
async fn test_unreachable_database_surfaces_connection_error() {
    let connector = ScriptedConnector::new(Script { unreachable: true, ..Script::default() });
    let tokens = ScriptedTokens::working();
    let negotiator = Negotiator::new(&connector, &tokens, Some("initial-password"), false);

    let err = negotiator.negotiate(&target()).await.err().unwrap();
    assert!(matches!(err, DbQueryError::ConnectionUnavailable(_)));
    assert_eq!(connector.ledger().attempts.len(), 2);
}

#[tokio::test]
async fn test_missing_fallback_secret_fails_without_second_connect() {
    let connector =
        ScriptedConnector::new(Script { reject_identity: true, ..Script::default() });
    let tokens = ScriptedTokens::working();
    let negotiator = Negotiator::new(&connector, &tokens, None, false);

    let err = negotiator.negotiate(&target()).await.err().unwrap();
    assert!(matches!(err, DbQueryError::AuthRejected(_)));
    assert!(err.message().contains("no fallback password configured"));
    assert_eq!(connector.ledger().attempts, vec!["identity-token"]);
}

#[tokio::test]
async fn test_fallback_records_migration_intent_when_enabled() {
    let connector =
        ScriptedConnector::new(Script { reject_identity: true, ..Script::default() });
    let tokens = ScriptedTokens::working();

    let negotiator = Negotiator::new(&connector, &tokens, Some("initial-password"), true);
    let negotiated = negotiator.negotiate(&target()).await.unwrap();
    assert_eq!(
        negotiated.migration,
        Some(MigrationIntent {
            user: "app_user".to_string(),
            host: "orders.cluster-abc.eu-west-1.rds.amazonaws.com".to_string(),
            port: 5432,
        })
    );
    negotiated.connection.close().await;

    let negotiator = Negotiator::new(&connector, &tokens, Some("initial-password"), false);
    let negotiated = negotiator.negotiate(&target()).await.unwrap();
    assert_eq!(negotiated.migration, None);
    negotiated.connection.close().await;

    // Recording the intent issues no statements beyond the probes
    let ledger = connector.ledger();
    assert!(ledger.queries.iter().all(|q| q == PROBE_QUERY));
}
