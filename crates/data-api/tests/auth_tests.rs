//! Token validation integration tests.
//!
//! Uses real RS256 signatures against a mocked key-set endpoint.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::Utc;
use data_api::auth::{AuthError, KeySetCache, TokenValidator, ValidatorSettings};
use data_api_test_utils::{
    with_foreign_signature, MockJwksServer, TestKeypair, TestTokenBuilder, TEST_AUDIENCE,
    TEST_EMAIL, TEST_ISSUER,
};
use jsonwebtoken::Algorithm;
use std::sync::Arc;
use std::time::Duration;

fn settings() -> ValidatorSettings {
    ValidatorSettings {
        issuer: Some(TEST_ISSUER.to_string()),
        audience: Some(TEST_AUDIENCE.to_string()),
        ..ValidatorSettings::default()
    }
}

fn validator_for(jwks: &MockJwksServer, settings: ValidatorSettings) -> TokenValidator {
    let cache = KeySetCache::new(Some(jwks.jwks_url())).with_refresh_cooldown(Duration::ZERO);
    TokenValidator::new(Arc::new(cache), settings)
}

#[tokio::test]
async fn test_valid_token_yields_email() {
    let keypair = TestKeypair::primary("key-1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let validator = validator_for(&jwks, settings());

    let token = TestTokenBuilder::new().for_subject("user-42").sign(&keypair);
    let principal = validator.validate_bearer(&token).await.unwrap();

    assert_eq!(principal.email(), Some(TEST_EMAIL));
    assert_eq!(principal.subject(), Some("user-42"));
}

#[tokio::test]
async fn test_missing_email_is_tolerated_by_default() {
    let keypair = TestKeypair::primary("key-1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let validator = validator_for(&jwks, settings());

    let token = TestTokenBuilder::new().without_email().sign(&keypair);
    let principal = validator.validate_bearer(&token).await.unwrap();

    assert_eq!(principal.email(), None);
    assert_eq!(principal.display_name(), "unknown user");
}

#[tokio::test]
async fn test_missing_email_rejected_in_strict_mode() {
    let keypair = TestKeypair::primary("key-1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let validator = validator_for(
        &jwks,
        ValidatorSettings {
            require_email: true,
            ..settings()
        },
    );

    let token = TestTokenBuilder::new().without_email().sign(&keypair);
    let err = validator.validate_bearer(&token).await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidToken(_)), "got {err:?}");
}

#[tokio::test]
async fn test_unknown_kid_is_rejected_after_one_refetch() {
    let keypair = TestKeypair::primary("key-1");
    let stranger = TestKeypair::secondary("key-absent");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let validator = validator_for(&jwks, settings());

    let token = TestTokenBuilder::new().sign(&stranger);
    let err = validator.validate_bearer(&token).await.unwrap_err();

    match err {
        AuthError::UnknownKey { kid } => assert_eq!(kid, "key-absent"),
        other => panic!("Expected UnknownKey, got {other:?}"),
    }
    // First use plus one refresh for the unknown kid
    assert_eq!(jwks.fetch_count().await, 2);
}

#[tokio::test]
async fn test_unknown_kid_within_cooldown_does_not_refetch() {
    let keypair = TestKeypair::primary("key-1");
    let stranger = TestKeypair::secondary("key-absent");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let cache =
        KeySetCache::new(Some(jwks.jwks_url())).with_refresh_cooldown(Duration::from_secs(300));
    let validator = TokenValidator::new(Arc::new(cache), settings());

    let token = TestTokenBuilder::new().sign(&stranger);
    for _ in 0..3 {
        let err = validator.validate_bearer(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::UnknownKey { .. }));
    }
    assert_eq!(jwks.fetch_count().await, 1);
}

#[tokio::test]
async fn test_expired_token_reports_expired_even_with_bad_signature() {
    let keypair = TestKeypair::primary("key-1");
    let other = TestKeypair::secondary("key-1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let validator = validator_for(&jwks, settings());

    let expired = TestTokenBuilder::new().expires_in(-600).sign(&keypair);
    let forged = with_foreign_signature(&expired, &TestTokenBuilder::new().sign(&other));

    let err = validator.validate_bearer(&expired).await.unwrap_err();
    assert!(matches!(err, AuthError::Expired), "got {err:?}");

    let err = validator.validate_bearer(&forged).await.unwrap_err();
    assert!(matches!(err, AuthError::Expired), "got {err:?}");
}

#[tokio::test]
async fn test_leeway_accepts_recently_expired_token() {
    let keypair = TestKeypair::primary("key-1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let validator = validator_for(
        &jwks,
        ValidatorSettings {
            leeway: Duration::from_secs(120),
            ..settings()
        },
    );

    let token = TestTokenBuilder::new().expires_in(-30).sign(&keypair);
    assert!(validator.validate_bearer(&token).await.is_ok());
}

#[tokio::test]
async fn test_invalid_signature_rejected() {
    let keypair = TestKeypair::primary("key-1");
    let impostor = TestKeypair::secondary("key-1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let validator = validator_for(&jwks, settings());

    let token = TestTokenBuilder::new().sign(&impostor);
    let err = validator.validate_bearer(&token).await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidToken(_)), "got {err:?}");
}

#[tokio::test]
async fn test_issuer_and_audience_mismatch_rejected() {
    let keypair = TestKeypair::primary("key-1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let validator = validator_for(&jwks, settings());

    let wrong_issuer = TestTokenBuilder::new()
        .with_issuer("https://evil.example/")
        .sign(&keypair);
    let wrong_audience = TestTokenBuilder::new()
        .with_audience("api://someone-else")
        .sign(&keypair);

    for token in [wrong_issuer, wrong_audience] {
        let err = validator.validate_bearer(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)), "got {err:?}");
    }
}

#[tokio::test]
async fn test_audience_array_containing_configured_audience_accepted() {
    let keypair = TestKeypair::primary("key-1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let validator = validator_for(&jwks, settings());

    let token = TestTokenBuilder::new()
        .with_audiences(&["api://graph", TEST_AUDIENCE])
        .sign(&keypair);
    let principal = validator.validate_bearer(&token).await.unwrap();
    assert_eq!(principal.email(), Some(TEST_EMAIL));
}

#[tokio::test]
async fn test_audience_array_without_configured_audience_rejected() {
    let keypair = TestKeypair::primary("key-1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let validator = validator_for(&jwks, settings());

    for audiences in [&["api://graph", "api://someone-else"][..], &[][..]] {
        let token = TestTokenBuilder::new()
            .with_audiences(audiences)
            .sign(&keypair);
        let err = validator.validate_bearer(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)), "got {err:?}");
    }
}

#[tokio::test]
async fn test_not_yet_valid_and_future_iat_rejected() {
    let keypair = TestKeypair::primary("key-1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let validator = validator_for(&jwks, settings());

    let immature = TestTokenBuilder::new().not_before_in(600).sign(&keypair);
    let future_iat = TestTokenBuilder::new()
        .issued_at(Utc::now().timestamp() + 3600)
        .sign(&keypair);

    for token in [immature, future_iat] {
        let err = validator.validate_bearer(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)), "got {err:?}");
    }
}

#[tokio::test]
async fn test_token_without_exp_rejected() {
    let keypair = TestKeypair::primary("key-1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let validator = validator_for(&jwks, settings());

    let token = TestTokenBuilder::new().without_expiry().sign(&keypair);
    let err = validator.validate_bearer(&token).await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidToken(_)), "got {err:?}");
}

#[tokio::test]
async fn test_disallowed_algorithm_rejected() {
    let keypair = TestKeypair::primary("key-1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let validator = validator_for(&jwks, settings());

    // RS512 is a valid RSA signature but not in the default allow-list
    let token = TestTokenBuilder::new()
        .with_algorithm(Algorithm::RS512)
        .sign(&keypair);
    let err = validator.validate_bearer(&token).await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidToken(_)), "got {err:?}");

    // Rejected before any key lookup
    assert_eq!(jwks.fetch_count().await, 0);
}

#[tokio::test]
async fn test_algorithm_must_match_published_key() {
    let keypair = TestKeypair::primary("key-1");
    let jwks = MockJwksServer::start_empty().await;
    jwks.publish_document(serde_json::json!({ "keys": [keypair.jwk_json_with_alg("RS384")] }))
        .await;
    let validator = validator_for(
        &jwks,
        ValidatorSettings {
            allowed_algorithms: vec![Algorithm::RS256, Algorithm::RS384],
            ..settings()
        },
    );

    let token = TestTokenBuilder::new().sign(&keypair);
    let err = validator.validate_bearer(&token).await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidToken(_)), "got {err:?}");
}

#[tokio::test]
async fn test_concurrent_first_use_fetches_once() {
    let keypair = TestKeypair::primary("key-1");
    let jwks = MockJwksServer::start_empty().await;
    jwks.publish_delayed(&[&keypair], Duration::from_millis(200))
        .await;
    let cache = Arc::new(KeySetCache::new(Some(jwks.jwks_url())));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_key_set().await })
        })
        .collect();

    let mut sets = Vec::new();
    for handle in handles {
        sets.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(jwks.fetch_count().await, 1);
    let first = sets.first().unwrap();
    assert!(sets.iter().all(|set| Arc::ptr_eq(set, first)));
}

#[tokio::test]
async fn test_key_rotation_is_picked_up() {
    let old_key = TestKeypair::primary("key-old");
    let new_key = TestKeypair::secondary("key-new");
    let jwks = MockJwksServer::start(&[&old_key]).await;
    let validator = validator_for(&jwks, settings());

    let old_token = TestTokenBuilder::new().sign(&old_key);
    validator.validate_bearer(&old_token).await.unwrap();

    // Provider rotates: both keys published
    jwks.publish(&[&old_key, &new_key]).await;

    let new_token = TestTokenBuilder::new().with_email("grace@example.com").sign(&new_key);
    let principal = validator.validate_bearer(&new_token).await.unwrap();
    assert_eq!(principal.email(), Some("grace@example.com"));
    assert_eq!(jwks.fetch_count().await, 1);

    // Old key still valid from the refreshed set, no further fetch
    validator.validate_bearer(&old_token).await.unwrap();
    assert_eq!(jwks.fetch_count().await, 1);
}

#[tokio::test]
async fn test_ttl_expiry_refetches() {
    let keypair = TestKeypair::primary("key-1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let cache = KeySetCache::new(Some(jwks.jwks_url())).with_ttl(Some(Duration::from_millis(50)));

    cache.get_key_set().await.unwrap();
    cache.get_key_set().await.unwrap();
    assert_eq!(jwks.fetch_count().await, 1);

    tokio::time::sleep(Duration::from_millis(80)).await;
    cache.get_key_set().await.unwrap();
    assert_eq!(jwks.fetch_count().await, 2);
}

#[tokio::test]
async fn test_fetch_failure_is_fetch_error_and_not_cached() {
    let keypair = TestKeypair::primary("key-1");
    let jwks = MockJwksServer::start_empty().await;
    jwks.fail_with(503).await;
    let validator = validator_for(&jwks, settings());

    let token = TestTokenBuilder::new().sign(&keypair);
    let err = validator.validate_bearer(&token).await.unwrap_err();
    assert!(matches!(err, AuthError::Fetch(_)), "got {err:?}");

    // Endpoint recovers; next call fetches again and succeeds
    jwks.publish(&[&keypair]).await;
    validator.validate_bearer(&token).await.unwrap();
}

#[tokio::test]
async fn test_unparseable_document_is_fetch_error() {
    let jwks = MockJwksServer::start_empty().await;
    jwks.publish_document(serde_json::json!({ "not_keys": true }))
        .await;
    let cache = KeySetCache::new(Some(jwks.jwks_url()));

    let err = cache.get_key_set().await.unwrap_err();
    assert!(matches!(err, AuthError::Fetch(_)), "got {err:?}");
}

#[tokio::test]
async fn test_unconfigured_jwks_url_is_config_error_without_io() {
    let jwks = MockJwksServer::start(&[&TestKeypair::primary("key-1")]).await;
    let validator = TokenValidator::new(Arc::new(KeySetCache::new(None)), settings());

    let token = TestTokenBuilder::new().sign(&TestKeypair::primary("key-1"));
    let err = validator.validate_bearer(&token).await.unwrap_err();

    assert!(matches!(err, AuthError::Config(_)), "got {err:?}");
    assert_eq!(jwks.fetch_count().await, 0);
}

#[tokio::test]
async fn test_unconfigured_issuer_is_config_error_without_io() {
    let keypair = TestKeypair::primary("key-1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let validator = validator_for(
        &jwks,
        ValidatorSettings {
            issuer: None,
            ..settings()
        },
    );

    let err = validator
        .validate_bearer(&TestTokenBuilder::new().sign(&keypair))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Config(_)), "got {err:?}");
    assert_eq!(jwks.fetch_count().await, 0);
}

#[tokio::test]
async fn test_structurally_invalid_tokens_rejected_without_io() {
    let jwks = MockJwksServer::start(&[&TestKeypair::primary("key-1")]).await;
    let validator = validator_for(&jwks, settings());

    let oversized = "a".repeat(16 * 1024);
    for token in ["", "not-a-jwt", "a.b", oversized.as_str()] {
        let err = validator.validate_bearer(token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)), "got {err:?}");
    }
    assert_eq!(jwks.fetch_count().await, 0);
}
