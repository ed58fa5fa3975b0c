// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Tests for credential persistence across process restarts.

mod common;

use common::{id_token, test_config, MockBackend, MockPlatform};
use fable_account::models::{CredentialKind, ProviderKind, SessionState};
use fable_account::services::ProviderRegistry;
use fable_account::store::keys::PENDING_GRANT_PREFIX;
use fable_account::store::{MemorySecureStore, SealedFileStore, TokenStore};
use fable_account::AppContext;
use std::sync::Arc;

const SEAL_KEY: &[u8] = b"device-seal-key-for-tests-000000";

fn sealed_tokens(path: &std::path::Path) -> TokenStore {
    let store = SealedFileStore::new(path, SEAL_KEY).expect("seal key is non-empty");
    TokenStore::new(Arc::new(store))
}

#[tokio::test]
async fn test_session_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");

    {
        let tokens = sealed_tokens(&path);
        tokens.set(CredentialKind::Access, "opaque-access").unwrap();
        tokens
            .set(CredentialKind::Id, &id_token("abc123", Some("a@b.com"), 3600))
            .unwrap();
        tokens.set_provider(ProviderKind::Google).unwrap();
    }

    // A fresh process over the same file restores the session offline
    let ctx = AppContext::new(
        test_config(),
        sealed_tokens(&path),
        ProviderRegistry::new(),
        Arc::new(MockBackend::default()),
        Arc::new(MockPlatform::new()),
    )
    .expect("context should build");

    assert_eq!(
        ctx.session.check_login_status(),
        SessionState::Active {
            user_id: "abc123".to_string(),
            provider: ProviderKind::Google,
        }
    );
}

#[tokio::test]
async fn test_logout_invalidates_persisted_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");

    let tokens = sealed_tokens(&path);
    tokens.set(CredentialKind::Access, "opaque-access").unwrap();
    tokens.set(CredentialKind::Refresh, "refresh").unwrap();
    tokens.set_provider(ProviderKind::Apple).unwrap();

    tokens.clear_all().unwrap();

    let reopened = sealed_tokens(&path);
    assert!(reopened.is_empty());
    assert_eq!(reopened.access_token(), None);
    assert_eq!(reopened.provider(), None);
}

#[tokio::test]
async fn test_tampered_file_reads_as_logged_out() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");

    let tokens = sealed_tokens(&path);
    tokens.set(CredentialKind::Access, "opaque-access").unwrap();
    tokens
        .set(CredentialKind::Id, &id_token("abc123", None, 3600))
        .unwrap();
    tokens.set_provider(ProviderKind::Google).unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, contents.replace("opaque-access", "forged-access")).unwrap();

    let reopened = sealed_tokens(&path);
    assert!(reopened.is_empty());
    assert!(!reopened.is_access_token_valid());
}

#[tokio::test]
async fn test_wrong_device_key_reads_as_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");

    sealed_tokens(&path)
        .set(CredentialKind::Access, "opaque-access")
        .unwrap();

    let other = SealedFileStore::new(&path, b"another-device".to_vec()).unwrap();
    let tokens = TokenStore::new(Arc::new(other));
    assert_eq!(tokens.access_token(), None);
}

#[tokio::test]
async fn test_clear_all_keeps_pending_grants() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");
    let grant_key = format!("{PENDING_GRANT_PREFIX}tx-1");

    let tokens = sealed_tokens(&path);
    tokens.set(CredentialKind::Access, "opaque-access").unwrap();
    tokens.set_provider(ProviderKind::Google).unwrap();
    tokens.backing().write(&grant_key, "{}").unwrap();

    tokens.clear_all().unwrap();

    let reopened = sealed_tokens(&path);
    assert!(reopened.is_empty());
    assert_eq!(
        reopened.backing().read(&grant_key).unwrap().as_deref(),
        Some("{}")
    );
}

#[tokio::test]
async fn test_context_applies_configured_clock_skew() {
    let config = fable_account::config::Config {
        clock_skew_secs: 0,
        ..test_config()
    };
    let tokens = TokenStore::new(Arc::new(MemorySecureStore::new()));
    // Inside the default skew window, outside a zero one
    tokens
        .set(CredentialKind::Access, &id_token("abc123", None, 30))
        .unwrap();
    assert!(!tokens.is_access_token_valid());

    let ctx = AppContext::new(
        config,
        tokens,
        ProviderRegistry::new(),
        Arc::new(MockBackend::default()),
        Arc::new(MockPlatform::new()),
    )
    .expect("context should build");

    assert!(ctx.tokens.is_access_token_valid());
}
