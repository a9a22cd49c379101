//! Error handling and edge case tests
//!
//! These tests verify proper error handling and edge case behavior:
//! - Credential validation boundaries
//! - Wrong passwords and corrupted records
//! - Unreadable persisted state
//! - Session token edge cases

use lumen_auth::migration::{Migrator, MigratorTrait};
use lumen_auth::session::SessionCache;
use lumen_auth::settings_manager::{AUTH_STATE_KEY, SESSION_KEY, VAULT_KEY};
use lumen_auth::{AuthError, AuthManager, AuthState, Credentials, SettingsManager};
use sea_orm::{Database, DatabaseConnection, DbErr};

const TEST_PASSWORD: &str = "correcthorse";

/// Helper function to create an in-memory database for testing
async fn create_test_db() -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

fn credentials(password: &str, extra: &str) -> Credentials {
    Credentials {
        account_name: "alice".to_string(),
        password: password.to_string(),
        extra_secret: extra.to_string(),
    }
}

#[tokio::test]
async fn test_password_length_boundary() {
    let db = create_test_db().await.unwrap();
    let auth = AuthManager::new(db);

    // 7 scalar values: rejected, nothing persisted
    let result = auth
        .create_account(credentials("1234567", "batterystaple"), |_| {})
        .await;
    assert!(matches!(result, Err(AuthError::Validation(_))));
    assert!(!auth.has_account().await.unwrap());

    // 8 scalar values: accepted
    auth.create_account(credentials("12345678", "batterystaple"), |_| {})
        .await
        .unwrap();
    assert!(auth.has_account().await.unwrap());
}

#[tokio::test]
async fn test_extra_secret_length_boundary() {
    let db = create_test_db().await.unwrap();
    let auth = AuthManager::new(db);

    let result = auth
        .create_account(credentials(TEST_PASSWORD, "abc"), |_| {})
        .await;
    assert!(matches!(result, Err(AuthError::Validation(_))));
    assert!(!auth.has_account().await.unwrap());

    auth.create_account(credentials(TEST_PASSWORD, "abcd"), |_| {})
        .await
        .unwrap();
    assert!(auth.has_account().await.unwrap());
}

#[tokio::test]
async fn test_multibyte_password_counted_in_scalar_values() {
    let db = create_test_db().await.unwrap();
    let auth = AuthManager::new(db);

    // 8 CJK characters are 24 UTF-8 bytes but exactly 8 scalar values
    auth.create_account(credentials("密密密密密密密密", "batterystaple"), |_| {})
        .await
        .unwrap();
    assert!(auth.has_account().await.unwrap());
}

#[tokio::test]
async fn test_password_case_sensitivity() {
    let db = create_test_db().await.unwrap();
    let auth = AuthManager::new(db);

    auth.create_account(credentials("password", "batterystaple"), |_| {})
        .await
        .unwrap();
    auth.logout().await.unwrap();

    assert!(auth.unlock_with_password("PASSWORD").await.is_err());
    assert!(auth.unlock_with_password("Password").await.is_err());
    assert!(auth.unlock_with_password("password").await.is_ok());
}

#[tokio::test]
async fn test_wrong_password_error_is_undiscriminated() {
    let db = create_test_db().await.unwrap();
    let auth = AuthManager::new(db.clone());

    auth.create_account(credentials(TEST_PASSWORD, "batterystaple"), |_| {})
        .await
        .unwrap();

    let wrong = auth.unlock_with_password("wrong_password").await;

    // Now corrupt the record and try the right password
    let settings = SettingsManager::new(db);
    settings.set(VAULT_KEY, "{\"ciphertext\":\"AAAA\",\"iv\":\"AAAA\",\"salt\":\"AAAA\",\"publicIdentity\":\"npub1x\",\"isEntranceKey\":true}")
        .await
        .unwrap();
    let corrupt = auth.unlock_with_password(TEST_PASSWORD).await;

    // Both failures surface identically
    assert!(matches!(wrong, Err(AuthError::Decrypt)));
    assert!(matches!(corrupt, Err(AuthError::Decrypt)));
    assert_eq!(
        wrong.unwrap_err().to_string(),
        corrupt.unwrap_err().to_string()
    );
}

#[tokio::test]
async fn test_unparsable_vault_record_treated_as_no_account() {
    let db = create_test_db().await.unwrap();
    let settings = SettingsManager::new(db.clone());

    settings.set(VAULT_KEY, "this is not json").await.unwrap();

    let auth = AuthManager::new(db);
    assert!(!auth.has_account().await.unwrap());
    assert!(auth.account_info().await.unwrap().is_none());

    let result = auth.unlock_with_password(TEST_PASSWORD).await;
    assert!(matches!(result, Err(AuthError::Decrypt)));
}

#[tokio::test]
async fn test_vault_record_with_missing_fields_treated_as_no_account() {
    let db = create_test_db().await.unwrap();
    let settings = SettingsManager::new(db.clone());

    settings
        .set(VAULT_KEY, "{\"ciphertext\":\"abc\",\"iv\":\"def\"}")
        .await
        .unwrap();

    let auth = AuthManager::new(db);
    assert!(!auth.has_account().await.unwrap());
    assert!(auth.account_info().await.unwrap().is_none());
}

#[tokio::test]
async fn test_tampered_identity_anchor_rejected_on_unlock() {
    let db = create_test_db().await.unwrap();
    let auth = AuthManager::new(db.clone());

    auth.create_account(credentials(TEST_PASSWORD, "batterystaple"), |_| {})
        .await
        .unwrap();
    auth.logout().await.unwrap();

    // Swap the stored identity anchor for a different (valid) npub
    let settings = SettingsManager::new(db);
    let raw = settings.get(VAULT_KEY).await.unwrap().unwrap();
    let mut record: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let secp = secp256k1::Secp256k1::new();
    let unrelated = lumen_auth::DerivedSecret::from_bytes({
        let mut bytes = [0u8; 32];
        bytes[31] = 9;
        bytes
    });
    let (other, _nsec) =
        lumen_auth::encoding::scalar_to_public_identity(&secp, &unrelated).unwrap();
    record["publicIdentity"] = serde_json::Value::String(other);
    settings
        .set(VAULT_KEY, &record.to_string())
        .await
        .unwrap();

    let result = auth.unlock_with_password(TEST_PASSWORD).await;
    assert!(matches!(result, Err(AuthError::Decrypt)));
    assert_eq!(auth.state().await, AuthState::LoggedOut);
}

#[tokio::test]
async fn test_unreadable_auth_state_restores_logged_out() {
    let db = create_test_db().await.unwrap();
    let settings = SettingsManager::new(db.clone());

    settings
        .set(AUTH_STATE_KEY, "{{{ definitely not json")
        .await
        .unwrap();

    let auth = AuthManager::new(db);
    let restored = auth.restore_on_startup().await.unwrap();
    assert_eq!(restored, AuthState::LoggedOut);
}

#[tokio::test]
async fn test_auth_state_pointing_at_missing_vault_restores_logged_out() {
    let db = create_test_db().await.unwrap();
    let auth = AuthManager::new(db.clone());

    auth.create_account(credentials(TEST_PASSWORD, "batterystaple"), |_| {})
        .await
        .unwrap();

    // The vault record vanishes but the last-known state survives
    let settings = SettingsManager::new(db.clone());
    settings.remove(VAULT_KEY).await.unwrap();

    let fresh = AuthManager::new(db);
    let restored = fresh.restore_on_startup().await.unwrap();
    assert_eq!(restored, AuthState::LoggedOut);
}

#[tokio::test]
async fn test_expired_session_token_is_purged_on_read() {
    let db = create_test_db().await.unwrap();
    let settings = SettingsManager::new(db);

    let expired = serde_json::json!({
        "password": TEST_PASSWORD,
        "expiry": chrono::Utc::now().timestamp_millis() - 1_000,
    });
    settings
        .set(SESSION_KEY, &expired.to_string())
        .await
        .unwrap();

    let cache = SessionCache::new(settings.clone());
    assert_eq!(cache.get().await.unwrap(), None);

    // The persisted copy is gone too
    assert!(!settings.exists(SESSION_KEY).await.unwrap());
}

#[tokio::test]
async fn test_garbled_session_token_treated_as_absent() {
    let db = create_test_db().await.unwrap();
    let settings = SettingsManager::new(db);

    settings.set(SESSION_KEY, "not a token").await.unwrap();

    let cache = SessionCache::new(settings.clone());
    assert_eq!(cache.get().await.unwrap(), None);
    assert!(!settings.exists(SESSION_KEY).await.unwrap());
}

#[tokio::test]
async fn test_session_set_then_clear() {
    let db = create_test_db().await.unwrap();
    let settings = SettingsManager::new(db);
    let cache = SessionCache::new(settings.clone());

    cache.set(TEST_PASSWORD).await.unwrap();
    assert_eq!(cache.get().await.unwrap(), Some(TEST_PASSWORD.to_string()));
    assert!(settings.exists(SESSION_KEY).await.unwrap());

    cache.clear().await.unwrap();
    assert_eq!(cache.get().await.unwrap(), None);
    assert!(!settings.exists(SESSION_KEY).await.unwrap());
}

#[tokio::test]
async fn test_logout_does_not_affect_other_settings() {
    let db = create_test_db().await.unwrap();
    let settings = SettingsManager::new(db.clone());
    let auth = AuthManager::new(db);

    auth.create_account(credentials(TEST_PASSWORD, "batterystaple"), |_| {})
        .await
        .unwrap();
    settings.set("lumen.theme", "dark").await.unwrap();

    auth.logout().await.unwrap();

    // The vault and unrelated settings survive a logout
    assert!(settings.exists(VAULT_KEY).await.unwrap());
    assert_eq!(
        settings.get("lumen.theme").await.unwrap(),
        Some("dark".to_string())
    );
    // The session and last-known state do not
    assert!(!settings.exists(SESSION_KEY).await.unwrap());
    assert!(!settings.exists(AUTH_STATE_KEY).await.unwrap());
}
