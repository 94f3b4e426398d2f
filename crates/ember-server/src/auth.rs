//! Operator auth state
//!
//! The password hash and signing key live in settings; this cache keeps a
//! read-mostly snapshot so the boot path never pays a DB read per signed
//! URL. Invalidated explicitly whenever either value changes.
//!
//! One 32-byte secret signs both session cookies and URL tokens. Rotating
//! it is a single delete-and-regenerate that logs every browser out and
//! expires every issued boot-script URL together.

use crate::session;
use crate::store::{Store, KEY_PASSWORD_HASH, KEY_SESSION_KEY};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

/// Snapshot of the persisted auth state
#[derive(Debug, Clone, Default)]
pub struct AuthSnapshot {
    /// Argon2 hash of the operator password; empty when auth is disabled
    pub password_hash: String,
    /// Decoded signing key; empty when no key exists yet
    pub signing_key: Vec<u8>,
}

impl AuthSnapshot {
    /// Authentication is enabled iff a password has been set
    pub fn auth_enabled(&self) -> bool {
        !self.password_hash.is_empty()
    }

    /// Signing key as the Option the signer wants
    pub fn key(&self) -> Option<&[u8]> {
        if self.signing_key.is_empty() {
            None
        } else {
            Some(&self.signing_key)
        }
    }

    /// Does this request's Cookie header carry a valid session?
    pub fn has_valid_session(&self, cookie_header: Option<&str>) -> bool {
        let Some(header) = cookie_header else {
            return false;
        };
        let Some(value) = session::session_from_cookie_header(header) else {
            return false;
        };
        session::validate_session_value(&self.signing_key, value)
    }
}

/// Error type for auth operations
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("password cannot be empty")]
    EmptyPassword,

    #[error("invalid password")]
    InvalidPassword,

    #[error("a password is already set")]
    AlreadySet,

    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
}

/// Read-mostly auth cache
#[derive(Default)]
pub struct AuthCache {
    snapshot: RwLock<Option<AuthSnapshot>>,
}

impl AuthCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot, loading from the store on first use
    pub async fn snapshot(&self, store: &Store) -> AuthSnapshot {
        if let Some(snap) = self.snapshot.read().await.clone() {
            return snap;
        }

        let mut guard = self.snapshot.write().await;
        // Another task may have loaded while we waited for the lock
        if let Some(snap) = guard.clone() {
            return snap;
        }

        let snap = Self::load(store).await;
        *guard = Some(snap.clone());
        snap
    }

    async fn load(store: &Store) -> AuthSnapshot {
        let password_hash = match store.get_setting(KEY_PASSWORD_HASH).await {
            Ok(v) => v.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "failed to load password hash");
                String::new()
            }
        };
        let signing_key = match store.get_setting(KEY_SESSION_KEY).await {
            Ok(Some(hex_key)) => hex::decode(&hex_key).unwrap_or_default(),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "failed to load signing key");
                Vec::new()
            }
        };
        AuthSnapshot {
            password_hash,
            signing_key,
        }
    }

    /// Drop the snapshot; next read reloads from the store
    pub async fn invalidate(&self) {
        *self.snapshot.write().await = None;
    }

    /// Return the signing key, generating and persisting one if absent
    pub async fn ensure_signing_key(&self, store: &Store) -> Result<Vec<u8>, AuthError> {
        let snap = self.snapshot(store).await;
        if !snap.signing_key.is_empty() {
            return Ok(snap.signing_key);
        }

        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        store.set_setting(KEY_SESSION_KEY, &hex::encode(key)).await?;
        self.invalidate().await;
        Ok(key.to_vec())
    }

    /// Delete and regenerate the signing key, invalidating sessions and
    /// URL tokens in one step
    pub async fn rotate_signing_key(&self, store: &Store) -> Result<Vec<u8>, AuthError> {
        store.delete_setting(KEY_SESSION_KEY).await?;
        self.invalidate().await;
        self.ensure_signing_key(store).await
    }

    /// Set the initial operator password
    pub async fn set_password(&self, store: &Store, password: &str) -> Result<(), AuthError> {
        if password.is_empty() {
            return Err(AuthError::EmptyPassword);
        }
        let snap = self.snapshot(store).await;
        if snap.auth_enabled() {
            return Err(AuthError::AlreadySet);
        }
        self.write_password(store, password).await
    }

    /// Change the password after verifying the current one
    pub async fn change_password(
        &self,
        store: &Store,
        current: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        self.verify_password(store, current).await?;
        if new_password.is_empty() {
            return Err(AuthError::EmptyPassword);
        }
        self.write_password(store, new_password).await
    }

    /// Remove the password (and with it auth) after verifying it.
    /// The signing key goes too: with auth disabled, signed URLs degrade
    /// to unsigned and nothing should validate against a stale key.
    pub async fn remove_password(&self, store: &Store, current: &str) -> Result<(), AuthError> {
        self.verify_password(store, current).await?;
        store.delete_setting(KEY_PASSWORD_HASH).await?;
        store.delete_setting(KEY_SESSION_KEY).await?;
        self.invalidate().await;
        Ok(())
    }

    /// Check a login attempt against the stored hash
    pub async fn verify_password(&self, store: &Store, password: &str) -> Result<(), AuthError> {
        let snap = self.snapshot(store).await;
        if !snap.auth_enabled() {
            return Err(AuthError::InvalidPassword);
        }
        let parsed = PasswordHash::new(&snap.password_hash)
            .map_err(|e| AuthError::Hashing(e.to_string()))?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| AuthError::InvalidPassword)
    }

    async fn write_password(&self, store: &Store, password: &str) -> Result<(), AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AuthError::Hashing(e.to_string()))?
            .to_string();
        store.set_setting(KEY_PASSWORD_HASH, &hash).await?;
        self.invalidate().await;
        Ok(())
    }
}
