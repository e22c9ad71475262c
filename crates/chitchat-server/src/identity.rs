//! Identity provider contract and a local SQLite-backed implementation.
//!
//! Rejections carry the message shown to the user verbatim.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rand::RngCore;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use chitchat_shared::constants::MIN_PASSWORD_LEN;
use chitchat_shared::UserId;
use chitchat_store::{Account, Database, StoreError};

use crate::error::{AuthError, ValidationError};

const EMAIL_IN_USE: &str = "The email address is already in use by another account.";
const NO_SUCH_USER: &str = "There is no user record corresponding to this identifier.";
const WRONG_PASSWORD: &str = "The password is invalid or the user does not have a password.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignInOutcome {
    pub token: String,
    pub user: AuthenticatedUser,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<UserId, AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<SignInOutcome, AuthError>;

    async fn sign_out(&self, token: &str) -> Result<(), AuthError>;

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError>;

    async fn update_display_name(&self, user: &UserId, display_name: &str) -> Result<(), AuthError>;

    /// The user behind a session token.
    async fn resolve(&self, token: &str) -> Result<AuthenticatedUser, AuthError>;
}

/// Normalized email, or a validation error.
pub fn validate_email(email: &str) -> Result<String, ValidationError> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(ValidationError::InvalidEmail);
    }
    Ok(email.to_ascii_lowercase())
}

pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooShort {
            min: MIN_PASSWORD_LEN,
        });
    }
    Ok(())
}

pub fn validate_display_name(name: &str) -> Result<&str, ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyDisplayName);
    }
    Ok(name)
}

async fn hash_password(password: &str, cost: u32) -> Result<String, AuthError> {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

async fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let (password, hash) = (password.to_owned(), hash.to_owned());
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Accounts in SQLite, session tokens in memory.
pub struct LocalIdentityProvider {
    db: Mutex<Database>,
    tokens: RwLock<HashMap<String, UserId>>,
    bcrypt_cost: u32,
}

impl LocalIdentityProvider {
    pub fn new(db: Database) -> Self {
        Self::with_cost(db, bcrypt::DEFAULT_COST)
    }

    pub fn with_cost(db: Database, bcrypt_cost: u32) -> Self {
        Self {
            db: Mutex::new(db),
            tokens: RwLock::new(HashMap::new()),
            bcrypt_cost,
        }
    }

    pub fn shared(db: Database, bcrypt_cost: u32) -> Arc<dyn IdentityProvider> {
        Arc::new(Self::with_cost(db, bcrypt_cost))
    }

    pub async fn active_sessions(&self) -> usize {
        self.tokens.read().await.len()
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<UserId, AuthError> {
        let email = validate_email(email)?;
        validate_password(password)?;
        let display_name = validate_display_name(display_name)?;

        let account = Account {
            user_id: Uuid::new_v4().simple().to_string(),
            email,
            display_name: display_name.to_string(),
            password_hash: hash_password(password, self.bcrypt_cost).await?,
            created_at: Utc::now(),
        };

        match self.db.lock().await.create_account(&account) {
            Ok(()) => {}
            Err(StoreError::AlreadyExists) => return Err(AuthError::Rejected(EMAIL_IN_USE.into())),
            Err(e) => return Err(e.into()),
        }

        info!(user = %account.user_id, "Account created");
        Ok(UserId(account.user_id))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<SignInOutcome, AuthError> {
        let email = validate_email(email)?;
        validate_password(password)?;

        let account = self
            .db
            .lock()
            .await
            .find_account_by_email(&email)?
            .ok_or_else(|| AuthError::Rejected(NO_SUCH_USER.into()))?;

        if !verify_password(password, &account.password_hash).await? {
            debug!(user = %account.user_id, "Sign-in rejected");
            return Err(AuthError::Rejected(WRONG_PASSWORD.into()));
        }

        let token = random_hex(32);
        let user_id = UserId(account.user_id);
        self.tokens
            .write()
            .await
            .insert(token.clone(), user_id.clone());

        info!(user = %user_id, "Signed in");
        Ok(SignInOutcome {
            token,
            user: AuthenticatedUser {
                user_id,
                display_name: account.display_name,
            },
        })
    }

    async fn sign_out(&self, token: &str) -> Result<(), AuthError> {
        match self.tokens.write().await.remove(token) {
            Some(user) => {
                info!(user = %user, "Signed out");
                Ok(())
            }
            None => Err(AuthError::InvalidToken),
        }
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let email = validate_email(email)?;
        let db = self.db.lock().await;
        let account = db
            .find_account_by_email(&email)?
            .ok_or_else(|| AuthError::Rejected(NO_SUCH_USER.into()))?;
        db.record_password_reset(&account.user_id)?;
        info!(user = %account.user_id, "Password reset requested");
        Ok(())
    }

    async fn update_display_name(&self, user: &UserId, display_name: &str) -> Result<(), AuthError> {
        let display_name = validate_display_name(display_name)?;
        match self.db.lock().await.update_display_name(user.as_str(), display_name) {
            Ok(()) => {}
            Err(StoreError::NotFound) => return Err(AuthError::Rejected(NO_SUCH_USER.into())),
            Err(e) => return Err(e.into()),
        }
        debug!(user = %user, display_name, "Display name updated");
        Ok(())
    }

    async fn resolve(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let user_id = self
            .tokens
            .read()
            .await
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)?;

        let account = match self.db.lock().await.get_account(user_id.as_str()) {
            Ok(account) => account,
            Err(StoreError::NotFound) => return Err(AuthError::InvalidToken),
            Err(e) => return Err(e.into()),
        };
        Ok(AuthenticatedUser {
            user_id,
            display_name: account.display_name,
        })
    }
}
