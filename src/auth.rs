//! Account registration and password login
//!
//! Passwords are stored as Argon2id PHC strings with a random salt per user.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand_core::OsRng;
use thiserror::Error;
use tracing::{info, warn};

use crate::database::{DatabaseError, DbHandle, User, UserRepository};

/// Shortest accepted password, in characters
pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Unknown email and wrong password look the same to callers
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("password hashing failed: {0}")]
    Hash(String),
}

pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// Registration and login against the users table
pub struct AuthService {
    db: DbHandle,
    hasher: Argon2<'static>,
}

impl AuthService {
    pub fn new(db: DbHandle) -> Self {
        Self {
            db,
            hasher: Argon2::default(),
        }
    }

    /// Create a user after validating the input
    ///
    /// Emails are stored trimmed and lowercased.
    pub fn register(&self, full_name: &str, email: &str, password: &str) -> AuthResult<User> {
        let full_name = full_name.trim();
        if full_name.is_empty() {
            return Err(AuthError::InvalidInput("name must not be empty".to_string()));
        }
        let email = normalize_email(email)?;
        validate_password(password)?;

        let hash = self.hash(password)?;
        let user = self.db.with_conn(|conn| -> AuthResult<User> {
            Ok(UserRepository::new(conn).create(full_name, &email, &hash)?)
        })?;
        info!("Registered user {}", user.email);
        Ok(user)
    }

    pub fn login(&self, email: &str, password: &str) -> AuthResult<User> {
        let email = email.trim().to_lowercase();
        let user = self
            .db
            .with_conn(|conn| -> AuthResult<Option<User>> {
                Ok(UserRepository::new(conn).find_by_email(&email)?)
            })?
            .ok_or_else(|| {
                warn!("Login attempt for unknown email");
                AuthError::InvalidCredentials
            })?;

        self.verify(password, &user.password_hash)?;
        info!("User {} logged in", user.email);
        Ok(user)
    }

    /// Replace the password after checking the current one
    pub fn change_password(&self, user_id: i64, current: &str, new: &str) -> AuthResult<()> {
        let user = self
            .db
            .with_conn(|conn| -> AuthResult<Option<User>> {
                Ok(UserRepository::new(conn).find_by_id(user_id)?)
            })?
            .ok_or(AuthError::InvalidCredentials)?;

        self.verify(current, &user.password_hash)?;
        validate_password(new)?;

        let hash = self.hash(new)?;
        self.db.with_conn(|conn| -> AuthResult<bool> {
            Ok(UserRepository::new(conn).update_password_hash(user_id, &hash)?)
        })?;
        info!("Password changed for user {}", user_id);
        Ok(())
    }

    fn hash(&self, password: &str) -> AuthResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.hasher
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Hash(e.to_string()))
    }

    fn verify(&self, password: &str, stored: &str) -> AuthResult<()> {
        let parsed = PasswordHash::new(stored).map_err(|e| AuthError::Hash(e.to_string()))?;
        self.hasher
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| AuthError::InvalidCredentials)
    }
}

fn normalize_email(email: &str) -> AuthResult<String> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(email)
    } else {
        Err(AuthError::InvalidInput(format!(
            "'{}' is not a valid email address",
            email
        )))
    }
}

fn validate_password(password: &str) -> AuthResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::InvalidInput(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{ConnectionManager, RetryPolicy, SqliteDriver};

    async fn service() -> AuthService {
        let manager =
            ConnectionManager::new(SqliteDriver::in_memory()).with_retry_policy(RetryPolicy::once());
        AuthService::new(manager.open().await.unwrap())
    }

    #[tokio::test]
    async fn test_register_and_login() {
        let auth = service().await;

        let user = auth
            .register("Grace Hopper", " Grace@Example.com ", "correct horse")
            .unwrap();
        assert_eq!(user.email, "grace@example.com");
        assert!(user.password_hash.starts_with("$argon2id$"));

        let logged_in = auth.login("grace@example.com", "correct horse").unwrap();
        assert_eq!(logged_in.user_id, user.user_id);
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let auth = service().await;
        auth.register("A", "a@example.com", "password1").unwrap();

        let wrong_password = auth.login("a@example.com", "password2").unwrap_err();
        let unknown_email = auth.login("b@example.com", "password1").unwrap_err();

        assert!(matches!(wrong_password, AuthError::InvalidCredentials));
        assert!(matches!(unknown_email, AuthError::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
    }

    #[tokio::test]
    async fn test_register_validation() {
        let auth = service().await;

        assert!(matches!(
            auth.register("", "a@example.com", "password1"),
            Err(AuthError::InvalidInput(_))
        ));
        assert!(matches!(
            auth.register("A", "not-an-email", "password1"),
            Err(AuthError::InvalidInput(_))
        ));
        assert!(matches!(
            auth.register("A", "a@example.com", "short"),
            Err(AuthError::InvalidInput(_))
        ));

        auth.register("A", "a@example.com", "password1").unwrap();
        assert!(matches!(
            auth.register("B", "A@example.com", "password1"),
            Err(AuthError::Database(DatabaseError::AlreadyExists(_)))
        ));
    }

    #[tokio::test]
    async fn test_change_password() {
        let auth = service().await;
        let user = auth.register("A", "a@example.com", "password1").unwrap();

        assert!(matches!(
            auth.change_password(user.user_id, "wrong-current", "password2"),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.change_password(user.user_id, "password1", "short"),
            Err(AuthError::InvalidInput(_))
        ));

        auth.change_password(user.user_id, "password1", "password2")
            .unwrap();
        assert!(auth.login("a@example.com", "password1").is_err());
        assert!(auth.login("a@example.com", "password2").is_ok());
    }
}
