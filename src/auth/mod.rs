//! Authentication Module
//!
//! Provides a single shared-credential check for CONNECT, with the password
//! stored either in plaintext or as an argon2 PHC hash.

use argon2::password_hash::{PasswordHash, PasswordVerifier};
use argon2::Argon2;

use crate::config::AuthConfig;


/// Stored password
enum Secret {
    None,
    /// Password (plaintext)
    Plain(String),
    /// argon2 PHC string
    Hash(String),
}

/// Authentication provider
pub struct AuthProvider {
    /// Whether clients must authenticate
    required: bool,
    user: Option<String>,
    secret: Secret,
}

impl AuthProvider {
    /// Create a new auth provider from configuration
    pub fn new(config: &AuthConfig) -> Self {
        let secret = match (&config.password, &config.password_hash) {
            (_, Some(hash)) => Secret::Hash(hash.clone()),
            (Some(password), None) => Secret::Plain(password.clone()),
            (None, None) => Secret::None,
        };

        Self {
            required: config.required,
            user: config.user.clone(),
            secret,
        }
    }

    /// Provider that accepts every client
    pub fn disabled() -> Self {
        Self {
            required: false,
            user: None,
            secret: Secret::None,
        }
    }

    /// Check if clients must authenticate
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Verify CONNECT credentials
    pub fn authenticate(&self, user: Option<&str>, pass: Option<&str>) -> bool {
        if !self.required {
            return true;
        }

        let (Some(user), Some(expected)) = (user, self.user.as_deref()) else {
            return false;
        };
        if user != expected {
            return false;
        }

        let pass = pass.unwrap_or("");
        match &self.secret {
            Secret::Plain(stored) => pass == stored.as_str(),
            Secret::Hash(stored) => verify_hash(pass, stored),
            Secret::None => false,
        }
    }
}

/// Verify a password against an argon2 PHC string
fn verify_hash(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

impl std::fmt::Debug for AuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthProvider")
            .field("required", &self.required)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}
