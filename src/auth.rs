//! Credential provider for backend requests
//!
//! The upload pipeline never talks to a process-wide credential singleton;
//! every backend client is handed a `TokenProvider` whose lifetime is tied
//! to the authenticated session that created it.

use crate::error::AuthError;
use zeroize::Zeroize;

/// Source of bearer credentials for authenticated backend calls.
///
/// Implementations must be cheap to call: the HTTP client asks for a fresh
/// token on every request so short-lived credentials stay valid.
pub trait TokenProvider: Send + Sync {
    /// Return the current bearer token.
    fn bearer_token(&self) -> Result<String, AuthError>;

    /// Whether a credential is currently available.
    ///
    /// Used to reject uploads before any side effect when the caller is
    /// not authenticated.
    fn available(&self) -> bool {
        self.bearer_token().is_ok()
    }
}

/// Provider holding a fixed token for the lifetime of a session.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn bearer_token(&self) -> Result<String, AuthError> {
        if self.token.is_empty() {
            return Err(AuthError::Missing("empty token".into()));
        }
        Ok(self.token.clone())
    }
}

impl Drop for StaticTokenProvider {
    fn drop(&mut self) {
        // Clear the credential from memory
        self.token.zeroize();
    }
}

/// Provider reading the token from an environment variable on each call.
pub struct EnvTokenProvider {
    var: String,
}

impl EnvTokenProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl TokenProvider for EnvTokenProvider {
    fn bearer_token(&self) -> Result<String, AuthError> {
        match std::env::var(&self.var) {
            Ok(token) if !token.is_empty() => Ok(token),
            Ok(_) => Err(AuthError::Missing(format!("{} is empty", self.var))),
            Err(_) => Err(AuthError::Missing(format!("{} is not set", self.var))),
        }
    }
}
