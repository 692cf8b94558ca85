//! Bearer credential supply.
//!
//! Token acquisition and renewal live outside this crate. The client only
//! asks a [`CredentialSupplier`] for the current bearer token before each
//! authenticated request.

use std::fmt;

use async_trait::async_trait;

use super::error::BackendError;

/// Source of bearer tokens for authenticated requests.
#[async_trait]
pub trait CredentialSupplier: Send + Sync + fmt::Debug {
    /// Returns the bearer token to send, without the `Bearer ` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Credential`] if no token is available.
    async fn bearer_token(&self) -> Result<String, BackendError>;
}

/// A fixed token, taken from the `authid` option.
#[derive(Clone)]
pub struct StaticBearer {
    token: String,
}

impl StaticBearer {
    /// Wraps a token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for StaticBearer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticBearer")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl CredentialSupplier for StaticBearer {
    async fn bearer_token(&self) -> Result<String, BackendError> {
        if self.token.is_empty() {
            return Err(BackendError::Credential {
                message: "empty bearer token".to_string(),
            });
        }
        Ok(self.token.clone())
    }
}
