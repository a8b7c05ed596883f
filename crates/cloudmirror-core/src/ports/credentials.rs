//! Credential port
//!
//! Token acquisition and refresh live outside the engine. The engine asks for
//! a token before every range request and surfaces `AuthExpired` untouched.

use std::fmt;

use async_trait::async_trait;

use crate::domain::TransferError;

/// Opaque bearer token; its value is never printed
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token value for adapters that put it on the wire
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Source of bearer tokens
#[async_trait]
pub trait ICredentialProvider: Send + Sync {
    /// Return a currently valid token, or `TransferError::AuthExpired`
    async fn get_token(&self) -> Result<AccessToken, TransferError>;
}

/// Provider returning a fixed token, for sources that need no authentication
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    token: AccessToken,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(token),
        }
    }

    /// A provider for unauthenticated sources
    pub fn anonymous() -> Self {
        Self::new("")
    }
}

#[async_trait]
impl ICredentialProvider for StaticCredentials {
    async fn get_token(&self) -> Result<AccessToken, TransferError> {
        Ok(self.token.clone())
    }
}
