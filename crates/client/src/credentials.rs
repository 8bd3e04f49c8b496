//! Bearer-token source.
//!
//! Tokens are short-lived and owned by whoever handles sign-in. The client
//! asks for one per request and never keeps it around afterwards.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CredentialError {
    #[error("no credential available")]
    Missing,
    #[error("credential expired")]
    Expired,
    #[error("credential provider failed: {0}")]
    Provider(String),
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Fetch a fresh bearer token for a single request.
    async fn bearer_token(&self) -> Result<String, CredentialError>;
}

#[async_trait]
impl<P> CredentialProvider for Arc<P>
where
    P: CredentialProvider + ?Sized,
{
    async fn bearer_token(&self) -> Result<String, CredentialError> {
        (**self).bearer_token().await
    }
}

/// A fixed token (e.g. from configuration). `None` means "not signed in".
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.trim().is_empty()))
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn bearer_token(&self) -> Result<String, CredentialError> {
        self.0.clone().ok_or(CredentialError::Missing)
    }
}

/// Re-reads an environment variable on every request, so an external agent
/// can rotate the token without restarting the station.
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl CredentialProvider for EnvToken {
    async fn bearer_token(&self) -> Result<String, CredentialError> {
        match std::env::var(&self.var) {
            Ok(token) if !token.trim().is_empty() => Ok(token),
            _ => Err(CredentialError::Missing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_token_without_value_is_missing() {
        let provider = StaticToken::new(Some("  ".to_string()));
        assert!(matches!(
            provider.bearer_token().await,
            Err(CredentialError::Missing)
        ));

        let provider = StaticToken::new(Some("abc".to_string()));
        assert_eq!(provider.bearer_token().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn env_token_reports_missing_variable() {
        let provider = EnvToken::new("STOCKTAKE_TEST_TOKEN_THAT_IS_NEVER_SET");
        assert!(provider.bearer_token().await.is_err());
    }
}
