//! Client-side error taxonomy.

use stocktake_core::DomainError;
use stocktake_events::SseError;
use thiserror::Error;

use crate::credentials::CredentialError;

/// Shown when the server gave no usable message.
pub const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Rejected before any I/O; the user can fix the input and retry.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Missing or expired credential, or the server refused it.
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("API error ({status}): {}", message.as_deref().unwrap_or("no message"))]
    Server { status: u16, message: Option<String> },

    #[error("request timed out")]
    Timeout,

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("local storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ClientError {
    /// Text suitable for showing to the operator.
    ///
    /// Prefers the server-supplied message; falls back to a generic string.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Validation(msg) => msg.clone(),
            ClientError::Authentication(_) => {
                "Your sign-in has expired. Please sign in again.".to_string()
            }
            ClientError::Server {
                message: Some(msg), ..
            } if !msg.trim().is_empty() => msg.clone(),
            ClientError::Network(_) => {
                "Unable to reach the server. Check the connection and try again.".to_string()
            }
            ClientError::Domain(DomainError::InvalidTransition(msg)) => msg.clone(),
            ClientError::Domain(DomainError::Validation(msg)) => msg.clone(),
            _ => GENERIC_FAILURE.to_string(),
        }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, ClientError::Authentication(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

impl From<CredentialError> for ClientError {
    fn from(err: CredentialError) -> Self {
        ClientError::Authentication(err.to_string())
    }
}

impl From<SseError> for ClientError {
    fn from(err: SseError) -> Self {
        ClientError::Decode(err.to_string())
    }
}

impl From<anyhow::Error> for ClientError {
    fn from(err: anyhow::Error) -> Self {
        ClientError::Storage(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_message_is_preferred() {
        let err = ClientError::Server {
            status: 404,
            message: Some("Drum not found".to_string()),
        };
        assert_eq!(err.user_message(), "Drum not found");
    }

    #[test]
    fn missing_server_message_falls_back() {
        let err = ClientError::Server {
            status: 500,
            message: None,
        };
        assert_eq!(err.user_message(), GENERIC_FAILURE);
        assert_eq!(ClientError::Timeout.user_message(), GENERIC_FAILURE);
    }

    #[test]
    fn credential_failures_are_authentication_errors() {
        let err: ClientError = CredentialError::Missing.into();
        assert!(err.is_authentication());
    }
}
