//! Stocktake server API.
//!
//! [`StocktakeBackend`] is the seam between the coordination logic and the
//! wire. [`HttpBackend`] is the JSON-over-HTTP implementation; tests plug in
//! scripted backends.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use stocktake_core::{ScanId, SessionId};
use stocktake_scanning::{ScanRecord, ScanResult, ScanSubmission, Session};

use crate::credentials::CredentialProvider;
use crate::error::ClientError;

/// A session as described by the server.
///
/// Start responses carry `{id, name}`, reconciliation carries
/// `{id, location}`; anything missing is filled in by [`Self::into_session`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSession {
    pub id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl RemoteSession {
    /// Fill gaps: location from the request, name from the id, start time
    /// from the local clock.
    pub fn into_session(self, fallback_location: Option<String>, now: DateTime<Utc>) -> Session {
        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.id.to_string());
        Session {
            location: self.location.or(fallback_location),
            started_at: self.started_at.unwrap_or(now),
            name,
            id: self.id,
        }
    }
}

#[async_trait]
pub trait StocktakeBackend: Send + Sync {
    /// The session the server considers active for this user, if any.
    async fn current_session(&self) -> Result<Option<RemoteSession>, ClientError>;

    async fn start_session(&self, location: Option<&str>) -> Result<RemoteSession, ClientError>;

    /// Returns the server's acknowledgement message, if it sent one.
    async fn end_session(&self, session_id: &SessionId) -> Result<Option<String>, ClientError>;

    /// A server-side rejection is `Ok` with `success == false`.
    async fn submit_scan(&self, submission: &ScanSubmission) -> Result<ScanResult, ClientError>;

    async fn session_scans(&self, session_id: &SessionId) -> Result<Vec<ScanRecord>, ClientError>;
}

#[async_trait]
impl<B> StocktakeBackend for Arc<B>
where
    B: StocktakeBackend + ?Sized,
{
    async fn current_session(&self) -> Result<Option<RemoteSession>, ClientError> {
        (**self).current_session().await
    }

    async fn start_session(&self, location: Option<&str>) -> Result<RemoteSession, ClientError> {
        (**self).start_session(location).await
    }

    async fn end_session(&self, session_id: &SessionId) -> Result<Option<String>, ClientError> {
        (**self).end_session(session_id).await
    }

    async fn submit_scan(&self, submission: &ScanSubmission) -> Result<ScanResult, ClientError> {
        (**self).submit_scan(submission).await
    }

    async fn session_scans(&self, session_id: &SessionId) -> Result<Vec<ScanRecord>, ClientError> {
        (**self).session_scans(session_id).await
    }
}

// ---- wire types ----

/// Every response is `{success, message?, error?, ...}`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    body: T,
}

impl<T> Envelope<T> {
    fn accept(self, status: StatusCode) -> Result<(T, Option<String>), ClientError> {
        if self.success {
            Ok((self.body, self.message))
        } else {
            Err(ClientError::Server {
                status: status.as_u16(),
                message: self.message.or(self.error),
            })
        }
    }
}

#[derive(Debug, Deserialize)]
struct SessionBody {
    #[serde(default)]
    session: Option<RemoteSession>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScanBody {
    #[serde(default)]
    scan_id: Option<ScanId>,
}

#[derive(Debug, Deserialize)]
struct ScansBody {
    #[serde(default)]
    scans: Vec<ScanRecord>,
}

#[derive(Debug, Deserialize)]
struct NoBody {}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct StartRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScanRequest<'a> {
    barcode: &'a str,
    session_id: &'a str,
    device_id: String,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<&'a str>,
}

/// JSON-over-HTTP backend with bearer auth.
#[derive(Clone)]
pub struct HttpBackend {
    api_url: String,
    http: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpBackend {
    pub fn new(
        api_url: impl Into<String>,
        request_timeout: Duration,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;

        Ok(Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            http,
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    /// Attach a fresh token, send, and decode the envelope.
    ///
    /// The token is fetched per call and dropped with the request.
    async fn send<T>(
        &self,
        request: RequestBuilder,
    ) -> Result<(Envelope<T>, StatusCode), ClientError>
    where
        T: DeserializeOwned,
    {
        let token = self.credentials.bearer_token().await?;
        let resp = request.bearer_auth(token).send().await?;
        let status = resp.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let message = error_message(resp).await;
            return Err(ClientError::Authentication(
                message.unwrap_or_else(|| status.to_string()),
            ));
        }

        if !status.is_success() {
            return Err(ClientError::Server {
                status: status.as_u16(),
                message: error_message(resp).await,
            });
        }

        let envelope = resp.json::<Envelope<T>>().await?;
        Ok((envelope, status))
    }
}

async fn error_message(resp: reqwest::Response) -> Option<String> {
    let body = resp.text().await.ok()?;
    let parsed: ErrorBody = serde_json::from_str(&body).ok()?;
    parsed
        .message
        .or(parsed.error)
        .filter(|m| !m.trim().is_empty())
}

#[async_trait]
impl StocktakeBackend for HttpBackend {
    async fn current_session(&self) -> Result<Option<RemoteSession>, ClientError> {
        let (envelope, status) = self
            .send::<SessionBody>(self.http.get(self.url("/sessions")))
            .await?;
        let (body, _) = envelope.accept(status)?;
        Ok(body.session)
    }

    async fn start_session(&self, location: Option<&str>) -> Result<RemoteSession, ClientError> {
        let request = self
            .http
            .post(self.url("/sessions"))
            .json(&StartRequest { location });
        let (envelope, status) = self.send::<SessionBody>(request).await?;
        let (body, _) = envelope.accept(status)?;
        body.session.ok_or_else(|| {
            ClientError::Decode("start response did not include a session".to_string())
        })
    }

    async fn end_session(&self, session_id: &SessionId) -> Result<Option<String>, ClientError> {
        let request = self
            .http
            .patch(self.url(&format!("/sessions/{}/end", session_id)));
        let (envelope, status) = self.send::<NoBody>(request).await?;
        let (_, message) = envelope.accept(status)?;
        Ok(message)
    }

    async fn submit_scan(&self, submission: &ScanSubmission) -> Result<ScanResult, ClientError> {
        let body = ScanRequest {
            barcode: submission.barcode().as_str(),
            session_id: submission.session_id().as_str(),
            device_id: submission.device_id().to_string(),
            timestamp: submission.client_timestamp(),
            location: submission.location(),
            comment: submission.note(),
        };
        let request = self.http.post(self.url("/scan")).json(&body);
        let (envelope, _) = self.send::<ScanBody>(request).await?;

        if envelope.success {
            Ok(ScanResult::accepted(
                envelope.body.scan_id,
                envelope.message.unwrap_or_else(|| "Scan recorded".to_string()),
            ))
        } else {
            Ok(ScanResult::rejected(
                envelope
                    .message
                    .or(envelope.error)
                    .unwrap_or_else(|| "Scan rejected".to_string()),
            ))
        }
    }

    async fn session_scans(&self, session_id: &SessionId) -> Result<Vec<ScanRecord>, ClientError> {
        let request = self
            .http
            .get(self.url(&format!("/sessions/{}/scans", session_id)));
        let (envelope, status) = self.send::<ScansBody>(request).await?;
        let (body, _) = envelope.accept(status)?;
        Ok(body.scans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconciled_session_falls_back_to_id_and_clock() {
        let now = Utc::now();
        let remote: RemoteSession =
            serde_json::from_str(r#"{"id":"srv-42","location":"Tank farm"}"#).unwrap();
        let session = remote.into_session(None, now);
        assert_eq!(session.name, "srv-42");
        assert_eq!(session.location.as_deref(), Some("Tank farm"));
        assert_eq!(session.started_at, now);
    }

    #[test]
    fn started_session_keeps_requested_location() {
        let json = r#"{"id":"s1","name":"Morning","startedAt":"2024-03-01T08:00:00Z"}"#;
        let remote: RemoteSession = serde_json::from_str(json).unwrap();
        let session = remote.into_session(Some("Bay 2".to_string()), Utc::now());
        assert_eq!(session.name, "Morning");
        assert_eq!(session.location.as_deref(), Some("Bay 2"));
        assert_eq!(session.started_at.to_rfc3339(), "2024-03-01T08:00:00+00:00");
    }

    #[test]
    fn session_with_blank_id_is_not_accepted() {
        let envelope = serde_json::from_str::<Envelope<SessionBody>>(
            r#"{"success":true,"session":{"id":"","name":"Ghost"}}"#,
        );
        assert!(envelope.is_err());
    }

    #[test]
    fn unsuccessful_envelope_carries_message() {
        let envelope: Envelope<NoBody> =
            serde_json::from_str(r#"{"success":false,"error":"Session already closed"}"#).unwrap();
        match envelope.accept(StatusCode::OK) {
            Err(ClientError::Server { status, message }) => {
                assert_eq!(status, 200);
                assert_eq!(message.as_deref(), Some("Session already closed"));
            }
            other => panic!("Expected server error, got {other:?}"),
        }
    }
}
