//! Session lifecycle manager.
//!
//! Owns the [`ScanSession`] aggregate and drives it through the server calls
//! that start, end and reconcile a stocktake session. The aggregate lock is
//! only ever held between awaits, never across one: every operation is
//! "transition, call the server, transition again".
//!
//! Server calls that mutate the session (start, end, scan submission) run
//! one at a time on a fair [`tokio::sync::Mutex`] lane shared with the
//! dispatcher. The status transition comes first and the lane second, so a
//! rejected command never waits and an end waits out the scan in flight.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use stocktake_core::{DomainError, SessionId};
use stocktake_events::{Event, execute};
use stocktake_scanning::{
    EndSync, ProgressionConfig, ScanSession, Session, SessionCommand, SessionEvent, SessionReport,
    SessionSnapshot, SessionStatus,
};

use crate::api::StocktakeBackend;
use crate::error::ClientError;

pub struct SessionLifecycleManager {
    backend: Arc<dyn StocktakeBackend>,
    state: Mutex<ScanSession>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    progression: ProgressionConfig,
    reconcile_timeout: Duration,
    last_report: Mutex<Option<SessionReport>>,
    lane: tokio::sync::Mutex<()>,
}

impl SessionLifecycleManager {
    pub fn new(
        backend: Arc<dyn StocktakeBackend>,
        progression: ProgressionConfig,
        reconcile_timeout: Duration,
    ) -> Self {
        let state = ScanSession::new();
        let (snapshot_tx, _) = watch::channel(state.snapshot());
        Self {
            backend,
            state: Mutex::new(state),
            snapshot_tx,
            progression,
            reconcile_timeout,
            last_report: Mutex::new(None),
            lane: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScanSession> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for the session lane. Held for the whole server round trip of a
    /// start, an end or a scan submission.
    pub(crate) async fn lane(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.lane.lock().await
    }

    /// Run one command against the aggregate and publish the new snapshot.
    fn transition(&self, command: SessionCommand) -> Result<Vec<SessionEvent>, DomainError> {
        let mut state = self.lock();
        let events = execute(&mut *state, &command)?;
        if !events.is_empty() {
            self.snapshot_tx.send_replace(state.snapshot());
        }
        for event in &events {
            tracing::debug!(
                event = event.event_type(),
                status = state.status().name(),
                "session transition"
            );
        }
        Ok(events)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().snapshot()
    }

    pub fn status(&self) -> SessionStatus {
        self.lock().status().clone()
    }

    /// Snapshot updates for the UI and the keyboard subscription.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// The session scans may be attributed to right now.
    pub fn active_session(&self) -> Option<Session> {
        self.lock().active_session().cloned()
    }

    /// Id of the current or just-ended session, whatever the status.
    pub fn current_session_id(&self) -> Option<SessionId> {
        self.lock().session().map(|s| s.id.clone())
    }

    /// Whether a result for `session_id` still belongs to the session this
    /// client holds.
    pub fn is_current(&self, session_id: &SessionId) -> bool {
        self.lock().session().is_some_and(|s| &s.id == session_id)
    }

    pub fn last_report(&self) -> Option<SessionReport> {
        self.last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ask the server once whether a session is already open for this user.
    ///
    /// Any doubt (error, timeout) lands in `Idle`; this never fails because
    /// of the server.
    pub async fn reconcile(&self) -> Result<SessionSnapshot, ClientError> {
        self.transition(SessionCommand::BeginReconcile { at: Utc::now() })?;

        let outcome =
            tokio::time::timeout(self.reconcile_timeout, self.backend.current_session()).await;
        let at = Utc::now();

        let command = match outcome {
            Ok(Ok(Some(remote))) => {
                let session = remote.into_session(None, at);
                tracing::info!("Resuming server session {}", session.id);
                SessionCommand::ReconcileFound { session, at }
            }
            Ok(Ok(None)) => {
                tracing::info!("No open session on the server");
                SessionCommand::ReconcileEmpty { at }
            }
            Ok(Err(err)) => {
                tracing::warn!("Session reconciliation failed: {err}");
                SessionCommand::ReconcileFailed {
                    reason: err.user_message(),
                    at,
                }
            }
            Err(_) => {
                tracing::warn!(
                    "Session reconciliation timed out after {:?}",
                    self.reconcile_timeout
                );
                SessionCommand::ReconcileFailed {
                    reason: "Timed out checking for an open session".to_string(),
                    at,
                }
            }
        };

        self.transition(command)?;
        Ok(self.snapshot())
    }

    /// Start a session. A second call while one is starting is rejected
    /// without touching the server.
    pub async fn start(&self, location: Option<String>) -> Result<Session, ClientError> {
        let events = self.transition(SessionCommand::RequestStart {
            location,
            at: Utc::now(),
        })?;
        let location = events.iter().find_map(|e| match e {
            SessionEvent::StartRequested { location, .. } => location.clone(),
            _ => None,
        });

        let _lane = self.lane().await;
        match self.backend.start_session(location.as_deref()).await {
            Ok(remote) => {
                let at = Utc::now();
                let session = remote.into_session(location, at);
                self.transition(SessionCommand::ConfirmStart {
                    session: session.clone(),
                    at,
                })?;
                tracing::info!(location = ?session.location, "Session {} started", session.id);
                Ok(session)
            }
            Err(err) => {
                tracing::warn!("Session start failed: {err}");
                self.transition(SessionCommand::FailStart {
                    reason: err.user_message(),
                    at: Utc::now(),
                })?;
                Err(err)
            }
        }
    }

    /// End the active session and compute its report.
    ///
    /// New submissions are refused as soon as the session is `Ending`; the
    /// end call itself waits for the submission already in flight.
    ///
    /// A server failure still ends the session locally; the report is then
    /// flagged unsynchronized. Failing to fetch the scan records only zeroes
    /// the counts.
    pub async fn end(&self) -> Result<SessionReport, ClientError> {
        self.transition(SessionCommand::RequestEnd { at: Utc::now() })?;
        let session = self
            .lock()
            .session()
            .cloned()
            .ok_or_else(|| DomainError::invariant("ending without a session"))?;

        let _lane = self.lane().await;

        let sync = match self.backend.end_session(&session.id).await {
            Ok(message) => {
                tracing::info!(
                    "Session {} ended: {}",
                    session.id,
                    message.as_deref().unwrap_or("acknowledged")
                );
                EndSync::Synchronized
            }
            Err(err) => {
                tracing::warn!("Server did not confirm end of session {}: {err}", session.id);
                EndSync::Unsynchronized {
                    message: err.user_message(),
                }
            }
        };

        let ended_at = Utc::now();
        let command = match &sync {
            EndSync::Synchronized => SessionCommand::ConfirmEnd {
                session_id: session.id.clone(),
                at: ended_at,
            },
            EndSync::Unsynchronized { message } => SessionCommand::FailEnd {
                session_id: session.id.clone(),
                reason: message.clone(),
                at: ended_at,
            },
        };
        self.transition(command)?;

        let records = match self.backend.session_scans(&session.id).await {
            Ok(records) => Some(records),
            Err(err) => {
                tracing::warn!("Could not fetch scans for session {}: {err}", session.id);
                None
            }
        };

        let report = SessionReport::calculate(
            &session,
            ended_at,
            records.as_deref(),
            &sync,
            &self.progression,
        );
        tracing::info!(
            scans = report.scan_count,
            points = report.progression.total_points,
            level = report.progression.level,
            synchronized = report.synchronized,
            "Session {} report ready",
            session.id
        );

        *self
            .last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
        Ok(report)
    }

    /// `Ended → Idle`.
    pub fn dismiss_report(&self) -> Result<(), ClientError> {
        self.transition(SessionCommand::DismissReport { at: Utc::now() })?;
        Ok(())
    }

    pub fn clear_error(&self) {
        // ClearError is accepted in every state.
        let _ = self.transition(SessionCommand::ClearError { at: Utc::now() });
    }
}
