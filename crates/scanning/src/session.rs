use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stocktake_core::{Aggregate, AggregateRoot, DomainError, SessionId};
use stocktake_events::Event;

/// A stocktake session as confirmed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub location: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Whether the server acknowledged the end of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "sync", rename_all = "lowercase")]
pub enum EndSync {
    Synchronized,
    /// Torn down locally after the server refused or never answered.
    Unsynchronized { message: String },
}

impl EndSync {
    pub fn is_synchronized(&self) -> bool {
        matches!(self, EndSync::Synchronized)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SessionStatus {
    Uninitialized,
    Syncing,
    Idle,
    Starting,
    Active,
    Ending,
    Ended(EndSync),
}

impl SessionStatus {
    pub fn name(&self) -> &'static str {
        match self {
            SessionStatus::Uninitialized => "uninitialized",
            SessionStatus::Syncing => "syncing",
            SessionStatus::Idle => "idle",
            SessionStatus::Starting => "starting",
            SessionStatus::Active => "active",
            SessionStatus::Ending => "ending",
            SessionStatus::Ended(_) => "ended",
        }
    }

    /// States in which the UI must not accept user-initiated transitions.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SessionStatus::Syncing | SessionStatus::Starting | SessionStatus::Ending
        )
    }
}

/// Commands accepted by [`ScanSession`].
///
/// `Request*` commands open an operation; `Confirm*`/`Fail*` carry its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    BeginReconcile { at: DateTime<Utc> },
    ReconcileFound { session: Session, at: DateTime<Utc> },
    ReconcileEmpty { at: DateTime<Utc> },
    ReconcileFailed { reason: String, at: DateTime<Utc> },
    RequestStart { location: Option<String>, at: DateTime<Utc> },
    ConfirmStart { session: Session, at: DateTime<Utc> },
    FailStart { reason: String, at: DateTime<Utc> },
    RequestEnd { at: DateTime<Utc> },
    ConfirmEnd { session_id: SessionId, at: DateTime<Utc> },
    FailEnd { session_id: SessionId, reason: String, at: DateTime<Utc> },
    DismissReport { at: DateTime<Utc> },
    ClearError { at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    ReconcileStarted { at: DateTime<Utc> },
    SessionResumed { session: Session, at: DateTime<Utc> },
    ReconciledIdle { error: Option<String>, at: DateTime<Utc> },
    StartRequested { location: Option<String>, at: DateTime<Utc> },
    SessionStarted { session: Session, at: DateTime<Utc> },
    StartFailed { reason: String, at: DateTime<Utc> },
    EndRequested { session_id: SessionId, at: DateTime<Utc> },
    SessionEnded { session_id: SessionId, sync: EndSync, at: DateTime<Utc> },
    ReportDismissed { at: DateTime<Utc> },
    ErrorCleared { at: DateTime<Utc> },
}

impl Event for SessionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::ReconcileStarted { .. } => "stocktake.session.reconcile_started",
            SessionEvent::SessionResumed { .. } => "stocktake.session.resumed",
            SessionEvent::ReconciledIdle { .. } => "stocktake.session.reconciled_idle",
            SessionEvent::StartRequested { .. } => "stocktake.session.start_requested",
            SessionEvent::SessionStarted { .. } => "stocktake.session.started",
            SessionEvent::StartFailed { .. } => "stocktake.session.start_failed",
            SessionEvent::EndRequested { .. } => "stocktake.session.end_requested",
            SessionEvent::SessionEnded { .. } => "stocktake.session.ended",
            SessionEvent::ReportDismissed { .. } => "stocktake.session.report_dismissed",
            SessionEvent::ErrorCleared { .. } => "stocktake.session.error_cleared",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SessionEvent::ReconcileStarted { at }
            | SessionEvent::SessionResumed { at, .. }
            | SessionEvent::ReconciledIdle { at, .. }
            | SessionEvent::StartRequested { at, .. }
            | SessionEvent::SessionStarted { at, .. }
            | SessionEvent::StartFailed { at, .. }
            | SessionEvent::EndRequested { at, .. }
            | SessionEvent::SessionEnded { at, .. }
            | SessionEvent::ReportDismissed { at }
            | SessionEvent::ErrorCleared { at } => *at,
        }
    }
}

/// Read-only view handed to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    #[serde(flatten)]
    pub status: SessionStatus,
    pub session: Option<Session>,
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    /// The session scans may be attributed to, if any.
    pub fn active_session(&self) -> Option<&Session> {
        match self.status {
            SessionStatus::Active => self.session.as_ref(),
            _ => None,
        }
    }
}

/// Aggregate root: the one stocktake session this client owns.
///
/// Every command checks its precondition state and is rejected outright
/// otherwise. The status only decides whether a start, end or submission may
/// begin; ordering their server calls is the caller's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSession {
    status: SessionStatus,
    session: Option<Session>,
    last_error: Option<String>,
    version: u64,
}

impl ScanSession {
    pub fn new() -> Self {
        Self {
            status: SessionStatus::Uninitialized,
            session: None,
            last_error: None,
            version: 0,
        }
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    /// Current or just-ended session.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// The session scans may be attributed to; `None` unless `Active`.
    pub fn active_session(&self) -> Option<&Session> {
        match self.status {
            SessionStatus::Active => self.session.as_ref(),
            _ => None,
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status.clone(),
            session: self.session.clone(),
            last_error: self.last_error.clone(),
        }
    }
}

impl Default for ScanSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregateRoot for ScanSession {
    type Id = SessionId;

    fn id(&self) -> Option<&Self::Id> {
        self.session.as_ref().map(|s| &s.id)
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for ScanSession {
    type Command = SessionCommand;
    type Event = SessionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SessionEvent::ReconcileStarted { .. } => {
                self.status = SessionStatus::Syncing;
            }
            SessionEvent::SessionResumed { session, .. }
            | SessionEvent::SessionStarted { session, .. } => {
                self.status = SessionStatus::Active;
                self.session = Some(session.clone());
            }
            SessionEvent::ReconciledIdle { error, .. } => {
                self.status = SessionStatus::Idle;
                self.session = None;
                self.last_error = error.clone();
            }
            SessionEvent::StartRequested { .. } => {
                self.status = SessionStatus::Starting;
                self.session = None;
                self.last_error = None;
            }
            SessionEvent::StartFailed { reason, .. } => {
                self.status = SessionStatus::Idle;
                self.last_error = Some(reason.clone());
            }
            SessionEvent::EndRequested { .. } => {
                self.status = SessionStatus::Ending;
            }
            SessionEvent::SessionEnded { sync, .. } => {
                self.last_error = match sync {
                    EndSync::Synchronized => None,
                    EndSync::Unsynchronized { message } => Some(message.clone()),
                };
                self.status = SessionStatus::Ended(sync.clone());
            }
            SessionEvent::ReportDismissed { .. } => {
                self.status = SessionStatus::Idle;
                self.session = None;
            }
            SessionEvent::ErrorCleared { .. } => {
                self.last_error = None;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SessionCommand::BeginReconcile { at } => {
                self.expect(&[SessionStatus::Uninitialized], "reconcile")?;
                Ok(vec![SessionEvent::ReconcileStarted { at: *at }])
            }
            SessionCommand::ReconcileFound { session, at } => {
                self.expect(&[SessionStatus::Syncing], "adopt a reconciled session")?;
                Ok(vec![SessionEvent::SessionResumed {
                    session: session.clone(),
                    at: *at,
                }])
            }
            SessionCommand::ReconcileEmpty { at } => {
                self.expect(&[SessionStatus::Syncing], "finish reconciliation")?;
                Ok(vec![SessionEvent::ReconciledIdle {
                    error: None,
                    at: *at,
                }])
            }
            SessionCommand::ReconcileFailed { reason, at } => {
                self.expect(&[SessionStatus::Syncing], "finish reconciliation")?;
                Ok(vec![SessionEvent::ReconciledIdle {
                    error: Some(reason.clone()),
                    at: *at,
                }])
            }
            SessionCommand::RequestStart { location, at } => {
                self.handle_request_start(location, *at)
            }
            SessionCommand::ConfirmStart { session, at } => {
                self.expect(&[SessionStatus::Starting], "confirm a start")?;
                Ok(vec![SessionEvent::SessionStarted {
                    session: session.clone(),
                    at: *at,
                }])
            }
            SessionCommand::FailStart { reason, at } => {
                self.expect(&[SessionStatus::Starting], "fail a start")?;
                Ok(vec![SessionEvent::StartFailed {
                    reason: reason.clone(),
                    at: *at,
                }])
            }
            SessionCommand::RequestEnd { at } => {
                let session = self.active_session().ok_or_else(|| {
                    DomainError::invalid_transition(format!(
                        "cannot end a session while {}",
                        self.status.name()
                    ))
                })?;
                Ok(vec![SessionEvent::EndRequested {
                    session_id: session.id.clone(),
                    at: *at,
                }])
            }
            SessionCommand::ConfirmEnd { session_id, at } => {
                self.ensure_ending(session_id)?;
                Ok(vec![SessionEvent::SessionEnded {
                    session_id: session_id.clone(),
                    sync: EndSync::Synchronized,
                    at: *at,
                }])
            }
            SessionCommand::FailEnd {
                session_id,
                reason,
                at,
            } => {
                self.ensure_ending(session_id)?;
                Ok(vec![SessionEvent::SessionEnded {
                    session_id: session_id.clone(),
                    sync: EndSync::Unsynchronized {
                        message: reason.clone(),
                    },
                    at: *at,
                }])
            }
            SessionCommand::DismissReport { at } => {
                if !matches!(self.status, SessionStatus::Ended(_)) {
                    return Err(DomainError::invalid_transition(format!(
                        "no report to dismiss while {}",
                        self.status.name()
                    )));
                }
                Ok(vec![SessionEvent::ReportDismissed { at: *at }])
            }
            SessionCommand::ClearError { at } => {
                if self.last_error.is_none() {
                    return Ok(Vec::new());
                }
                Ok(vec![SessionEvent::ErrorCleared { at: *at }])
            }
        }
    }
}

impl ScanSession {
    fn expect(&self, allowed: &[SessionStatus], action: &str) -> Result<(), DomainError> {
        if allowed.contains(&self.status) {
            return Ok(());
        }
        Err(DomainError::invalid_transition(format!(
            "cannot {action} while {}",
            self.status.name()
        )))
    }

    fn handle_request_start(
        &self,
        location: &Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Vec<SessionEvent>, DomainError> {
        match self.status {
            SessionStatus::Idle | SessionStatus::Ended(_) => {}
            SessionStatus::Starting => {
                return Err(DomainError::invalid_transition(
                    "a session start is already in progress",
                ));
            }
            SessionStatus::Active => {
                return Err(DomainError::invalid_transition("a session is already active"));
            }
            _ => {
                return Err(DomainError::invalid_transition(format!(
                    "cannot start a session while {}",
                    self.status.name()
                )));
            }
        }

        let location = location
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string);

        Ok(vec![SessionEvent::StartRequested { location, at }])
    }

    /// Stale-result guard: an end outcome only applies to the session being ended.
    fn ensure_ending(&self, session_id: &SessionId) -> Result<(), DomainError> {
        self.expect(&[SessionStatus::Ending], "complete an end")?;
        match &self.session {
            Some(current) if &current.id == session_id => Ok(()),
            _ => Err(DomainError::conflict(format!(
                "end result for stale session {session_id}"
            ))),
        }
    }
}
