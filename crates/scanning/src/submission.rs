//! Scan submissions and their results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stocktake_core::{DeviceId, DomainError, DomainResult, ScanId, SessionId};

use crate::session::Session;

/// Shortest barcode accepted anywhere in the pipeline.
pub const MIN_BARCODE_LEN: usize = 3;

/// A trimmed, length-checked barcode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Barcode(String);

impl Barcode {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        Self::parse_with_min(raw, MIN_BARCODE_LEN)
    }

    pub fn parse_with_min(raw: &str, min_length: usize) -> DomainResult<Self> {
        let trimmed = raw.trim();
        if trimmed.chars().count() < min_length {
            return Err(DomainError::validation(format!(
                "barcode must be at least {min_length} characters"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Barcode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validate an optional free-text note attached to a manual entry.
///
/// Omitting the note is fine; supplying a blank one is not.
pub fn validate_note(note: Option<&str>) -> DomainResult<Option<String>> {
    match note {
        None => Ok(None),
        Some(text) if text.trim().is_empty() => {
            Err(DomainError::validation("comment cannot be empty"))
        }
        Some(text) => Ok(Some(text.trim().to_string())),
    }
}

/// One barcode bound to the session it is submitted under. Immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSubmission {
    barcode: Barcode,
    session_id: SessionId,
    device_id: DeviceId,
    client_timestamp: DateTime<Utc>,
    location: Option<String>,
    note: Option<String>,
}

impl ScanSubmission {
    /// Location is copied from the session at this moment.
    pub fn new(
        barcode: Barcode,
        session: &Session,
        device_id: DeviceId,
        client_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            barcode,
            session_id: session.id.clone(),
            device_id,
            client_timestamp,
            location: session.location.clone(),
            note: None,
        }
    }

    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }

    pub fn barcode(&self) -> &Barcode {
        &self.barcode
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn client_timestamp(&self) -> DateTime<Utc> {
        self.client_timestamp
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }
}

/// UI colouring hint; carries no inventory meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanClassification {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub success: bool,
    pub scan_id: Option<ScanId>,
    pub message: String,
    pub classification: ScanClassification,
}

impl ScanResult {
    pub fn accepted(scan_id: Option<ScanId>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            scan_id,
            message: message.into(),
            classification: ScanClassification::Success,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            scan_id: None,
            message: message.into(),
            classification: ScanClassification::Error,
        }
    }

    /// Pre-flight failure produced without any network I/O.
    pub fn local_failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            scan_id: None,
            message: message.into(),
            classification: ScanClassification::Warning,
        }
    }

    pub fn no_active_session() -> Self {
        Self::local_failure("No active session")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(location: Option<&str>) -> Session {
        Session {
            id: SessionId::new("sess-1").unwrap(),
            name: "Morning count".to_string(),
            location: location.map(str::to_string),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn barcode_is_trimmed_and_length_checked() {
        assert_eq!(Barcode::parse("  D-100 ").unwrap().as_str(), "D-100");
        let err = Barcode::parse(" ab ").unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn submission_copies_location_from_session() {
        let s = session(Some("Warehouse B"));
        let barcode = Barcode::parse("DRUM-1").unwrap();
        let sub = ScanSubmission::new(barcode, &s, DeviceId::new(), Utc::now());
        assert_eq!(sub.location(), Some("Warehouse B"));
        assert_eq!(sub.session_id(), &s.id);
        assert_eq!(sub.note(), None);
    }

    #[test]
    fn blank_note_is_rejected_but_missing_note_is_fine() {
        assert_eq!(validate_note(None).unwrap(), None);
        assert_eq!(validate_note(Some(" dented ")).unwrap(), Some("dented".to_string()));
        assert!(matches!(validate_note(Some("   ")), Err(DomainError::Validation(_))));
    }

    #[test]
    fn local_results_are_never_successful() {
        let r = ScanResult::no_active_session();
        assert!(!r.success);
        assert_eq!(r.scan_id, None);
        assert_eq!(r.classification, ScanClassification::Warning);
    }
}
