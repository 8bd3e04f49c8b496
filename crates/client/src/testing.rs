//! Scripted in-memory backend for async tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;

use stocktake_core::{ScanId, SessionId};
use stocktake_scanning::{ScanRecord, ScanRecordStatus, ScanResult, ScanSubmission};

use crate::api::{RemoteSession, StocktakeBackend};
use crate::error::ClientError;

#[derive(Default)]
pub(crate) struct FakeBackend {
    pub current: Mutex<Option<Result<Option<RemoteSession>, ClientError>>>,
    pub current_delay: Mutex<Option<Duration>>,
    pub start_results: Mutex<VecDeque<Result<RemoteSession, ClientError>>>,
    pub end_result: Mutex<Option<ClientError>>,
    pub scans_result: Mutex<Option<Result<Vec<ScanRecord>, ClientError>>>,
    pub scan_results: Mutex<VecDeque<Result<ScanResult, ClientError>>>,

    /// When set, `start_session` and `submit_scan` wait for a notification.
    pub gate: Mutex<Option<std::sync::Arc<Notify>>>,

    pub current_calls: AtomicUsize,
    pub start_calls: AtomicUsize,
    pub end_calls: AtomicUsize,
    pub scan_calls: AtomicUsize,
    pub scans_calls: AtomicUsize,

    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub submitted: Mutex<Vec<ScanSubmission>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_start(self, id: &str) -> Self {
        self.start_results
            .lock()
            .unwrap()
            .push_back(Ok(remote(id)));
        self
    }

    pub fn gated(self, gate: std::sync::Arc<Notify>) -> Self {
        *self.gate.lock().unwrap() = Some(gate);
        self
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    async fn wait_gate(&self) {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }
}

pub(crate) fn remote(id: &str) -> RemoteSession {
    RemoteSession {
        id: SessionId::new(id).unwrap(),
        name: Some(format!("Session {id}")),
        location: None,
        started_at: Some(Utc::now()),
    }
}

pub(crate) fn records(success: usize, failed: usize) -> Vec<ScanRecord> {
    (0..success + failed)
        .map(|n| ScanRecord {
            scan_id: ScanId::new(format!("scan-{n}")).unwrap(),
            barcode: format!("DRUM-{n:04}"),
            status: if n < success {
                ScanRecordStatus::Success
            } else {
                ScanRecordStatus::Error
            },
            scanned_at: Utc::now(),
        })
        .collect()
}

#[async_trait]
impl StocktakeBackend for FakeBackend {
    async fn current_session(&self) -> Result<Option<RemoteSession>, ClientError> {
        self.current_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.current_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.current.lock().unwrap().clone().unwrap_or(Ok(None))
    }

    async fn start_session(&self, location: Option<&str>) -> Result<RemoteSession, ClientError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_gate().await;
        let next = self.start_results.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(remote("fallback")))
            .map(|mut s| {
                if s.location.is_none() {
                    s.location = location.map(str::to_string);
                }
                s
            })
    }

    async fn end_session(&self, _session_id: &SessionId) -> Result<Option<String>, ClientError> {
        self.end_calls.fetch_add(1, Ordering::SeqCst);
        match self.end_result.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(Some("Session ended".to_string())),
        }
    }

    async fn submit_scan(&self, submission: &ScanSubmission) -> Result<ScanResult, ClientError> {
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        self.wait_gate().await;
        self.submitted.lock().unwrap().push(submission.clone());
        let next = self.scan_results.lock().unwrap().pop_front();

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        next.unwrap_or_else(|| {
            Ok(ScanResult::accepted(
                Some(ScanId::new(format!("scan-{}", submission.barcode())).unwrap()),
                "Scan recorded",
            ))
        })
    }

    async fn session_scans(&self, _session_id: &SessionId) -> Result<Vec<ScanRecord>, ClientError> {
        self.scans_calls.fetch_add(1, Ordering::SeqCst);
        self.scans_result
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}
