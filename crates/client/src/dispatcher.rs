//! Scan dispatcher.
//!
//! Turns barcodes into server submissions against the active session. At
//! most one submission is in flight; the rest wait on the lifecycle
//! manager's session lane, so they reach the server in arrival order and
//! never overlap a start or an end.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use stocktake_core::DeviceId;
use stocktake_scanning::{Barcode, ScanResult, ScanSubmission, validate_note};

use crate::api::StocktakeBackend;
use crate::error::ClientError;
use crate::lifecycle::SessionLifecycleManager;

/// Dispatch progress for the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStatus {
    /// Submissions waiting for the lane.
    pub queued: usize,
    pub in_flight: bool,
    pub processed: u64,
    pub last: Option<ScanResult>,
}

/// Counts a submission as queued until it is dropped.
struct QueueSlot<'a> {
    status: &'a watch::Sender<DispatchStatus>,
}

impl<'a> QueueSlot<'a> {
    fn enter(status: &'a watch::Sender<DispatchStatus>) -> Self {
        status.send_modify(|s| s.queued += 1);
        Self { status }
    }
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.status
            .send_modify(|s| s.queued = s.queued.saturating_sub(1));
    }
}

pub struct ScanDispatcher {
    backend: Arc<dyn StocktakeBackend>,
    lifecycle: Arc<SessionLifecycleManager>,
    device_id: DeviceId,
    min_length: usize,
    status_tx: watch::Sender<DispatchStatus>,
}

impl ScanDispatcher {
    pub fn new(
        backend: Arc<dyn StocktakeBackend>,
        lifecycle: Arc<SessionLifecycleManager>,
        device_id: DeviceId,
        min_length: usize,
    ) -> Self {
        let (status_tx, _) = watch::channel(DispatchStatus::default());
        Self {
            backend,
            lifecycle,
            device_id,
            min_length,
            status_tx,
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn status(&self) -> DispatchStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DispatchStatus> {
        self.status_tx.subscribe()
    }

    /// Submit a decoded barcode.
    pub async fn submit(&self, barcode: &str) -> ScanResult {
        self.dispatch(barcode, None).await
    }

    /// Submit a hand-typed barcode with an optional note.
    pub async fn submit_manual(&self, barcode: &str, note: Option<&str>) -> ScanResult {
        match validate_note(note) {
            Ok(note) => self.dispatch(barcode, note).await,
            Err(err) => {
                let message = ClientError::from(err).user_message();
                self.finish(ScanResult::local_failure(message))
            }
        }
    }

    async fn dispatch(&self, raw: &str, note: Option<String>) -> ScanResult {
        let barcode = match Barcode::parse_with_min(raw, self.min_length) {
            Ok(barcode) => barcode,
            Err(err) => {
                let message = ClientError::from(err).user_message();
                return self.finish(ScanResult::local_failure(message));
            }
        };

        if self.lifecycle.active_session().is_none() {
            tracing::debug!(barcode = %barcode, "dropping scan: no active session");
            return self.finish(ScanResult::no_active_session());
        }

        let _lane = {
            let _slot = QueueSlot::enter(&self.status_tx);
            self.lifecycle.lane().await
        };

        // The session may have ended while this submission was queued.
        let Some(session) = self.lifecycle.active_session() else {
            tracing::debug!(barcode = %barcode, "dropping queued scan: session no longer active");
            return self.finish(ScanResult::no_active_session());
        };

        self.status_tx.send_modify(|s| s.in_flight = true);
        let submission =
            ScanSubmission::new(barcode, &session, self.device_id, Utc::now()).with_note(note);
        tracing::debug!(
            barcode = %submission.barcode(),
            session = %session.id,
            "submitting scan"
        );

        let result = match self.backend.submit_scan(&submission).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!("Scan submission failed: {err}");
                ScanResult::rejected(err.user_message())
            }
        };

        if !self.lifecycle.is_current(&session.id) {
            tracing::debug!(session = %session.id, "ignoring scan result for a replaced session");
            self.status_tx.send_modify(|s| s.in_flight = false);
            return result;
        }

        if result.success {
            tracing::info!(scan_id = ?result.scan_id, "Scan recorded");
        } else {
            tracing::info!("Scan rejected: {}", result.message);
        }
        self.record(result, true)
    }

    /// Outcome decided locally; a submission in flight stays in flight.
    fn finish(&self, result: ScanResult) -> ScanResult {
        self.record(result, false)
    }

    fn record(&self, result: ScanResult, settles_in_flight: bool) -> ScanResult {
        self.status_tx.send_modify(|s| {
            if settles_in_flight {
                s.in_flight = false;
            }
            s.processed += 1;
            s.last = Some(result.clone());
        });
        result
    }
}

/// Drain decoded barcodes into the dispatcher, one at a time, until every
/// sender is gone.
pub fn spawn_dispatch_worker(
    dispatcher: Arc<ScanDispatcher>,
    mut barcodes: mpsc::UnboundedReceiver<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!("Dispatch worker started");
        while let Some(barcode) = barcodes.recv().await {
            dispatcher.submit(&barcode).await;
        }
        tracing::debug!("Dispatch worker stopped");
    })
}
