//! Scan station composition root.
//!
//! Wires the lifecycle manager, dispatcher, keyboard subscription, activity
//! consumer and local store together for one device.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use stocktake_core::{DeviceId, SupplierId};
use stocktake_events::{ActivityEvent, ConnectionState};
use stocktake_scanning::{
    Barcode, KeyEvent, MaterialScan, ScanResult, Session, SessionReport, SessionSnapshot,
    SupplierContext,
};

use crate::api::{HttpBackend, StocktakeBackend};
use crate::config::ClientConfig;
use crate::credentials::{CredentialProvider, StaticToken};
use crate::dispatcher::{DispatchStatus, ScanDispatcher, spawn_dispatch_worker};
use crate::error::ClientError;
use crate::keyboard::KeyboardSubscription;
use crate::lifecycle::SessionLifecycleManager;
use crate::store::LocalStore;
use crate::stream::{ActivityObserver, EventStreamConsumer};

pub struct ScanStation {
    config: ClientConfig,
    lifecycle: Arc<SessionLifecycleManager>,
    dispatcher: Arc<ScanDispatcher>,
    activity: EventStreamConsumer,
    store: LocalStore,
    barcode_tx: Option<mpsc::UnboundedSender<String>>,
    worker: Option<JoinHandle<()>>,
    keyboard: Mutex<Option<KeyboardSubscription>>,
}

impl ScanStation {
    /// Build a station talking to the configured HTTP API.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        config
            .validate()
            .map_err(|e| ClientError::Validation(e.to_string()))?;

        let credentials: Arc<dyn CredentialProvider> =
            Arc::new(StaticToken::new(config.auth_token.clone()));
        let backend: Arc<dyn StocktakeBackend> = Arc::new(HttpBackend::new(
            config.base_url(),
            config.request_timeout,
            credentials.clone(),
        )?);

        let store = match &config.store_path {
            Some(path) => LocalStore::open(path).await?,
            None => LocalStore::open_default().await?,
        };
        let device_id = match config.device_id {
            Some(id) => id,
            None => store.device_id().await?,
        };

        Ok(Self::assemble(config, backend, credentials, store, device_id))
    }

    /// Build a station from already-constructed parts.
    pub fn assemble(
        config: ClientConfig,
        backend: Arc<dyn StocktakeBackend>,
        credentials: Arc<dyn CredentialProvider>,
        store: LocalStore,
        device_id: DeviceId,
    ) -> Self {
        let lifecycle = Arc::new(SessionLifecycleManager::new(
            backend.clone(),
            config.progression,
            config.reconcile_timeout,
        ));
        let dispatcher = Arc::new(ScanDispatcher::new(
            backend,
            lifecycle.clone(),
            device_id,
            config.decoder.min_length,
        ));
        let activity =
            EventStreamConsumer::new(config.base_url(), credentials, config.history_capacity);

        let (barcode_tx, barcode_rx) = mpsc::unbounded_channel();
        let worker = spawn_dispatch_worker(dispatcher.clone(), barcode_rx);

        tracing::info!(
            device_id = %device_id,
            api_url = config.base_url(),
            "Scan station assembled"
        );

        Self {
            config,
            lifecycle,
            dispatcher,
            activity,
            store,
            barcode_tx: Some(barcode_tx),
            worker: Some(worker),
            keyboard: Mutex::new(None),
        }
    }

    /// Reconcile with the server and bind the keyboard to the session.
    pub async fn boot(&self) -> Result<SessionSnapshot, ClientError> {
        let snapshot = self.lifecycle.reconcile().await?;
        self.attach_keyboard();
        Ok(snapshot)
    }

    /// Returns `false` when already attached or shutting down.
    pub fn attach_keyboard(&self) -> bool {
        let Some(barcode_tx) = self.barcode_tx.clone() else {
            return false;
        };
        let mut keyboard = self.keyboard.lock().unwrap_or_else(PoisonError::into_inner);
        if keyboard.is_some() {
            return false;
        }
        *keyboard = Some(KeyboardSubscription::attach(
            self.config.decoder,
            self.lifecycle.subscribe(),
            barcode_tx,
        ));
        true
    }

    pub async fn detach_keyboard(&self) {
        let subscription = self
            .keyboard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(subscription) = subscription {
            subscription.detach().await;
        }
    }

    /// Forward a keystroke to the decoder. `false` when no keyboard is attached.
    pub fn key(&self, event: KeyEvent) -> bool {
        self.keyboard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|k| k.feed(event))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn device_id(&self) -> DeviceId {
        self.dispatcher.device_id()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lifecycle.snapshot()
    }

    pub fn watch_session(&self) -> watch::Receiver<SessionSnapshot> {
        self.lifecycle.subscribe()
    }

    pub fn watch_dispatch(&self) -> watch::Receiver<DispatchStatus> {
        self.dispatcher.subscribe()
    }

    /// Falls back to the configured default location.
    pub async fn start_session(&self, location: Option<String>) -> Result<Session, ClientError> {
        let location = location.or_else(|| self.config.default_location.clone());
        self.lifecycle.start(location).await
    }

    pub async fn end_session(&self) -> Result<SessionReport, ClientError> {
        self.lifecycle.end().await
    }

    pub fn dismiss_report(&self) -> Result<(), ClientError> {
        self.lifecycle.dismiss_report()
    }

    pub fn clear_error(&self) {
        self.lifecycle.clear_error();
    }

    pub async fn submit(&self, barcode: &str) -> ScanResult {
        self.dispatcher.submit(barcode).await
    }

    pub async fn submit_manual(&self, barcode: &str, note: Option<&str>) -> ScanResult {
        self.dispatcher.submit_manual(barcode, note).await
    }

    pub fn watch_activity(&self, observer: ActivityObserver) -> bool {
        self.activity
            .subscribe(&self.config.activity_channel, observer)
    }

    pub fn close_activity(&self) {
        self.activity.close();
    }

    pub fn activity_state(&self) -> watch::Receiver<ConnectionState> {
        self.activity.subscribe_state()
    }

    pub fn activity_history(&self) -> Vec<ActivityEvent> {
        self.activity.history()
    }

    pub async fn set_supplier(&self, id: &str, name: &str) -> Result<SupplierContext, ClientError> {
        let context = SupplierContext::new(SupplierId::new(id)?, name, Utc::now())?;
        self.store.save_supplier(&context).await?;
        tracing::info!("Supplier context set to {} ({})", context.name, context.id);
        Ok(context)
    }

    pub async fn supplier(&self) -> Result<Option<SupplierContext>, ClientError> {
        Ok(self.store.load_supplier().await?)
    }

    pub async fn clear_supplier(&self) -> Result<(), ClientError> {
        self.store.clear_supplier().await?;
        tracing::info!("Supplier context cleared");
        Ok(())
    }

    /// Attribute a material barcode to the stored supplier.
    pub async fn material_scan(&self, raw: &str) -> Result<MaterialScan, ClientError> {
        let barcode = Barcode::parse_with_min(raw, self.config.decoder.min_length)?;
        let supplier = self
            .supplier()
            .await?
            .ok_or_else(|| ClientError::Validation("No supplier selected".to_string()))?;
        Ok(supplier.scope_material(barcode, self.device_id(), Utc::now()))
    }

    /// Detach the keyboard, close the feed and let queued scans drain.
    ///
    /// In-flight requests are not aborted.
    pub async fn shutdown(mut self) {
        self.detach_keyboard().await;
        self.activity.close();
        self.barcode_tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
        tracing::info!("Scan station shut down");
    }
}
