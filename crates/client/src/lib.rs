//! `stocktake-client`
//!
//! **Responsibility:** the runtime side of a scan station.
//!
//! This crate provides:
//! - The HTTP backend for the stocktake API (bearer auth, fresh token per call)
//! - Session lifecycle coordination (reconcile, start, end, report)
//! - FIFO scan dispatch against the active session
//! - The keyboard subscription feeding the barcode decoder
//! - The live activity feed consumer
//! - A small SQLite store for device identity and supplier context
//!
//! The server stays authoritative for sessions and scans; nothing here is
//! queued for later replay.

pub mod api;
pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod keyboard;
pub mod lifecycle;
pub mod station;
pub mod store;
pub mod stream;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{HttpBackend, RemoteSession, StocktakeBackend};
pub use config::{ClientConfig, ConfigError};
pub use credentials::{CredentialError, CredentialProvider, EnvToken, StaticToken};
pub use dispatcher::{DispatchStatus, ScanDispatcher, spawn_dispatch_worker};
pub use error::ClientError;
pub use keyboard::KeyboardSubscription;
pub use lifecycle::SessionLifecycleManager;
pub use station::ScanStation;
pub use store::LocalStore;
pub use stream::{ActivityObserver, EventStreamConsumer};
