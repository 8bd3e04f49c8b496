//! Live activity feed consumer.
//!
//! Subscribes to `{api}/{channel}/stream` (server-sent events), keeps a
//! bounded most-recent-first history and reports the connection state. It
//! never reconnects on its own: after `Closed` or `Error` the caller decides
//! whether to subscribe again.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use stocktake_events::{ActivityEvent, ActivityHistory, ConnectionState, Projection, SseDecoder};

use crate::credentials::CredentialProvider;
use crate::error::ClientError;

pub type ActivityObserver = Arc<dyn Fn(&ActivityEvent) + Send + Sync>;

/// History plus the generation that owns it. A task whose generation is
/// no longer current must not touch either the history or the state.
struct Feed {
    generation: u64,
    history: ActivityHistory,
}

struct Subscription {
    channel: String,
    task: JoinHandle<()>,
}

pub struct EventStreamConsumer {
    api_url: String,
    http: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
    feed: Arc<Mutex<Feed>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    current: Mutex<Option<Subscription>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EventStreamConsumer {
    pub fn new(
        api_url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
        history_capacity: usize,
    ) -> Self {
        // No overall timeout: the stream is expected to stay open.
        let http = reqwest::Client::new();
        let (state_tx, _) = watch::channel(ConnectionState::Closed);
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            http,
            credentials,
            feed: Arc::new(Mutex::new(Feed {
                generation: 0,
                history: ActivityHistory::new(history_capacity),
            })),
            state_tx: Arc::new(state_tx),
            current: Mutex::new(None),
        }
    }

    /// Subscribe to `channel`.
    ///
    /// A no-op (returning `false`) while already live on the same channel,
    /// which keeps the history. Otherwise any previous stream is dropped, the
    /// history is cleared and a fresh connection starts in `Connecting`.
    pub fn subscribe(&self, channel: &str, observer: ActivityObserver) -> bool {
        let mut current = lock(&self.current);

        if let Some(sub) = current.as_ref() {
            if sub.channel == channel && self.state().is_live() {
                return false;
            }
        }
        if let Some(old) = current.take() {
            old.task.abort();
        }

        let generation = {
            let mut feed = lock(&self.feed);
            feed.generation += 1;
            feed.history.reset();
            feed.generation
        };
        self.state_tx.send_replace(ConnectionState::Connecting);

        let ctx = StreamTask {
            url: format!("{}/{}/stream", self.api_url, channel),
            http: self.http.clone(),
            credentials: self.credentials.clone(),
            feed: self.feed.clone(),
            state_tx: self.state_tx.clone(),
            generation,
            observer,
        };
        tracing::info!("Subscribing to activity channel {channel}");

        *current = Some(Subscription {
            channel: channel.to_string(),
            task: tokio::spawn(ctx.run()),
        });
        true
    }

    /// Drop the transport. History is kept until the next subscribe.
    pub fn close(&self) {
        if let Some(sub) = lock(&self.current).take() {
            sub.task.abort();
            tracing::info!("Closed activity channel {}", sub.channel);
        }
        lock(&self.feed).generation += 1;
        self.state_tx.send_replace(ConnectionState::Closed);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Most recent first.
    pub fn history(&self) -> Vec<ActivityEvent> {
        lock(&self.feed).history.to_vec()
    }
}

impl Drop for EventStreamConsumer {
    fn drop(&mut self) {
        if let Some(sub) = lock(&self.current).take() {
            sub.task.abort();
        }
    }
}

struct StreamTask {
    url: String,
    http: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
    feed: Arc<Mutex<Feed>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    generation: u64,
    observer: ActivityObserver,
}

impl StreamTask {
    async fn run(self) {
        let final_state = match self.stream().await {
            Ok(()) => ConnectionState::Closed,
            Err(err) => {
                tracing::warn!("Activity stream failed: {err}");
                ConnectionState::Error
            }
        };
        if self.set_state(final_state) {
            tracing::info!("Activity stream ended ({final_state:?})");
        }
    }

    async fn stream(&self) -> Result<(), ClientError> {
        let token = self.credentials.bearer_token().await?;
        let mut resp = self
            .http
            .get(&self.url)
            .bearer_auth(token)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ClientError::Authentication(status.to_string()));
        }
        if !status.is_success() {
            return Err(ClientError::Server {
                status: status.as_u16(),
                message: None,
            });
        }

        if !self.set_state(ConnectionState::Open) {
            return Ok(());
        }

        let mut decoder = SseDecoder::new();
        while let Some(chunk) = resp.chunk().await? {
            for frame in decoder.push(&chunk)? {
                match ActivityEvent::from_frame(&frame, Utc::now()) {
                    Ok(Some(event)) => {
                        if !self.record(&event) {
                            return Ok(());
                        }
                        (self.observer)(&event);
                    }
                    Ok(None) => {
                        tracing::debug!(
                            event = ?frame.event,
                            "ignoring unrecognized activity frame"
                        );
                    }
                    Err(err) => {
                        tracing::warn!("Ignoring malformed activity frame: {err}");
                    }
                }
            }
        }
        Ok(())
    }

    fn set_state(&self, state: ConnectionState) -> bool {
        let feed = lock(&self.feed);
        if feed.generation != self.generation {
            return false;
        }
        self.state_tx.send_replace(state);
        true
    }

    fn record(&self, event: &ActivityEvent) -> bool {
        let mut feed = lock(&self.feed);
        if feed.generation != self.generation {
            return false;
        }
        feed.history.apply(event);
        true
    }
}
