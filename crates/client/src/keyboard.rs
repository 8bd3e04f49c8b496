//! Keyboard subscription.
//!
//! Binds a [`ScanDecoder`] to a keystroke source for as long as the handle
//! lives. The decoder follows the session: it only decodes while a session is
//! active and drops any partial buffer the moment that stops being true.

use std::sync::Arc;

use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;

use stocktake_scanning::{DecoderConfig, KeyEvent, ScanDecoder, SessionSnapshot};

pub struct KeyboardSubscription {
    keys: mpsc::UnboundedSender<KeyEvent>,
    shutdown: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl KeyboardSubscription {
    /// Start listening. Decoded barcodes are sent on `barcodes`; the
    /// subscription never waits for them to be dispatched.
    pub fn attach(
        config: DecoderConfig,
        mut session: watch::Receiver<SessionSnapshot>,
        barcodes: mpsc::UnboundedSender<String>,
    ) -> Self {
        let (keys, mut key_rx) = mpsc::unbounded_channel::<KeyEvent>();
        let shutdown = Arc::new(Notify::new());
        let stop = shutdown.clone();

        let task = tokio::spawn(async move {
            let mut decoder = ScanDecoder::new(config);
            let initial = session.borrow_and_update().clone();
            follow_session(&mut decoder, &initial);
            tracing::debug!("Keyboard subscription attached");

            loop {
                tokio::select! {
                    biased;

                    _ = stop.notified() => break,

                    changed = session.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = session.borrow_and_update().clone();
                        follow_session(&mut decoder, &snapshot);
                    }

                    key = key_rx.recv() => {
                        let Some(event) = key else { break };
                        if let Some(barcode) = decoder.push(&event) {
                            tracing::debug!(barcode = %barcode, "barcode decoded");
                            if barcodes.send(barcode).is_err() {
                                break;
                            }
                        }
                    }
                }
            }

            decoder.deactivate();
            tracing::debug!("Keyboard subscription detached");
        });

        Self {
            keys,
            shutdown,
            task: Some(task),
        }
    }

    /// Deliver one keystroke. Returns `false` once the subscription is gone.
    pub fn feed(&self, event: KeyEvent) -> bool {
        self.keys.send(event).is_ok()
    }

    /// A cloneable handle for keystroke producers.
    pub fn sender(&self) -> mpsc::UnboundedSender<KeyEvent> {
        self.keys.clone()
    }

    /// Stop listening and wait for the listener to finish.
    pub async fn detach(mut self) {
        self.shutdown.notify_one();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for KeyboardSubscription {
    fn drop(&mut self) {
        self.shutdown.notify_one();
    }
}

fn follow_session(decoder: &mut ScanDecoder, snapshot: &SessionSnapshot) {
    match (snapshot.active_session().is_some(), decoder.is_active()) {
        (true, false) => decoder.activate(),
        (false, true) => decoder.deactivate(),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::{Duration, Instant};
    use stocktake_core::SessionId;
    use stocktake_scanning::{Key, KeyOrigin, Session, SessionStatus};

    fn snapshot(active: bool) -> SessionSnapshot {
        if active {
            SessionSnapshot {
                status: SessionStatus::Active,
                session: Some(Session {
                    id: SessionId::new("s-1").unwrap(),
                    name: "Count".to_string(),
                    location: None,
                    started_at: Utc::now(),
                }),
                last_error: None,
            }
        } else {
            SessionSnapshot {
                status: SessionStatus::Idle,
                session: None,
                last_error: None,
            }
        }
    }

    fn type_barcode(sub: &KeyboardSubscription, code: &str, origin: KeyOrigin) {
        let start = Instant::now();
        for (i, c) in code.chars().enumerate() {
            let at = start + Duration::from_millis(i as u64 * 5);
            sub.feed(KeyEvent::new(Key::Char(c), origin, at));
        }
        sub.feed(KeyEvent::new(Key::Enter, origin, start + Duration::from_millis(200)));
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn decodes_only_while_session_is_active() {
        let (session_tx, session_rx) = watch::channel(snapshot(false));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = KeyboardSubscription::attach(DecoderConfig::default(), session_rx, tx);

        type_barcode(&sub, "DRUM-0001", KeyOrigin::ScannerReceiver);
        settle().await;

        session_tx.send_replace(snapshot(true));
        settle().await;
        type_barcode(&sub, "DRUM-0002", KeyOrigin::ScannerReceiver);

        let barcode = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(barcode, "DRUM-0002");
        sub.detach().await;
    }

    #[tokio::test]
    async fn text_field_input_is_ignored() {
        let (_session_tx, session_rx) = watch::channel(snapshot(true));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = KeyboardSubscription::attach(DecoderConfig::default(), session_rx, tx);

        type_barcode(&sub, "typed-by-hand", KeyOrigin::TextField);
        type_barcode(&sub, "DRUM-0003", KeyOrigin::Document);

        let barcode = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(barcode, "DRUM-0003");
    }

    #[tokio::test]
    async fn detach_stops_the_listener() {
        let (_session_tx, session_rx) = watch::channel(snapshot(true));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = KeyboardSubscription::attach(DecoderConfig::default(), session_rx, tx);
        let keys = sub.sender();

        sub.detach().await;
        assert!(keys.send(KeyEvent::enter(Instant::now())).is_err());
        // The barcode sender was owned by the listener task.
        assert!(rx.recv().await.is_none());
    }
}
