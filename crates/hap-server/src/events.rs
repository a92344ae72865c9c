//! Event delivery to verified sessions.

use std::collections::HashMap;
use std::net::IpAddr;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Events queued per session before new ones are dropped.
pub const EVENT_QUEUE_LEN: usize = 16;

/// Fans event bodies out to every subscribed session.
///
/// Sessions are keyed by remote IP, matching the one-session-per-IP rule
/// of the registry.
#[derive(Default)]
pub struct Notifier {
    subscribers: Mutex<HashMap<IpAddr, mpsc::Sender<Vec<u8>>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `ip`, replacing any previous subscription.
    pub async fn subscribe(&self, ip: IpAddr) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_LEN);
        self.subscribers.lock().await.insert(ip, tx);
        debug!(%ip, "event subscriber added");
        rx
    }

    pub async fn unsubscribe(&self, ip: IpAddr) {
        if self.subscribers.lock().await.remove(&ip).is_some() {
            debug!(%ip, "event subscriber removed");
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Queue `payload` (a JSON body) for every subscriber.
    ///
    /// Returns the addresses it was queued for. A full queue skips that
    /// subscriber; a closed one is dropped.
    pub async fn publish(&self, payload: &[u8]) -> Vec<IpAddr> {
        let mut subscribers = self.subscribers.lock().await;
        let mut delivered = Vec::with_capacity(subscribers.len());
        let mut closed = Vec::new();

        for (ip, tx) in subscribers.iter() {
            match tx.try_send(payload.to_vec()) {
                Ok(()) => delivered.push(*ip),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(%ip, "event queue full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!(%ip, "event subscriber gone");
                    closed.push(*ip);
                }
            }
        }
        for ip in closed {
            subscribers.remove(&ip);
        }
        delivered
    }
}
