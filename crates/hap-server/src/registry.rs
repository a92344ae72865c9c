//! One live session per remote IP.

use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct SessionHandle {
    peer: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(peer = %self.peer, error = %e, "session task failed");
        }
    }
}

/// Tracks running sessions and enforces at most one per remote IP.
///
/// Registration holds the lock across "stop existing" and "insert new", so
/// two connections from one address cannot both end up registered.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<IpAddr, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session for `peer`.
    ///
    /// Any running session from the same IP is signalled and joined first.
    /// `start` receives the shutdown signal for the new session and returns
    /// the future to spawn.
    pub async fn register<F, Fut>(&self, peer: SocketAddr, start: F)
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, handle| !handle.task.is_finished());

        if let Some(existing) = sessions.remove(&peer.ip()) {
            info!(old = %existing.peer, new = %peer, "replacing session for address");
            existing.stop().await;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(start(shutdown_rx));
        sessions.insert(
            peer.ip(),
            SessionHandle {
                peer,
                shutdown_tx,
                task,
            },
        );
        debug!(%peer, sessions = sessions.len(), "session registered");
    }

    /// Stop the session for `ip`, if any. Returns whether one was running.
    pub async fn stop(&self, ip: IpAddr) -> bool {
        let handle = self.sessions.lock().await.remove(&ip);
        match handle {
            Some(handle) => {
                handle.stop().await;
                true
            }
            None => false,
        }
    }

    /// Stop and join every session.
    pub async fn stop_all(&self) {
        let handles: Vec<SessionHandle> = self.sessions.lock().await.drain().map(|(_, h)| h).collect();
        if !handles.is_empty() {
            info!(count = handles.len(), "stopping sessions");
        }
        for handle in handles {
            handle.stop().await;
        }
    }

    /// Sessions still running.
    pub async fn len(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, handle| !handle.task.is_finished());
        sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, ip: IpAddr) -> bool {
        self.sessions
            .lock()
            .await
            .get(&ip)
            .map(|handle| !handle.task.is_finished())
            .unwrap_or(false)
    }
}
