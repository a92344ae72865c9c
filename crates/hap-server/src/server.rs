//! TCP accessory server.

use crate::connection::Connection;
use crate::events::Notifier;
use crate::registry::SessionRegistry;
use crate::traits::RequestRouter;
use hap_core::error::Result;
use hap_pairing::PairingContext;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Accepts controller connections and hands each to a [`Connection`].
pub struct AccessoryServer {
    listener: TcpListener,
    context: Arc<PairingContext>,
    router: Arc<dyn RequestRouter>,
    notifier: Arc<Notifier>,
    registry: Arc<SessionRegistry>,
    max_message_size: usize,
}

impl AccessoryServer {
    /// Bind the listener. Port 0 picks a free port; see [`local_addr`](Self::local_addr).
    pub async fn bind(
        addr: SocketAddr,
        context: Arc<PairingContext>,
        router: Arc<dyn RequestRouter>,
        max_message_size: usize,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "accessory server listening");
        Ok(Self {
            listener,
            context,
            router,
            notifier: Arc::new(Notifier::new()),
            registry: Arc::new(SessionRegistry::new()),
            max_message_size,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Event fan-out for verified sessions.
    pub fn notifier(&self) -> Arc<Notifier> {
        self.notifier.clone()
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// Accept connections until `shutdown` becomes true, then stop every
    /// session.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%peer, error = %e, "failed to set TCP_NODELAY");
                    }
                    info!(%peer, "controller connected");

                    let connection = Connection::new(
                        peer,
                        self.context.clone(),
                        self.router.clone(),
                        self.notifier.clone(),
                        self.max_message_size,
                    );
                    self.registry
                        .register(peer, move |session_shutdown| async move {
                            // Errors are logged by the connection itself.
                            let _ = connection.run(stream, session_shutdown).await;
                            debug!(%peer, "controller disconnected");
                        })
                        .await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("accessory server stopping");
        self.registry.stop_all().await;
        Ok(())
    }
}
