//! mDNS responder.
//!
//! Two background tasks share one socket: a receive loop that decodes
//! inbound packets, publishes them to subscribers and answers queries for
//! registered names, and a broadcaster that re-sends every registered
//! announcement on a fixed interval.

use crate::packet::{Packet, Question};
use crate::traits::Announcer;
use crate::{MDNS_ADDR, MDNS_PORT};
use async_trait::async_trait;
use hap_core::config::MdnsConfig;
use hap_core::error::Result;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Largest datagram read from the socket.
const MAX_DATAGRAM_LEN: usize = 9000;

/// Received-packet events buffered per subscriber.
const EVENT_CAPACITY: usize = 64;

/// Delay after the first failed receive.
const RECV_BACKOFF_MIN: Duration = Duration::from_millis(50);

/// Ceiling for the delay between failed receives.
const RECV_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Doubling delay applied while the socket keeps failing.
#[derive(Debug)]
struct RecvBackoff {
    next: Duration,
}

impl RecvBackoff {
    fn new() -> Self {
        Self { next: RECV_BACKOFF_MIN }
    }

    /// Delay to wait after a failure; doubles up to the ceiling.
    fn failed(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(RECV_BACKOFF_MAX);
        delay
    }

    fn succeeded(&mut self) {
        self.next = RECV_BACKOFF_MIN;
    }
}

/// Builds a fresh announcement each time it is called.
pub type PacketBuilder = Arc<dyn Fn() -> Packet + Send + Sync>;

/// A packet decoded by the receive loop.
#[derive(Debug, Clone)]
pub struct ReceivedPacket {
    pub packet: Packet,
    pub from: SocketAddr,
}

struct Shared {
    socket: UdpSocket,
    target: SocketAddr,
    builders: RwLock<Vec<PacketBuilder>>,
    events: broadcast::Sender<ReceivedPacket>,
}

impl Shared {
    /// Encode and send every registered packet, optionally only those
    /// answering `questions`. Returns the number of packets sent.
    async fn send_packets(&self, questions: Option<&[Question]>, to: SocketAddr) -> Result<usize> {
        let builders: Vec<PacketBuilder> = self.builders.read().await.clone();

        let mut sent = 0;
        for builder in builders {
            let packet = builder();
            if let Some(questions) = questions {
                if !packet.answers_any(questions) {
                    continue;
                }
            }
            let bytes = match packet.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Skipping unencodable announcement: {}", e);
                    continue;
                }
            };
            self.socket.send_to(&bytes, to).await?;
            trace!(bytes = bytes.len(), %to, "mDNS packet sent");
            sent += 1;
        }
        Ok(sent)
    }
}

/// Multicast DNS responder.
pub struct MdnsResponder {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MdnsResponder {
    /// Bind the mDNS port, join the multicast group on the configured
    /// interface and start both background tasks.
    pub async fn start(config: &MdnsConfig) -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port))).await?;
        socket.join_multicast_v4(MDNS_ADDR, config.interface)?;
        socket.set_multicast_loop_v4(true)?;
        socket.set_multicast_ttl_v4(255)?;
        info!(
            interface = %config.interface,
            port = config.port,
            "mDNS responder listening"
        );

        Ok(Self::with_socket(
            socket,
            SocketAddr::from((MDNS_ADDR, config.port)),
            config.interval(),
        ))
    }

    /// Start on an already bound socket, announcing to `target`.
    pub fn with_socket(socket: UdpSocket, target: SocketAddr, interval: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            socket,
            target,
            builders: RwLock::new(Vec::new()),
            events,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let receiver = tokio::spawn(Self::receive_loop(shared.clone(), shutdown_rx.clone()));
        let broadcaster = tokio::spawn(Self::broadcast_loop(shared.clone(), interval, shutdown_rx));

        Self {
            shared,
            shutdown_tx,
            tasks: Mutex::new(vec![receiver, broadcaster]),
        }
    }

    /// Local address of the responder socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.shared.socket.local_addr()?)
    }

    /// Add an announcement. Builders are never removed.
    pub async fn register<F>(&self, builder: F)
    where
        F: Fn() -> Packet + Send + Sync + 'static,
    {
        let mut builders = self.shared.builders.write().await;
        builders.push(Arc::new(builder));
        debug!(count = builders.len(), "mDNS announcement registered");
    }

    /// Send every registered announcement now.
    pub async fn broadcast(&self) -> Result<usize> {
        self.shared.send_packets(None, self.shared.target).await
    }

    /// Receive every packet the responder decodes.
    pub fn subscribe(&self) -> broadcast::Receiver<ReceivedPacket> {
        self.shared.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !*self.shutdown_tx.borrow()
    }

    /// Signal both tasks to stop and wait for them.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!("mDNS responder stopped");
    }

    async fn receive_loop(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        let mut backoff = RecvBackoff::new();
        loop {
            tokio::select! {
                result = shared.socket.recv_from(&mut buf) => {
                    let (len, from) = match result {
                        Ok(received) => {
                            backoff.succeeded();
                            received
                        }
                        Err(e) => {
                            let delay = backoff.failed();
                            warn!(retry_in = ?delay, "mDNS receive failed: {}", e);
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = shutdown_rx.changed() => {
                                    if *shutdown_rx.borrow() {
                                        break;
                                    }
                                }
                            }
                            continue;
                        }
                    };
                    let packet = match Packet::decode(&buf[..len]) {
                        Ok(packet) => packet,
                        Err(e) => {
                            debug!(%from, len, "Dropping undecodable mDNS packet: {}", e);
                            continue;
                        }
                    };

                    if packet.is_query() && !packet.questions.is_empty() {
                        Self::answer_query(&shared, &packet, from).await;
                    }
                    // No subscribers is fine.
                    let _ = shared.events.send(ReceivedPacket { packet, from });
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("mDNS receive loop exited");
    }

    async fn answer_query(shared: &Shared, query: &Packet, from: SocketAddr) {
        let unicast = query.questions.iter().all(|q| q.unicast_response);
        let to = if unicast { from } else { shared.target };
        match shared.send_packets(Some(&query.questions), to).await {
            Ok(0) => {}
            Ok(sent) => debug!(%from, sent, unicast, "Answered mDNS query"),
            Err(e) => warn!(%from, "Failed to answer mDNS query: {}", e),
        }
    }

    async fn broadcast_loop(
        shared: Arc<Shared>,
        interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match shared.send_packets(None, shared.target).await {
                        Ok(sent) => trace!(sent, "Periodic mDNS announcement"),
                        Err(e) => warn!("Periodic mDNS announcement failed: {}", e),
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("mDNS broadcaster exited");
    }
}

#[async_trait]
impl Announcer for MdnsResponder {
    async fn announce(&self) -> Result<usize> {
        self.broadcast().await
    }
}

/// Re-announce every time the pairing status changes, until the sender is
/// dropped.
pub async fn announce_on_change(mut changes: watch::Receiver<bool>, announcer: Arc<dyn Announcer>) {
    while changes.changed().await.is_ok() {
        let paired = *changes.borrow_and_update();
        info!(paired, "Pairing status changed, re-announcing");
        if let Err(e) = announcer.announce().await {
            warn!("Announcement after status change failed: {}", e);
        }
    }
}

/// Default multicast target.
pub fn default_target() -> SocketAddr {
    SocketAddr::from((MDNS_ADDR, MDNS_PORT))
}
