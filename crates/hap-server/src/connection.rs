//! One controller connection.
//!
//! Reads bytes from the socket, runs them through the transport framer and
//! the request parser, and answers each request in order. Pairing endpoints
//! are handled here; everything else goes to the [`RequestRouter`] once the
//! session has been verified.

use crate::events::Notifier;
use crate::request::{HttpRequest, Method, RequestParser};
use crate::response::{HttpResponse, StatusCode};
use crate::traits::{RequestRouter, RouteContext};
use hap_core::error::Result;
use hap_pairing::{handle_pairings, EncryptedChannel, PairSetup, PairVerify, PairingContext};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Socket read size.
const READ_BUFFER_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// State of a single controller connection.
pub struct Connection {
    peer: SocketAddr,
    context: Arc<PairingContext>,
    router: Arc<dyn RequestRouter>,
    notifier: Arc<Notifier>,
    channel: EncryptedChannel,
    parser: RequestParser,
    setup: Option<PairSetup>,
    verify: PairVerify,
    controller: Option<Uuid>,
    events: Option<mpsc::Receiver<Vec<u8>>>,
}

impl Connection {
    pub fn new(
        peer: SocketAddr,
        context: Arc<PairingContext>,
        router: Arc<dyn RequestRouter>,
        notifier: Arc<Notifier>,
        max_message_size: usize,
    ) -> Self {
        Self {
            peer,
            verify: PairVerify::new(context.clone()),
            context,
            router,
            notifier,
            channel: EncryptedChannel::new(),
            parser: RequestParser::new(max_message_size),
            setup: None,
            controller: None,
            events: None,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Controller verified on this connection, if any.
    pub fn controller(&self) -> Option<Uuid> {
        self.controller
    }

    /// Serve the connection until the peer closes it, `shutdown` fires, or
    /// a protocol or decryption error ends it.
    ///
    /// An orderly close by the peer is `Ok`.
    pub async fn run<S>(mut self, mut stream: S, mut shutdown: watch::Receiver<bool>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        debug!(peer = %self.peer, "connection opened");
        let mut buf = vec![0u8; READ_BUFFER_LEN];

        let result = loop {
            tokio::select! {
                read = stream.read(&mut buf) => {
                    let n = match read {
                        Ok(0) => {
                            debug!(peer = %self.peer, "peer closed connection");
                            break Ok(());
                        }
                        Ok(n) => n,
                        Err(e) => break Err(e.into()),
                    };
                    match self.on_data(&buf[..n], &mut stream).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Close) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                }
                event = next_event(&mut self.events) => {
                    match event {
                        Some(body) => {
                            if let Err(e) = self.send_event(&mut stream, body).await {
                                break Err(e);
                            }
                        }
                        None => self.events = None,
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(peer = %self.peer, "connection shutting down");
                        break Ok(());
                    }
                }
            }
        };

        if self.controller.is_some() {
            self.notifier.unsubscribe(self.peer.ip()).await;
        }
        if let Err(e) = &result {
            warn!(peer = %self.peer, error = %e, "connection closed with error");
        }
        result
    }

    async fn on_data<S>(&mut self, data: &[u8], stream: &mut S) -> Result<Flow>
    where
        S: AsyncWrite + Unpin,
    {
        trace!(peer = %self.peer, bytes = data.len(), "received");
        let plaintext = self.channel.feed(data)?;
        self.parser.feed(&plaintext);

        while let Some(request) = self.parser.next_request()? {
            let was_encrypted = self.channel.rx_enabled();
            if self.handle_request(request, stream).await? == Flow::Close {
                return Ok(Flow::Close);
            }
            if !was_encrypted && self.channel.rx_enabled() {
                // Bytes read alongside M3 are ciphertext.
                let rest = self.parser.take_buffered();
                let plaintext = self.channel.feed(&rest)?;
                self.parser.feed(&plaintext);
            }
        }
        Ok(Flow::Continue)
    }

    async fn handle_request<S>(&mut self, request: HttpRequest, stream: &mut S) -> Result<Flow>
    where
        S: AsyncWrite + Unpin,
    {
        debug!(peer = %self.peer, method = %request.method, uri = %request.uri, "request");

        match (&request.method, request.path()) {
            (Method::Post, "/pair-setup") => {
                let setup = self
                    .setup
                    .get_or_insert_with(|| PairSetup::new(self.context.clone()));
                let body = setup.handle(&request.body).await;
                self.send(stream, HttpResponse::tlv(body)).await?;
            }
            (Method::Post, "/pair-verify") => {
                let body = self.verify.handle(&request.body).await;
                // M4 goes out before the keys are installed.
                self.send(stream, HttpResponse::tlv(body)).await?;
                if let Some(session) = self.verify.take_verified() {
                    self.channel.install_keys(&session.keys);
                    self.controller = Some(session.controller_id);
                    self.events = Some(self.notifier.subscribe(self.peer.ip()).await);
                    info!(peer = %self.peer, controller = %session.controller_id, "session verified");
                }
            }
            (Method::Post, "/pairings") => {
                let Some(controller) = self.controller else {
                    self.send(stream, HttpResponse::authorization_required()).await?;
                    return Ok(Flow::Continue);
                };
                let body = handle_pairings(&self.context, &controller, &request.body).await;
                self.send(stream, HttpResponse::tlv(body)).await?;
                if self.context.client(&controller).await.is_none() {
                    info!(peer = %self.peer, %controller, "controller no longer paired, closing");
                    return Ok(Flow::Close);
                }
            }
            (_, "/pair-setup" | "/pair-verify" | "/pairings") => {
                self.send(stream, HttpResponse::new(StatusCode::METHOD_NOT_ALLOWED))
                    .await?;
            }
            _ => {
                let response = match self.controller {
                    Some(controller_id) => {
                        let context = RouteContext {
                            peer: self.peer,
                            controller_id,
                        };
                        self.router.route(context, request).await
                    }
                    None => HttpResponse::authorization_required(),
                };
                self.send(stream, response).await?;
            }
        }
        Ok(Flow::Continue)
    }

    async fn send<S>(&mut self, stream: &mut S, response: HttpResponse) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        trace!(peer = %self.peer, status = response.status.0, "response");
        let wire = self.channel.encrypt(&response.serialize())?;
        stream.write_all(&wire).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn send_event<S>(&mut self, stream: &mut S, body: Vec<u8>) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        if !self.channel.tx_enabled() {
            debug!(peer = %self.peer, "dropping event before first encrypted request");
            return Ok(());
        }
        self.send(stream, HttpResponse::event(body)).await
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<Vec<u8>>>) -> Option<Vec<u8>> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
