//! The WebSocket endpoint the Studio plugin connects to.
//!
//! One peer at a time: a newer upgrade supersedes the current one, whose
//! forwarding task notices its outbound channel closing and shuts the old
//! socket. Inbound frames are parsed by the codec and forwarded to the
//! change processor as [`SessionEvent`]s; outbound messages flow through an
//! [`OutboundHandle`] whose sends are dropped when no peer is connected.

use std::convert::Infallible;
use std::io;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use crossbeam_channel::Sender;
use futures::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_tungstenite::{tungstenite::Message, HyperWebsocket};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use crate::change_processor::SessionEvent;
use crate::message::{decode_editor_message, encode_daemon_message, DaemonMessage};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind port {port}: {source}")]
    Bind { port: u16, source: io::Error },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Cloneable handle to the active peer's outbound queue. Messages sent
/// while no editor is connected (or to a superseded peer) are dropped, not
/// retried.
#[derive(Clone, Default)]
pub struct OutboundHandle {
    slot: Arc<Mutex<PeerSlot>>,
}

#[derive(Default)]
struct PeerSlot {
    sender: Option<mpsc::UnboundedSender<DaemonMessage>>,
    generation: u64,
}

impl OutboundHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&self, message: DaemonMessage) {
        let slot = self.slot.lock().unwrap();
        match &slot.sender {
            Some(sender) => {
                if sender.send(message).is_err() {
                    log::debug!("Peer is gone; dropping outbound message");
                }
            }
            None => log::trace!("No editor connected; dropping outbound message"),
        }
    }

    /// Installs a new peer, superseding (and thereby closing) the previous
    /// one. Returns this peer's generation for [`release`](Self::release).
    fn install(&self, sender: mpsc::UnboundedSender<DaemonMessage>) -> u64 {
        let mut slot = self.slot.lock().unwrap();
        slot.generation += 1;
        slot.sender = Some(sender);
        slot.generation
    }

    /// Clears the slot if this peer is still the active one. Returns false
    /// for superseded peers, whose exit must not look like a disconnect.
    fn release(&self, generation: u64) -> bool {
        let mut slot = self.slot.lock().unwrap();
        if slot.generation == generation {
            slot.sender = None;
            true
        } else {
            false
        }
    }
}

pub struct LiveServer {
    port: u16,
    session_events: Sender<SessionEvent>,
    outbound: OutboundHandle,
}

impl LiveServer {
    pub fn new(port: u16, session_events: Sender<SessionEvent>, outbound: OutboundHandle) -> Self {
        LiveServer {
            port,
            session_events,
            outbound,
        }
    }

    /// Binds and serves on the calling thread. Only a bind failure returns;
    /// per-connection errors are logged and survived.
    pub fn start(self) -> Result<(), TransportError> {
        let (runtime, listener) = self.bind()?;
        runtime.block_on(self.accept_loop(listener));
        Ok(())
    }

    /// Binds on the calling thread (so port conflicts surface immediately)
    /// and serves on a background thread. Used by the one-shot commands.
    pub fn spawn(self) -> Result<(), TransportError> {
        let (runtime, listener) = self.bind()?;
        std::thread::Builder::new()
            .name("LiveServer thread".to_owned())
            .spawn(move || {
                runtime.block_on(self.accept_loop(listener));
            })
            .expect("Could not start LiveServer thread");
        Ok(())
    }

    fn bind(&self) -> Result<(Runtime, TcpListener), TransportError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let port = self.port;
        let listener = runtime
            .block_on(TcpListener::bind((Ipv4Addr::LOCALHOST, port)))
            .map_err(|source| TransportError::Bind { port, source })?;

        log::info!("Listening on ws://localhost:{}", port);
        Ok((runtime, listener))
    }

    async fn accept_loop(self, listener: TcpListener) {
        loop {
            let stream = match listener.accept().await {
                Ok((stream, _)) => stream,
                Err(err) => {
                    log::error!("Failed to accept connection: {}", err);
                    continue;
                }
            };

            let session_events = self.session_events.clone();
            let outbound = self.outbound.clone();
            tokio::spawn(serve_connection(stream, session_events, outbound));
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    session_events: Sender<SessionEvent>,
    outbound: OutboundHandle,
) {
    let io = TokioIo::new(stream);

    let service = service_fn(move |request: Request<Incoming>| {
        let session_events = session_events.clone();
        let outbound = outbound.clone();
        async move { handle_request(request, session_events, outbound) }
    });

    if let Err(err) = http1::Builder::new()
        .serve_connection(io, service)
        .with_upgrades()
        .await
    {
        log::error!("Error serving connection: {}", err);
    }
}

fn handle_request(
    mut request: Request<Incoming>,
    session_events: Sender<SessionEvent>,
    outbound: OutboundHandle,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if hyper_tungstenite::is_upgrade_request(&request) {
        match hyper_tungstenite::upgrade(&mut request, None) {
            Ok((response, websocket)) => {
                tokio::spawn(async move {
                    if let Err(err) = handle_peer(websocket, session_events, outbound).await {
                        log::error!("WebSocket session error: {}", err);
                    }
                });
                Ok(response)
            }
            Err(err) => {
                log::error!("WebSocket upgrade failed: {}", err);
                Ok(plain_response(
                    StatusCode::BAD_REQUEST,
                    format!("WebSocket upgrade failed: {}", err),
                ))
            }
        }
    } else {
        // Plain HTTP probes get a tiny identification payload.
        let info = serde_json::json!({
            "server": "azul",
            "version": env!("CARGO_PKG_VERSION"),
        });
        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(info.to_string())))
            .expect("static response must build"))
    }
}

fn plain_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain")
        .body(Full::new(Bytes::from(body)))
        .expect("static response must build")
}

/// Runs one editor peer until it closes, errors, or is superseded by a
/// newer connection.
async fn handle_peer(
    websocket: HyperWebsocket,
    session_events: Sender<SessionEvent>,
    outbound: OutboundHandle,
) -> anyhow::Result<()> {
    let mut websocket = websocket.await?;

    let (sender, mut receiver) = mpsc::unbounded_channel();
    let generation = outbound.install(sender);
    log::debug!("Editor peer {} connected", generation);

    session_events.send(SessionEvent::Connected)?;

    loop {
        tokio::select! {
            queued = receiver.recv() => {
                match queued {
                    Some(message) => {
                        let frame = match encode_daemon_message(&message) {
                            Ok(frame) => frame,
                            Err(err) => {
                                log::error!("Failed to encode outbound message: {}", err);
                                continue;
                            }
                        };
                        if websocket.send(Message::Text(frame.into())).await.is_err() {
                            log::debug!("Peer {} hung up mid-send", generation);
                            break;
                        }
                    }
                    // Our sender was replaced: a newer peer owns the session.
                    None => {
                        log::debug!("Peer {} superseded by a newer connection", generation);
                        let _ = websocket.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            frame = websocket.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match decode_editor_message(&text) {
                            Ok(Some(message)) => {
                                session_events.send(SessionEvent::Message(message))?;
                            }
                            Ok(None) => {
                                log::warn!("Ignoring message with unknown type");
                            }
                            Err(err) => {
                                log::error!("Protocol violation, closing connection: {}", err);
                                let _ = websocket.send(Message::Close(None)).await;
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        log::warn!("Ignoring unexpected binary frame");
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        // tungstenite answers pings automatically.
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        log::debug!("Peer {} closed the connection", generation);
                        break;
                    }
                    Some(Ok(Message::Frame(_))) => {
                        // Raw frames never surface from a read.
                        unreachable!();
                    }
                    Some(Err(err)) => {
                        log::error!("WebSocket error: {}", err);
                        break;
                    }
                }
            }
        }
    }

    if outbound.release(generation) {
        session_events.send(SessionEvent::Disconnected).ok();
    }

    Ok(())
}
