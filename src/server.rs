//! WebSocket front-end.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── SyncServer ── RoomGateway ── Room actor (per room)
//! Client B ──┘        │
//!                     ├── /rooms/{id}/sync      bidi envelope stream
//!                     └── /rooms/{id}/presence  presence event stream
//! ```
//!
//! Binary WS frames carry encoded envelopes ([`crate::wire`]). Text
//! frames are only ever sent by the server, as JSON protocol-error
//! notices. A connection that keeps sending undecodable frames past the
//! configured tolerance is disconnected.

use crate::gateway::RoomGateway;
use crate::protocol::{Envelope, PresenceEvent, SessionState};
use crate::room::VoiceFrame;
use crate::session::{Session, SessionReply};
use crate::wire;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    /// Bidi sync stream for one room.
    Sync { room_id: String },
    /// Server-streamed presence feed for one room.
    Presence { room_id: String },
}

/// Parse `/rooms/{id}/sync` and `/rooms/{id}/presence`.
fn parse_route(path: &str) -> Option<Route> {
    let mut parts = path.trim_matches('/').split('/');
    if parts.next()? != "rooms" {
        return None;
    }
    let room_id = parts.next()?;
    if room_id.is_empty() {
        return None;
    }
    let route = match parts.next()? {
        "sync" => Route::Sync {
            room_id: room_id.to_string(),
        },
        "presence" => Route::Presence {
            room_id: room_id.to_string(),
        },
        _ => return None,
    };
    if parts.next().is_some() {
        return None;
    }
    Some(route)
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub struct SyncServer {
    bind_addr: String,
    gateway: Arc<RoomGateway>,
}

impl SyncServer {
    pub fn new(bind_addr: impl Into<String>, gateway: Arc<RoomGateway>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            gateway,
        }
    }

    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    pub fn gateway(&self) -> &Arc<RoomGateway> {
        &self.gateway
    }

    /// Accept loop. Runs until the task is cancelled.
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        info!("Sync server listening on {}", self.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            debug!("New TCP connection from {addr}");

            let gateway = self.gateway.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, gateway).await {
                    warn!("Connection from {addr} ended with error: {e}");
                }
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Connection handling
// ---------------------------------------------------------------------------

async fn handle_connection(stream: TcpStream, gateway: Arc<RoomGateway>) -> anyhow::Result<()> {
    // Capture the request path during the WS handshake; unknown paths are
    // refused before the upgrade completes.
    let mut route: Option<Route> = None;
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        match parse_route(req.uri().path()) {
            Some(r) => {
                route = Some(r);
                Ok(resp)
            }
            None => Err(ErrorResponse::new(Some("unknown path".into()))),
        }
    })
    .await?;

    // An accepted handshake always set the route; a missing one means the
    // callback contract broke, which is not worth crashing the task over.
    let Some(route) = route else {
        return Ok(());
    };
    match route {
        Route::Sync { room_id } => run_sync_stream(ws_stream, gateway, room_id).await,
        Route::Presence { room_id } => run_presence_stream(ws_stream, gateway, room_id).await,
    }
}

fn protocol_error_notice(message: &str) -> Message {
    let body = serde_json::json!({ "error": message }).to_string();
    Message::Text(body.into())
}

/// The long-lived bidi session: ClientHello handshake, then inbound
/// updates racing outbound deltas and voice.
async fn run_sync_stream<S>(
    ws_stream: tokio_tungstenite::WebSocketStream<S>,
    gateway: Arc<RoomGateway>,
    room_id: String,
) -> anyhow::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let mut session = Session::new(gateway);
    let mut delta_rx: Option<mpsc::Receiver<Envelope>> = None;
    let mut voice_rx: Option<broadcast::Receiver<VoiceFrame>> = None;

    loop {
        tokio::select! {
            // Inbound frame from the client.
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        match wire::decode_envelope(&data) {
                            Ok(mut envelope) => {
                                // The URL names the room; a hello that
                                // disagrees is corrected, not trusted.
                                if session.state() == SessionState::Connecting {
                                    if let crate::protocol::Payload::ClientHello(ref mut hello) = envelope.payload {
                                        if hello.requested_room != room_id {
                                            debug!(
                                                "Hello requested room '{}', path says '{}'",
                                                hello.requested_room, room_id
                                            );
                                        }
                                        hello.requested_room = room_id.clone();
                                    }
                                }

                                match session.on_envelope(envelope).await {
                                    Ok(SessionReply::Hello(boxed)) => {
                                        let (hello_reply, streams) = *boxed;
                                        delta_rx = Some(streams.deltas);
                                        voice_rx = Some(streams.voice);
                                        ws_sender
                                            .send(Message::Binary(wire::encode_envelope(&hello_reply)))
                                            .await?;
                                    }
                                    Ok(SessionReply::None) => {}
                                    Err(e) => {
                                        warn!("Session error for '{}': {e}", session.client_id());
                                        ws_sender.send(protocol_error_notice(&e.to_string())).await?;
                                        // Join failures close the stream;
                                        // store errors only concern the
                                        // offending caller.
                                        if session.state() == SessionState::Connecting {
                                            break;
                                        }
                                    }
                                }
                            }
                            Err(e) => {
                                warn!("Undecodable frame from '{}': {e}", session.client_id());
                                ws_sender.send(protocol_error_notice(&e.to_string())).await?;
                                if session.record_violation() {
                                    error!("Closing connection after repeated protocol violations");
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws_sender.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // text/pong frames are ignored
                    Some(Err(e)) => {
                        debug!("WebSocket error: {e}");
                        break;
                    }
                }
            }

            // Ordered state deltas from the room.
            delta = recv_delta(&mut delta_rx) => {
                match delta {
                    Some(envelope) => {
                        ws_sender
                            .send(Message::Binary(wire::encode_envelope(&envelope)))
                            .await?;
                    }
                    // Room dropped our queue: we were force-disconnected
                    // (slow consumer) or the room shut down.
                    None => break,
                }
            }

            // Lossy voice frames; already encoded once by the relay.
            frame = recv_voice(&mut voice_rx) => {
                match frame {
                    Ok(frame) => {
                        if frame.from_client_id != session.client_id() {
                            ws_sender.send(Message::Binary(frame.frame)).await?;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("'{}' lagged {n} voice frames", session.client_id());
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    session.leave().await;
    let _ = ws_sender.send(Message::Close(None)).await;
    Ok(())
}

async fn recv_delta(rx: &mut Option<mpsc::Receiver<Envelope>>) -> Option<Envelope> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn recv_voice(
    rx: &mut Option<broadcast::Receiver<VoiceFrame>>,
) -> Result<VoiceFrame, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Presence feed: server-push only, cancelled independently of any sync
/// stream by simply closing the socket.
async fn run_presence_stream<S>(
    ws_stream: tokio_tungstenite::WebSocketStream<S>,
    gateway: Arc<RoomGateway>,
    room_id: String,
) -> anyhow::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let mut events = match gateway.watch_presence(&room_id).await {
        Ok(rx) => rx,
        Err(e) => {
            ws_sender.send(protocol_error_notice(&e.to_string())).await?;
            ws_sender.send(Message::Close(None)).await?;
            return Ok(());
        }
    };
    info!("Presence watcher attached to room '{room_id}'");

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        ws_sender.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // watchers do not send
                    Some(Err(e)) => {
                        debug!("Presence socket error: {e}");
                        break;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Some(event) => {
                        let envelope = presence_envelope(event);
                        ws_sender
                            .send(Message::Binary(wire::encode_envelope(&envelope)))
                            .await?;
                    }
                    None => break, // room shut down
                }
            }
        }
    }

    // Dropping the receiver is the teardown; the room notices on its next
    // announce and the gateway can reap the room if nothing else uses it.
    drop(events);
    gateway.remove_if_empty(&room_id).await;
    info!("Presence watcher detached from room '{room_id}'");
    Ok(())
}

fn presence_envelope(event: PresenceEvent) -> Envelope {
    Envelope::new(crate::protocol::Payload::PresenceEvent(event))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_parse() {
        assert_eq!(
            parse_route("/rooms/lobby/sync"),
            Some(Route::Sync {
                room_id: "lobby".into()
            })
        );
        assert_eq!(
            parse_route("/rooms/r-1/presence"),
            Some(Route::Presence {
                room_id: "r-1".into()
            })
        );
        assert_eq!(parse_route("/rooms//sync"), None);
        assert_eq!(parse_route("/rooms/lobby"), None);
        assert_eq!(parse_route("/rooms/lobby/sync/extra"), None);
        assert_eq!(parse_route("/other/lobby/sync"), None);
    }
}
