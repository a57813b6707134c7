//! WebSocket connection handler
//!
//! Upgrades incoming TCP connections, wires a client session into the relay
//! and runs the two connection loops: the read loop decoding inbound frames
//! under a liveness deadline, and the write loop draining the outbound queue
//! onto the socket with keepalive pings.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response as UpgradeResponse};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info};

use crate::client::{ClientHandle, Session};
use crate::error::AppError;
use crate::server::ServerCommand;
use crate::types::ClientId;

/// Max wait time when flushing a frame to the peer
const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Max time till the next frame (or pong) from the peer
const PONG_WAIT: Duration = Duration::from_secs(60);

/// Ping interval, must be shorter than the pong wait
const PING_PERIOD: Duration = Duration::from_secs(54);

/// Maximum frame size accepted from the peer
const MAX_FRAME_SIZE: usize = 10_000;

/// Delimiter between batched payloads within one frame
const RECORD_DELIMITER: char = '\n';

/// Outbound queue depth per client
const OUTBOUND_BUFFER_SIZE: usize = 32;

/// Handle a new TCP connection
///
/// Performs the WebSocket handshake (size-limited, reading the optional
/// `username` query parameter), registers the client with the relay, spawns
/// the write loop and runs the read loop to completion. The read loop's
/// epilogue performs the full disconnect cleanup.
pub async fn handle_connection(
    stream: TcpStream,
    cmd_tx: mpsc::Sender<ServerCommand>,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_FRAME_SIZE);
    config.max_frame_size = Some(MAX_FRAME_SIZE);

    let mut username = None;
    let ws_stream = tokio_tungstenite::accept_hdr_async_with_config(
        stream,
        |req: &Request, resp: UpgradeResponse| {
            username = username_from_query(req.uri().query());
            Ok(resp)
        },
        Some(config),
    )
    .await?;
    let (ws_sender, ws_receiver) = ws_stream.split();

    let client_id = ClientId::new();
    let name = username.unwrap_or_else(|| "unknown".to_string());
    info!("client {} ({}) connected from {}", client_id, name, peer_addr);

    // Outbound queue: any actor may enqueue, only the write loop drains.
    let (msg_tx, msg_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER_SIZE);
    let handle = ClientHandle::new(client_id, name, msg_tx);

    if cmd_tx
        .send(ServerCommand::RegisterClient {
            client: handle.clone(),
        })
        .await
        .is_err()
    {
        error!("failed to register client {} - server closed", client_id);
        return Err(AppError::ChannelSend);
    }

    let write_task = tokio::spawn(write_loop(ws_sender, msg_rx, client_id));

    let session = Session::new(handle, cmd_tx);
    read_loop(ws_receiver, session).await;

    let _ = write_task.await;
    info!("client {} disconnected", client_id);

    Ok(())
}

/// Extract the `username` query parameter from the upgrade request
fn username_from_query(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .find_map(|pair| pair.strip_prefix("username="))
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Read loop: decode inbound frames until the connection dies
///
/// Every receive is bounded by the liveness deadline, which therefore resets
/// on any received frame, pongs included. Deadline expiry, transport errors
/// and close frames all end the loop; the epilogue unwinds the session.
async fn read_loop(mut ws_receiver: SplitStream<WebSocketStream<TcpStream>>, mut session: Session) {
    loop {
        let frame = match timeout(PONG_WAIT, ws_receiver.next()).await {
            Err(_) => {
                info!("client {} missed the liveness deadline", session.id());
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                error!("WebSocket error for {}: {}", session.id(), e);
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => session.handle_frame(&text).await,
            Message::Close(_) => {
                debug!("client {} sent close frame", session.id());
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                debug!("liveness frame from {}", session.id());
            }
            _ => {
                // Binary frames are not part of the protocol - ignore.
            }
        }
    }

    debug!("read loop ended for {}", session.id());
    session.disconnect().await;
}

/// Write loop: drain the outbound queue onto the socket
///
/// Blocks on the queue or the keepalive ticker. Dequeued payloads are
/// batched with whatever else is already queued into a single delimited
/// frame. Queue closure sends a close frame and ends the loop; a failed
/// flush or ping ends it immediately.
async fn write_loop(
    mut ws_sender: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut outbound: mpsc::Receiver<String>,
    client_id: ClientId,
) {
    let mut ticker = interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);

    loop {
        tokio::select! {
            maybe = outbound.recv() => {
                let Some(payload) = maybe else {
                    // Queue closed: the session has unwound.
                    let _ = ws_sender.close().await;
                    break;
                };

                let mut batch = payload;
                append_queued(&mut batch, &mut outbound);

                match timeout(WRITE_WAIT, ws_sender.send(Message::Text(batch.into()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!("WebSocket send failed for {}: {}", client_id, e);
                        break;
                    }
                    Err(_) => {
                        debug!("write deadline expired for {}", client_id);
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                match timeout(WRITE_WAIT, ws_sender.send(Message::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    _ => {
                        debug!("ping failed for {}", client_id);
                        break;
                    }
                }
            }
        }
    }

    debug!("write loop ended for {}", client_id);
}

/// Drain everything already queued into the batch, delimiter-separated
fn append_queued(batch: &mut String, outbound: &mut mpsc::Receiver<String>) {
    while let Ok(next) = outbound.try_recv() {
        batch.push(RECORD_DELIMITER);
        batch.push_str(&next);
    }
}
