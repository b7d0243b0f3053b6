//! Per-connection reader/writer task pair: ping/pong keepalive, frame
//! coalescing, and the subscription handshake.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::event::Event;
use crate::hub::Hub;

const WRITE_WAIT: Duration = Duration::from_secs(10);
const PONG_WAIT: Duration = Duration::from_secs(60);
const PING_PERIOD: Duration = Duration::from_secs(54);

/// Maximum inbound frame size. Enforced by axum at the websocket transport
/// layer (`WebSocketUpgrade::max_message_size`), not re-checked here.
pub const MAX_MESSAGE_SIZE: usize = 512;

/// Drives one websocket connection until either side closes it.
pub async fn handle_socket(socket: WebSocket, hub: Arc<Hub>) {
    let (id, outbound_rx) = hub.register().await;
    let (sender, mut receiver) = socket.split();

    let writer = tokio::spawn(run_writer(sender, outbound_rx));
    run_reader(&mut receiver, &hub, id).await;

    hub.unregister(id).await;
    let _ = writer.await;
}

async fn run_reader(receiver: &mut SplitStream<WebSocket>, hub: &Hub, id: u64) {
    loop {
        let next = tokio::time::timeout(PONG_WAIT, receiver.next()).await;
        let msg = match next {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(e))) => {
                debug!(id, error = %e, "subscriber: read error");
                return;
            }
            Ok(None) => return,
            Err(_) => {
                debug!(id, "subscriber: read deadline expired");
                return;
            }
        };

        match msg {
            Message::Text(text) => {
                let name = text.trim().replace('\n', " ");
                if name.is_empty() {
                    continue;
                }
                if hub.subscribe(id, &name).await.is_err() {
                    hub.send_to(id, &Event::error(&name, format!("Unknown server: {name}")))
                        .await;
                }
            }
            Message::Close(_) => return,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }
}

async fn run_writer(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<String>,
) {
    let mut ping_interval = tokio::time::interval(PING_PERIOD);
    ping_interval.tick().await;

    loop {
        tokio::select! {
            received = outbound_rx.recv() => {
                let Some(mut combined) = received else {
                    let _ = sender.send(Message::Close(None)).await;
                    return;
                };

                // Coalesce whatever else is already queued into this frame.
                let pending = outbound_rx.len();
                for _ in 0..pending {
                    match outbound_rx.try_recv() {
                        Ok(next) => {
                            combined.push('\n');
                            combined.push_str(&next);
                        }
                        Err(_) => break,
                    }
                }

                if write_with_deadline(&mut sender, Message::Text(combined.into())).await.is_err() {
                    return;
                }
            }
            _ = ping_interval.tick() => {
                if write_with_deadline(&mut sender, Message::Ping(Vec::new().into())).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn write_with_deadline(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: Message,
) -> Result<(), ()> {
    match tokio::time::timeout(WRITE_WAIT, sender.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        _ => Err(()),
    }
}
