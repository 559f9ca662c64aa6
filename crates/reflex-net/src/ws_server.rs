use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use once_cell::sync::Lazy;
use serde_json::{json, Value as JsonValue};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio::time;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use reflex_core::Brain;
use reflex_device::DeviceTable;

use crate::{register_client, remove_client, subscribe_events, ClientSnapshot};

static NEXT_CLIENT_ID: Lazy<AtomicU64> = Lazy::new(|| AtomicU64::new(1));

/// Serves dashboards: streams every hub event as JSON and answers
/// `{"cmd":"memory"}` / `{"cmd":"devices"}` with read-only snapshots taken
/// under the brain lock.
pub async fn start_ws_server(
    brain: Arc<Mutex<Brain>>,
    table: Arc<Mutex<DeviceTable>>,
    addr: &str,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind websocket server to {addr}"))?;
    info!(addr = %addr, "ws.listening");

    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .with_context(|| "failed to accept websocket connection")?;
        let peer_addr = peer.to_string();
        let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::SeqCst);
        let brain = brain.clone();
        let table = table.clone();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(stream) => stream,
                Err(err) => {
                    error!(peer = %peer_addr, error = %err, "ws.accept_failed");
                    return;
                }
            };
            let (mut sink, mut source) = ws_stream.split();
            register_client(ClientSnapshot {
                id: client_id,
                addr: peer_addr.clone(),
                connected_at: Instant::now(),
            });

            let (out_tx, mut out_rx) = mpsc::channel::<Message>(256);
            let mut event_rx = subscribe_events();

            let out_events_tx = out_tx.clone();
            let mut events_task = tokio::spawn(async move {
                loop {
                    match event_rx.recv().await {
                        Ok(event) => {
                            let message = Message::Text(event.payload.to_string());
                            if out_events_tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            });

            let mut send_task = tokio::spawn(async move {
                while let Some(message) = out_rx.recv().await {
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
            });

            let mut ping_interval = time::interval(Duration::from_secs(30));
            loop {
                tokio::select! {
                    _ = ping_interval.tick() => {
                        if out_tx.send(Message::Ping(Vec::new())).await.is_err() {
                            break;
                        }
                    }
                    message = source.next() => {
                        match message {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<JsonValue>(&text) {
                                    Ok(value) => {
                                        if let Some(reply) =
                                            answer_command(&value, &brain, &table).await
                                        {
                                            let message = Message::Text(reply.to_string());
                                            if out_tx.send(message).await.is_err() {
                                                break;
                                            }
                                        }
                                    }
                                    Err(err) => {
                                        warn!(error = %err, "ws.decode_failed");
                                    }
                                }
                            }
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                warn!(error = %err, "ws.recv_error");
                                break;
                            }
                            None => break,
                        }
                    }
                    _ = &mut send_task => break,
                    _ = &mut events_task => break,
                }
            }

            events_task.abort();
            send_task.abort();
            remove_client(client_id);
        });
    }
}

async fn answer_command(
    value: &JsonValue,
    brain: &Arc<Mutex<Brain>>,
    table: &Arc<Mutex<DeviceTable>>,
) -> Option<JsonValue> {
    let cmd = value.get("cmd").and_then(|v| v.as_str())?;
    match cmd {
        "memory" => {
            let snapshot = {
                let guard = brain.lock().await;
                guard.memory_snapshot()
            };
            match serde_json::to_value(&snapshot) {
                Ok(meta) => Some(json!({"ev": "memory", "meta": meta})),
                Err(err) => {
                    warn!(error = %err, "ws.snapshot_encode_failed");
                    None
                }
            }
        }
        "devices" => {
            let profiles = {
                let guard = table.lock().await;
                guard.profiles()
            };
            match serde_json::to_value(&profiles) {
                Ok(meta) => Some(json!({"ev": "devices", "meta": meta})),
                Err(err) => {
                    warn!(error = %err, "ws.snapshot_encode_failed");
                    None
                }
            }
        }
        "stats" => {
            let stats = {
                let guard = brain.lock().await;
                guard.memory_stats()
            };
            serde_json::to_value(stats)
                .ok()
                .map(|meta| json!({"ev": "stats", "meta": meta}))
        }
        other => {
            warn!(command = %other, "ws.unknown_cmd");
            None
        }
    }
}
