//! Minimal gateway receiver.
//!
//! Connects to the chat platform's websocket gateway, keeps the heartbeat
//! alive, and forwards raw `MESSAGE_UPDATE` dispatch payloads into a channel
//! for the panel detector. Anything else the gateway can do is out of scope
//! here.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";
const RECONNECT_INITIAL: Duration = Duration::from_secs(5);
const RECONNECT_MAX: Duration = Duration::from_secs(60);

// GUILD_MESSAGES | MESSAGE_CONTENT: panel edits arrive as message updates
// and their component payloads require the content intent.
const INTENTS: u64 = (1 << 9) | (1 << 15);

#[derive(Debug, thiserror::Error)]
enum GatewayError {
    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Spawn the gateway receiver; the returned channel yields raw message-edit
/// payloads until shutdown.
pub fn spawn(token: String, shutdown: CancellationToken) -> mpsc::Receiver<Value> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(run(token, tx, shutdown));
    rx
}

async fn run(token: String, tx: mpsc::Sender<Value>, shutdown: CancellationToken) {
    let mut backoff = RECONNECT_INITIAL;

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        match connect_and_listen(&token, &tx, &shutdown).await {
            Ok(()) => break,
            Err(e) => {
                log::warn!("Gateway: connection lost: {}; reconnecting in {:?}", e, backoff);
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(RECONNECT_MAX);
    }

    log::info!("Gateway: receiver stopped");
}

fn identify_payload(token: &str) -> Value {
    json!({
        "op": 2,
        "d": {
            "token": token,
            "intents": INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "minutes-scribe",
                "device": "minutes-scribe",
            },
        },
    })
}

async fn connect_and_listen(
    token: &str,
    tx: &mpsc::Sender<Value>,
    shutdown: &CancellationToken,
) -> Result<(), GatewayError> {
    let (ws, _response) = tokio_tungstenite::connect_async(GATEWAY_URL).await?;
    let (mut write, mut read) = ws.split();

    // First frame must be hello (op 10) carrying the heartbeat interval.
    let hello = match read.next().await {
        Some(frame) => frame?,
        None => return Err(GatewayError::Protocol("stream ended before hello".to_string())),
    };
    let hello: Value = match hello {
        Message::Text(text) => serde_json::from_str(&text)
            .map_err(|e| GatewayError::Protocol(format!("unparseable hello: {}", e)))?,
        other => {
            return Err(GatewayError::Protocol(format!(
                "unexpected first frame: {:?}",
                other
            )))
        }
    };
    let heartbeat_interval = hello["d"]["heartbeat_interval"]
        .as_u64()
        .ok_or_else(|| GatewayError::Protocol("hello carries no heartbeat interval".to_string()))?;

    write
        .send(Message::Text(identify_payload(token).to_string()))
        .await?;
    log::info!("Gateway: connected (heartbeat every {} ms)", heartbeat_interval);

    let mut heartbeat = tokio::time::interval(Duration::from_millis(heartbeat_interval));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_seq: Option<u64> = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }

            _ = heartbeat.tick() => {
                write
                    .send(Message::Text(json!({ "op": 1, "d": last_seq }).to_string()))
                    .await?;
            }

            frame = read.next() => {
                let frame = match frame {
                    Some(frame) => frame?,
                    None => return Err(GatewayError::Protocol("stream ended".to_string())),
                };

                let text = match frame {
                    Message::Text(text) => text,
                    Message::Close(_) => {
                        return Err(GatewayError::Protocol("server closed the connection".to_string()));
                    }
                    _ => continue,
                };

                let event: Value = match serde_json::from_str(&text) {
                    Ok(event) => event,
                    Err(e) => {
                        log::debug!("Gateway: unparseable frame: {}", e);
                        continue;
                    }
                };

                if let Some(seq) = event["s"].as_u64() {
                    last_seq = Some(seq);
                }

                match event["op"].as_u64() {
                    // Dispatch
                    Some(0) => {
                        if event["t"].as_str() == Some("MESSAGE_UPDATE") {
                            if tx.send(event["d"].clone()).await.is_err() {
                                // Consumer gone; we're shutting down.
                                return Ok(());
                            }
                        }
                    }
                    // Server-requested heartbeat
                    Some(1) => {
                        write
                            .send(Message::Text(json!({ "op": 1, "d": last_seq }).to_string()))
                            .await?;
                    }
                    // Reconnect / invalid session
                    Some(7) | Some(9) => {
                        return Err(GatewayError::Protocol("server requested reconnect".to_string()));
                    }
                    // Heartbeat ack and anything else
                    _ => {}
                }
            }
        }
    }
}
