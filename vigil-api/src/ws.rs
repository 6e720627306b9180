//! WebSocket broadcast gateway.
//!
//! Each session holds a set of subscribed agent addresses and forwards
//! matching hub events as `{type, agentAddress, data, timestamp}` frames.
//! Backpressure rides on the session's bounded hub buffer: when the hub
//! drops the session for lagging, the session closes with a `lagging`
//! notice. Keepalive pings go out every 30 s; a client silent for 90 s is
//! disconnected.

use std::collections::HashSet;
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::debug;

use vigil_hub::SubscriptionScope;
use vigil_primitives::{AgentAddress, MonitorEvent};

use crate::state::ApiState;

const OUTBOUND_QUEUE: usize = 256;
const PING_INTERVAL: Duration = Duration::from_secs(30);
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ControlMessage {
    action: String,
    #[serde(default)]
    agent_address: Option<String>,
}

/// Upgrades the connection and runs the session.
pub(crate) async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(move |socket| session(socket, state))
}

fn event_frame(event: &MonitorEvent) -> Value {
    let (kind, data) = match event {
        MonitorEvent::Heartbeat {
            heartbeat_count,
            decision_ref,
            ..
        } => (
            "heartbeat",
            json!({
                "heartbeatCount": heartbeat_count,
                "decisionRef": decision_ref.to_string(),
            }),
        ),
        MonitorEvent::Decision { decision_ref, .. } => (
            "decision",
            json!({ "decisionRef": decision_ref.to_string() }),
        ),
        MonitorEvent::StatusChange {
            level,
            severity,
            remaining,
            ..
        } => (
            "status",
            json!({
                "level": level,
                "severity": severity,
                "remaining": remaining,
            }),
        ),
        MonitorEvent::Death { .. } => ("death", json!({})),
        MonitorEvent::Error { message, alert, .. } => (
            "error",
            json!({ "message": message, "alert": alert }),
        ),
    };
    json!({
        "type": kind,
        "agentAddress": event.agent_address(),
        "data": data,
        "timestamp": event.timestamp(),
    })
}

fn notice_frame(kind: &str, message: &str) -> String {
    json!({
        "type": "status",
        "agentAddress": Value::Null,
        "data": { "notice": kind, "message": message },
        "timestamp": Value::Null,
    })
    .to_string()
}

async fn session(socket: WebSocket, state: ApiState) {
    let mut sub = state
        .inner
        .hub
        .subscribe_with_buffer(SubscriptionScope::All, OUTBOUND_QUEUE)
        .await;
    let (mut sink, mut stream) = socket.split();
    let mut subscribed: HashSet<AgentAddress> = HashSet::new();
    let mut last_activity = Instant::now();

    let mut ping = interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let _ = sink
        .send(Message::Text(notice_frame("welcome", "connected")))
        .await;

    loop {
        tokio::select! {
            () = state.inner.cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            _ = ping.tick() => {
                if last_activity.elapsed() > IDLE_TIMEOUT {
                    debug!("websocket session idle; closing");
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            event = sub.recv() => match event {
                None => {
                    // The hub dropped this session for lagging.
                    let _ = sink
                        .send(Message::Text(notice_frame("lagging", "session dropped")))
                        .await;
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                Some(event) => {
                    if !subscribed.contains(&event.agent_address()) {
                        continue;
                    }
                    let frame = event_frame(&event).to_string();
                    if sink.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
            },
            incoming = stream.next() => match incoming {
                None | Some(Err(_)) => break,
                Some(Ok(message)) => {
                    last_activity = Instant::now();
                    match message {
                        Message::Text(text) => {
                            if let Some(reply) = handle_control(&text, &mut subscribed) {
                                if sink.send(Message::Text(reply)).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Message::Close(_) => break,
                        // Pings are answered by the transport; pongs only
                        // refresh activity.
                        _ => {}
                    }
                }
            },
        }
    }

    state.inner.hub.unsubscribe(sub.id()).await;
}

fn handle_control(text: &str, subscribed: &mut HashSet<AgentAddress>) -> Option<String> {
    let control: ControlMessage = match serde_json::from_str(text) {
        Ok(control) => control,
        Err(err) => return Some(notice_frame("error", &format!("unreadable control: {err}"))),
    };

    match control.action.as_str() {
        "ping" => Some(notice_frame("pong", "alive")),
        "subscribe" | "unsubscribe" => {
            let Some(raw) = control.agent_address.as_deref() else {
                return Some(notice_frame("error", "agentAddress is required"));
            };
            let Ok(address) = raw.parse::<AgentAddress>() else {
                return Some(notice_frame("error", "invalid agentAddress"));
            };
            if control.action == "subscribe" {
                subscribed.insert(address);
                Some(notice_frame("subscribed", raw))
            } else {
                subscribed.remove(&address);
                Some(notice_frame("unsubscribed", raw))
            }
        }
        other => Some(notice_frame("error", &format!("unknown action `{other}`"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> AgentAddress {
        let mut bytes = [0_u8; 20];
        bytes[19] = n;
        AgentAddress::from_inner(bytes.into())
    }

    #[test]
    fn control_subscribe_roundtrip() {
        let mut subscribed = HashSet::new();
        let address = addr(1);
        let text = format!(r#"{{"action":"subscribe","agentAddress":"{address}"}}"#);
        let reply = handle_control(&text, &mut subscribed).unwrap();
        assert!(reply.contains("subscribed"));
        assert!(subscribed.contains(&address));

        let text = format!(r#"{{"action":"unsubscribe","agentAddress":"{address}"}}"#);
        handle_control(&text, &mut subscribed).unwrap();
        assert!(subscribed.is_empty());
    }

    #[test]
    fn control_ping_answers() {
        let mut subscribed = HashSet::new();
        let reply = handle_control(r#"{"action":"ping"}"#, &mut subscribed).unwrap();
        assert!(reply.contains("pong"));
    }

    #[test]
    fn malformed_control_is_reported() {
        let mut subscribed = HashSet::new();
        let reply = handle_control("not json", &mut subscribed).unwrap();
        assert!(reply.contains("error"));
    }

    #[test]
    fn frames_carry_the_wire_shape() {
        let event = MonitorEvent::Death {
            agent_address: addr(2),
            timestamp: 42,
        };
        let frame = event_frame(&event);
        assert_eq!(frame["type"], "death");
        assert_eq!(frame["timestamp"], 42);
        assert!(frame["agentAddress"].as_str().unwrap().starts_with("0x"));
    }
}
