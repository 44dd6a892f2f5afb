//! WebSocket feed: subscribed event channels, periodic metrics, and commands
//! sent by the browser.
//!
//! Every outgoing frame is a JSON envelope with a `type` field. Channel
//! events carry `channel` next to the usual `{type, data, timestamp,
//! resourceId}`; metrics samples arrive as `system.metrics`; replies to
//! client commands as `command.result`.

use std::{fmt, str::FromStr, sync::Arc};

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{stream::SelectAll, Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum::IntoEnumIterator;
use tokio::sync::mpsc;
use warren_core::{
    domain::SessionId,
    sync::{Channel, Event},
    SyncBridge,
};

use super::{routes::ApiError, AppState};

/// Replies waiting to be written to one client.
const REPLY_BUFFER: usize = 32;

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Comma-separated channel names; all channels when absent.
    channels: Option<String>,
    /// Only forward events about this resource id.
    resource: Option<String>,
    /// Session to run commands under; a fresh `gui:` id when absent.
    session: Option<String>,
}

#[derive(Serialize)]
struct ChannelEvent<'a> {
    channel: Channel,
    #[serde(flatten)]
    event: &'a Event,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientMessage {
    Command {
        #[serde(rename = "requestId")]
        request_id: Option<Value>,
        command: String,
        #[serde(default)]
        params: Value,
    },
    Ping,
}

fn parse_channels(raw: Option<&str>) -> Result<Vec<Channel>, String> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(Channel::iter().collect()),
        Some(list) => list
            .split(',')
            .map(|name| {
                Channel::from_str(name.trim()).map_err(|_| format!("unknown channel '{name}'"))
            })
            .collect(),
    }
}

pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
) -> Result<Response, ApiError> {
    let channels = parse_channels(params.channels.as_deref())
        .map_err(warren_core::Error::validation)?;
    let session = match params.session {
        Some(raw) => SessionId::parse(raw).map_err(warren_core::Error::from)?,
        None => SessionId::gui(uuid::Uuid::new_v4()),
    };
    tracing::debug!(?channels, session = %session, "websocket upgrade");
    Ok(ws
        .on_upgrade(move |socket| {
            let (sender, receiver) = socket.split();
            feed(sender, receiver, state, channels, params.resource, session)
        })
        .into_response())
}

/// Pump frames between one client and the server until either side goes
/// away or the server shuts down.
///
/// Client commands run as tracked tasks and their replies come back through
/// a channel, so events and metrics keep flowing while a command is slow.
pub(super) async fn feed<S, R>(
    mut sender: S,
    mut receiver: R,
    state: AppState,
    channels: Vec<Channel>,
    resource: Option<String>,
    session: SessionId,
) where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let mut events = SelectAll::new();
    for channel in channels {
        let subscription = state.bridge.subscribe(channel);
        let subscription = match &resource {
            Some(id) => subscription.for_resource(id.clone()),
            None => subscription,
        };
        events.push(subscription.into_stream().map(move |event| (channel, event)));
    }

    let mut metrics = state.metrics.clone();
    let mut metrics_live = true;
    let mut shutdown = state.shutdown.subscribe();
    let (reply_tx, mut replies) = mpsc::channel::<Value>(REPLY_BUFFER);

    loop {
        let outgoing = tokio::select! {
            event = events.next() => match event {
                Some((channel, event)) => serde_json::to_string(&ChannelEvent { channel, event: &event }),
                None => break,
            },
            changed = metrics.changed(), if metrics_live => {
                if changed.is_err() {
                    metrics_live = false;
                    continue;
                }
                let sample = metrics.borrow_and_update().clone();
                match sample {
                    Some(sample) => serde_json::to_string(&json!({
                        "type": "system.metrics",
                        "data": sample,
                        "timestamp": sample.timestamp,
                    })),
                    None => continue,
                }
            },
            Some(reply) = replies.recv() => serde_json::to_string(&reply),
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let bridge = Arc::clone(&state.bridge);
                    let session = session.clone();
                    let reply_tx = reply_tx.clone();
                    state.commands.spawn(async move {
                        let answer = reply(&bridge, &session, &text).await;
                        if reply_tx.send(answer).await.is_err() {
                            tracing::debug!(session = %session, "client left before its reply");
                        }
                    });
                    continue;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "websocket receive failed");
                    break;
                }
            },
            signal = shutdown.recv() => {
                if signal.is_ok() {
                    let close = Message::Close(Some(CloseFrame {
                        code: axum::extract::ws::close_code::AWAY,
                        reason: "server shutting down".into(),
                    }));
                    if let Err(e) = sender.send(close).await {
                        tracing::debug!(error = %e, "close frame not delivered");
                    }
                }
                break;
            }
        };

        match outgoing {
            Ok(text) => {
                if let Err(e) = sender.send(Message::Text(text)).await {
                    tracing::debug!(error = %e, "websocket send failed");
                    break;
                }
            }
            Err(e) => tracing::warn!(error = %e, "websocket frame not serializable"),
        }
    }
    tracing::debug!(session = %session, "websocket closed");
}

/// Answer one client frame.
async fn reply(bridge: &SyncBridge, session: &SessionId, text: &str) -> Value {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Ping) => json!({ "type": "pong" }),
        Ok(ClientMessage::Command {
            request_id,
            command,
            params,
        }) => match bridge.execute_command(&command, params, session.as_str()).await {
            Ok(result) => json!({
                "type": "command.result",
                "requestId": request_id,
                "data": result,
            }),
            Err(e) => json!({
                "type": "error",
                "requestId": request_id,
                "message": e.to_string(),
            }),
        },
        Err(e) => json!({
            "type": "error",
            "message": format!("unrecognized message: {e}"),
        }),
    }
}
