// Browser-source WebSocket endpoint
//
// Each socket gets a writer task fed by the registry's outbound queue; the
// read half feeds control frames back into the runtime.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use relay_core::{ControlOutcome, DisconnectReason, Outbound, RelayError};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{BridgeError, BridgeState, Result};

const OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    #[serde(default)]
    pub channel: String,
    /// Client asset version
    pub v: Option<String>,
}

pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<BridgeState>,
    Query(params): Query<WsParams>,
) -> Result<Response> {
    let channel = params.channel.trim().to_lowercase();
    if channel.is_empty() {
        return Err(BridgeError::BadRequest("channel is required".into()));
    }
    Ok(ws.on_upgrade(move |socket| serve_client(state, channel, params.v, socket)))
}

fn frame(out: Outbound) -> WsMessage {
    match out {
        Outbound::Text(text) => WsMessage::Text(text),
        Outbound::Binary(bytes) => WsMessage::Binary(bytes),
        Outbound::Keepalive => WsMessage::Ping(Vec::new()),
    }
}

async fn serve_client(state: BridgeState, channel: String, version: Option<String>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_BUFFER);

    let handle = match state.relay.registry.register(&channel, version.as_deref(), tx) {
        Ok(handle) => handle,
        Err(RelayError::VersionMismatch { .. }) => {
            // Deliver the queued update notice, then hang up
            while let Some(out) = rx.recv().await {
                if sink.send(frame(out)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
            return;
        }
        Err(e) => {
            warn!(target: "ws", channel = %channel, error = %e, "Registration failed");
            let _ = sink.close().await;
            return;
        }
    };

    let registry = state.relay.registry.clone();
    let writer_handle = handle.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            if let Err(e) = sink.send(frame(out)).await {
                debug!(target: "ws", client = %writer_handle.display_name, error = %e, "Socket write failed");
                registry.unregister(&writer_handle, DisconnectReason::WriteFailed);
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            _ = &mut writer => break,
            inbound = stream.next() => match inbound {
                Some(Ok(WsMessage::Text(text))) => {
                    if state.relay.handle_control(&handle, &text) == ControlOutcome::Disconnect {
                        break;
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(target: "ws", client = %handle.display_name, error = %e, "Socket read failed");
                    break;
                }
            }
        }
    }

    state
        .relay
        .registry
        .unregister(&handle, DisconnectReason::Disconnected);
    writer.abort();
    info!(target: "ws", channel = %handle.channel, client = %handle.display_name, "Socket closed");
}
