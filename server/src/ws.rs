//! Realtime websocket transport over the event bus.

use std::collections::HashMap;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Extension, State,
    },
    response::{IntoResponse, Response},
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use parley_core::{ChatError, Identity, RequestContext, SubscriptionHandle};
use parley_proto::{ClientFrame, Event, ServerFrame};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info};

use crate::api::{run, ApiError, AppState};

/// Upgrade an authenticated request to the realtime socket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, ApiError> {
    let store = state.store.clone();
    let lookup = ctx.clone();
    let profile = run("ws_connect", move || Ok(store.resolve_caller(&lookup)?))
        .await?
        .ok_or(ApiError(ChatError::Unauthenticated))?;
    info!(profile_id = %profile.id, "socket connected");
    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state, ctx))
        .into_response())
}

async fn handle_socket(stream: WebSocket, state: AppState, ctx: RequestContext) {
    let (mut sender, mut receiver) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    // dropping a handle detaches it from the bus
    let mut subs: HashMap<String, SubscriptionHandle> = HashMap::new();
    if send_frame(&mut sender, &ServerFrame::Hello).await.is_err() {
        return;
    }
    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                let frame = ServerFrame::Event { topic: event.topic, payload: event.payload };
                if send_frame(&mut sender, &frame).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                let text = match incoming {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let reply = handle_frame(&state, &ctx, &tx, &mut subs, &text).await;
                if send_frame(&mut sender, &reply).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!(subscriptions = subs.len(), "socket closed");
}

async fn handle_frame(
    state: &AppState,
    ctx: &RequestContext,
    tx: &UnboundedSender<Event>,
    subs: &mut HashMap<String, SubscriptionHandle>,
    text: &str,
) -> ServerFrame {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(_) => {
            return ServerFrame::Error {
                topic: None,
                error: "invalid_frame".into(),
            }
        }
    };
    match frame {
        ClientFrame::Subscribe { topic } => {
            let service = state.service.clone();
            let ctx = ctx.clone();
            let requested = topic.clone();
            match run("subscribe", move || service.authorize_topic(&ctx, &requested)).await {
                Ok(_) => {
                    if !subs.contains_key(&topic) {
                        let handle = state.bus.attach(&topic, tx.clone());
                        subs.insert(topic.clone(), handle);
                    }
                    ServerFrame::Subscribed { topic }
                }
                Err(ApiError(e)) => ServerFrame::Error {
                    topic: Some(topic),
                    error: e.public_message(),
                },
            }
        }
        ClientFrame::Unsubscribe { topic } => {
            subs.remove(&topic);
            ServerFrame::Unsubscribed { topic }
        }
    }
}

async fn send_frame(
    sender: &mut SplitSink<WebSocket, WsMessage>,
    frame: &ServerFrame,
) -> anyhow::Result<()> {
    let text = serde_json::to_string(frame)?;
    sender.send(WsMessage::Text(text)).await?;
    Ok(())
}
