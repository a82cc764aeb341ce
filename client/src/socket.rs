//! Shared websocket transport.
//!
//! One connection per process. Topics are joined with reference counting so
//! several views can share a server subscription; inbound events are
//! republished on a local [`EventBus`] where views attach their handlers.

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use parley_core::EventBus;
use parley_proto::{ClientFrame, ServerFrame};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue},
        Message as WsMessage,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::connection::ConnectionManager;

#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// `ws://` or `wss://` endpoint.
    pub url: Url,
    pub token: String,
    pub reconnect_delay: Duration,
}

impl SocketConfig {
    pub fn new(url: Url, token: impl Into<String>) -> Self {
        Self {
            url,
            token: token.into(),
            reconnect_delay: Duration::from_millis(1000),
        }
    }
}

struct Inner {
    bus: EventBus,
    connection: ConnectionManager,
    joins: Mutex<HashMap<String, usize>>,
    commands: UnboundedSender<ClientFrame>,
    shutdown: CancellationToken,
}

/// Handle to the shared socket; cheap to clone.
#[derive(Clone)]
pub struct Socket {
    inner: Arc<Inner>,
}

impl Socket {
    fn build() -> (Self, UnboundedReceiver<ClientFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Inner {
            bus: EventBus::new(),
            connection: ConnectionManager::new(),
            joins: Mutex::new(HashMap::new()),
            commands: tx,
            shutdown: CancellationToken::new(),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// Start the connection loop. It reconnects after every close or error
    /// until [`Socket::shutdown`] is called.
    pub fn connect(config: SocketConfig) -> Self {
        let (socket, commands) = Self::build();
        tokio::spawn(run(socket.inner.clone(), config, commands));
        socket
    }

    /// A socket with no transport; tests drive the connection signal and
    /// inspect queued frames themselves.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, UnboundedReceiver<ClientFrame>) {
        Self::build()
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    /// Ask the server for `topic`. The subscribe frame goes out on the first
    /// join only; the guard releases the join when dropped.
    pub fn join(&self, topic: &str) -> JoinGuard {
        let first = {
            let mut joins = self.inner.joins.lock();
            let count = joins.entry(topic.to_string()).or_insert(0);
            *count += 1;
            *count == 1
        };
        if first {
            self.command(ClientFrame::Subscribe {
                topic: topic.to_string(),
            });
        }
        JoinGuard {
            socket: self.clone(),
            topic: topic.to_string(),
        }
    }

    pub fn joined(&self) -> Vec<String> {
        self.inner.joins.lock().keys().cloned().collect()
    }

    fn release(&self, topic: &str) {
        let last = {
            let mut joins = self.inner.joins.lock();
            match joins.get_mut(topic) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    joins.remove(topic);
                    true
                }
                None => false,
            }
        };
        if last {
            self.command(ClientFrame::Unsubscribe {
                topic: topic.to_string(),
            });
        }
    }

    // frames queued while offline are discarded on reconnect
    fn command(&self, frame: ClientFrame) {
        if self.inner.commands.send(frame).is_err() {
            debug!("socket loop gone; dropping frame");
        }
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub(crate) fn dispatch(&self, text: &str) {
        self.inner.dispatch(text);
    }
}

impl Inner {
    fn dispatch(&self, text: &str) {
        match serde_json::from_str::<ServerFrame>(text) {
            Ok(ServerFrame::Event { topic, payload }) => {
                self.bus.publish(&topic, payload);
            }
            Ok(ServerFrame::Error { topic, error }) => {
                warn!(topic = ?topic, error = %error, "server rejected frame");
            }
            Ok(frame) => debug!(?frame, "server frame"),
            Err(e) => warn!(error = %e, "unreadable server frame"),
        }
    }
}

/// Live join on a topic; releases it on drop.
pub struct JoinGuard {
    socket: Socket,
    topic: String,
}

impl JoinGuard {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for JoinGuard {
    fn drop(&mut self) {
        self.socket.release(&self.topic);
    }
}

async fn run(inner: Arc<Inner>, config: SocketConfig, mut commands: UnboundedReceiver<ClientFrame>) {
    while !inner.shutdown.is_cancelled() {
        match session(&inner, &config, &mut commands).await {
            Ok(()) => debug!("socket closed"),
            Err(e) => warn!(error = %e, "socket failed"),
        }
        if inner.connection.mark_disconnected() {
            info!("live channel lost");
        }
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = tokio::time::sleep(config.reconnect_delay) => {}
        }
    }
    inner.connection.mark_disconnected();
}

fn encode(frame: &ClientFrame) -> Result<WsMessage> {
    Ok(WsMessage::Text(serde_json::to_string(frame)?))
}

async fn session(
    inner: &Inner,
    config: &SocketConfig,
    commands: &mut UnboundedReceiver<ClientFrame>,
) -> Result<()> {
    let mut req = config.url.as_str().into_client_request()?;
    req.headers_mut().insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", config.token))?,
    );
    let (ws, _) = tokio::select! {
        _ = inner.shutdown.cancelled() => return Ok(()),
        res = connect_async(req) => res?,
    };
    let (mut sink, mut stream) = ws.split();

    while commands.try_recv().is_ok() {}
    let topics: Vec<String> = inner.joins.lock().keys().cloned().collect();
    for topic in topics {
        sink.send(encode(&ClientFrame::Subscribe { topic })?).await?;
    }
    if inner.connection.mark_connected() {
        info!(url = %config.url, "live channel up");
    }

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => {
                let _ = sink.close().await;
                return Ok(());
            }
            Some(frame) = commands.recv() => {
                sink.send(encode(&frame)?).await?;
            }
            msg = stream.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => inner.dispatch(&text),
                Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
}
