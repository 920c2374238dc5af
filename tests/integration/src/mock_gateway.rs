//! Scriptable mock gateway
//!
//! Every accepted socket is handed to the test as a [`MockConnection`];
//! the test then drives the server side frame by frame.

use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use cord_gateway::protocol::{GatewayMessage, OpCode};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::helpers::{bind_local, STEP_TIMEOUT};

enum ServerAction {
    Frame(GatewayMessage),
    Close(u16, String),
    /// Drop the TCP connection without a close frame
    Abort,
}

/// Server side of one client socket
pub struct MockConnection {
    /// Query string the client connected with
    pub query: HashMap<String, String>,
    actions: mpsc::UnboundedSender<ServerAction>,
    frames: mpsc::UnboundedReceiver<GatewayMessage>,
}

impl MockConnection {
    pub fn send(&self, frame: GatewayMessage) {
        let _ = self.actions.send(ServerAction::Frame(frame));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.actions.send(ServerAction::Close(code, reason.to_string()));
    }

    pub fn abort(&self) {
        let _ = self.actions.send(ServerAction::Abort);
    }

    /// Next frame from the client, `None` once it disconnected
    pub async fn recv(&mut self) -> Option<GatewayMessage> {
        timeout(STEP_TIMEOUT, self.frames.recv())
            .await
            .expect("Timed out waiting for a client frame")
    }

    /// Next frame with `op`, skipping heartbeats and anything else
    pub async fn recv_op(&mut self, op: OpCode) -> GatewayMessage {
        loop {
            let frame = self
                .recv()
                .await
                .unwrap_or_else(|| panic!("Client disconnected while waiting for {op}"));
            if frame.op == op {
                return frame;
            }
        }
    }

    /// Wait until the client goes away
    pub async fn closed(&mut self) {
        while self.recv().await.is_some() {}
    }
}

/// WebSocket server at `ws://127.0.0.1:{port}`
pub struct MockGateway {
    pub addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<MockConnection>,
    handle: JoinHandle<()>,
}

impl MockGateway {
    pub async fn start() -> Result<Self> {
        let (listener, addr) = bind_local().await?;
        let (sender, connections) = mpsc::unbounded_channel();

        let app = Router::new().route("/", get(upgrade)).with_state(sender);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self {
            addr,
            connections,
            handle,
        })
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Next client socket
    pub async fn accept(&mut self) -> MockConnection {
        timeout(STEP_TIMEOUT, self.connections.recv())
            .await
            .expect("Timed out waiting for a client connection")
            .expect("Mock gateway stopped")
    }

    /// Next client socket within `window`, if any
    pub async fn try_accept(&mut self, window: Duration) -> Option<MockConnection> {
        timeout(window, self.connections.recv()).await.ok().flatten()
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn upgrade(
    State(connections): State<mpsc::UnboundedSender<MockConnection>>,
    Query(query): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, connections, query))
}

async fn handle_socket(
    socket: WebSocket,
    connections: mpsc::UnboundedSender<MockConnection>,
    query: HashMap<String, String>,
) {
    let (actions, mut pending) = mpsc::unbounded_channel();
    let (frames, received) = mpsc::unbounded_channel();

    let mut compressor = (query.get("compress").map(String::as_str) == Some("zlib-stream"))
        .then(|| ZlibEncoder::new(Vec::new(), Compression::default()));

    let connection = MockConnection {
        query,
        actions,
        frames: received,
    };
    if connections.send(connection).is_err() {
        return;
    }

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            action = pending.recv() => match action {
                Some(ServerAction::Frame(frame)) => {
                    let Ok(json) = frame.to_json() else { continue };
                    let message = match compressor.as_mut() {
                        Some(encoder) => Message::Binary(compress(encoder, &json)),
                        None => Message::Text(json),
                    };
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
                Some(ServerAction::Close(code, reason)) => {
                    let frame = CloseFrame { code, reason: reason.into() };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                }
                Some(ServerAction::Abort) | None => break,
            },
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(frame) = GatewayMessage::from_json(&text) {
                        let _ = frames.send(frame);
                    }
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// One zlib-stream message: the payload plus a sync flush
fn compress(encoder: &mut ZlibEncoder<Vec<u8>>, json: &str) -> Vec<u8> {
    if encoder.write_all(json.as_bytes()).is_err() || encoder.flush().is_err() {
        return Vec::new();
    }
    std::mem::take(encoder.get_mut())
}
