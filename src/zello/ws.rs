//! WebSocket plumbing for the Zello session.
//!
//! The TCP stream is dialled by hand so kernel keepalive can be armed
//! before the TLS and WebSocket handshakes; a dead NAT mapping must take
//! the connection down instead of leaving the bridge mute.
//!
//! After the handshake the stream is split: the session's receive loop owns
//! the read half, while [`ZelloSink`] wraps the write half for the transmit
//! task and the session to share. Every send checks that the connection is
//! still believed open.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{client_async_tls_with_config, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use crate::constants::{TCP_KEEPALIVE_IDLE, TCP_KEEPALIVE_INTERVAL};
#[cfg(any(target_os = "linux", target_os = "macos"))]
use crate::constants::TCP_KEEPALIVE_RETRIES;
use crate::internal::prelude::*;
use crate::zello::ZelloError;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to the configured endpoint and returns the split halves.
pub async fn connect(endpoint: &str) -> Result<(ZelloSink, SplitStream<WsStream>)> {
    let url = Url::parse(endpoint)?;
    let host = url
        .host_str()
        .ok_or_else(|| Error::Config(format!("endpoint has no host: {endpoint}")))?;
    let port = url.port_or_known_default().unwrap_or(443);

    let tcp = TcpStream::connect((host, port)).await?;
    configure_keepalive(&tcp)?;

    let config = WebSocketConfig {
        max_message_size: None,
        max_frame_size: None,
        ..Default::default()
    };
    let (stream, _) = client_async_tls_with_config(endpoint, tcp, Some(config), None).await?;

    debug!("WebSocket established to {host}:{port}");

    let (sink, stream) = stream.split();

    Ok((ZelloSink::new(sink), stream))
}

fn configure_keepalive(stream: &TcpStream) -> std::io::Result<()> {
    let keepalive = TcpKeepalive::new()
        .with_time(TCP_KEEPALIVE_IDLE)
        .with_interval(TCP_KEEPALIVE_INTERVAL);

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    let keepalive = keepalive.with_retries(TCP_KEEPALIVE_RETRIES);

    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

/// The write half of the connection, shared between the session and its
/// transmit task.
#[derive(Clone)]
pub struct ZelloSink {
    inner: Arc<Mutex<SplitSink<WsStream, Message>>>,
    open: Arc<AtomicBool>,
}

impl ZelloSink {
    fn new(sink: SplitSink<WsStream, Message>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(sink)),
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Marks the connection gone; subsequent sends fail fast.
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub async fn send_json<T: Serialize>(&self, value: &T) -> Result<()> {
        let message = serde_json::to_string(value).map(Message::Text)?;
        self.send(message).await
    }

    pub async fn send_binary(&self, payload: Vec<u8>) -> Result<()> {
        self.send(Message::Binary(payload)).await
    }

    pub async fn send_ping(&self) -> Result<()> {
        self.send(Message::Ping(Vec::new())).await
    }

    pub async fn send_pong(&self, payload: Vec<u8>) -> Result<()> {
        self.send(Message::Pong(payload)).await
    }

    async fn send(&self, message: Message) -> Result<()> {
        if !self.is_open() {
            return Err(ZelloError::NotConnected.into());
        }

        let result = self.inner.lock().await.send(message).await;
        if result.is_err() {
            self.mark_closed();
        }

        result.map_err(Into::into)
    }

    /// Closes the WebSocket politely. Best-effort; the peer may already be
    /// gone.
    pub async fn close(&self) {
        self.mark_closed();
        let _ = self.inner.lock().await.close().await;
    }
}
