//! Drives a full Zello session against a mock Channels server on a local
//! WebSocket: logon, channel status, outbound stream lifecycle with real
//! Opus media, and inbound keying.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use zello_usrp_bridge::codec::Encoder;
use zello_usrp_bridge::config::ZelloConfig;
use zello_usrp_bridge::queue::{ByteQueue, PttFlag};
use zello_usrp_bridge::zello::ZelloSession;

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

struct Server {
    ws: WebSocketStream<TcpStream>,
}

impl Server {
    /// Reads frames until the next text message, answering nothing.
    async fn recv_json(&mut self) -> Value {
        loop {
            let message = timeout(STEP_TIMEOUT, self.ws.next())
                .await
                .expect("no message before timeout")
                .expect("connection stayed open")
                .expect("clean frame");

            match message {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                Message::Ping(payload) => {
                    self.ws.send(Message::Pong(payload)).await.unwrap();
                },
                _ => {},
            }
        }
    }

    async fn recv_binary(&mut self) -> Vec<u8> {
        loop {
            let message = timeout(STEP_TIMEOUT, self.ws.next())
                .await
                .expect("no message before timeout")
                .expect("connection stayed open")
                .expect("clean frame");

            match message {
                Message::Binary(data) => return data,
                Message::Ping(payload) => {
                    self.ws.send(Message::Pong(payload)).await.unwrap();
                },
                _ => {},
            }
        }
    }

    async fn send_json(&mut self, value: Value) {
        self.ws.send(Message::Text(value.to_string())).await.unwrap();
    }

    async fn send_binary(&mut self, data: Vec<u8>) {
        self.ws.send(Message::Binary(data)).await.unwrap();
    }
}

struct Harness {
    server: Server,
    to_zello: Arc<ByteQueue>,
    from_zello: Arc<ByteQueue>,
    usrp_ptt: Arc<PttFlag>,
    zello_ptt: Arc<PttFlag>,
    shutdown: watch::Sender<bool>,
}

async fn start() -> Harness {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let config = ZelloConfig {
        endpoint: format!("ws://127.0.0.1:{port}"),
        username: "bridge".to_owned(),
        password: SecretString::new("hunter2".to_owned()),
        channel: "Test Channel".to_owned(),
        private_key: None,
        issuer: String::new(),
    };

    let to_zello = Arc::new(ByteQueue::new());
    let from_zello = Arc::new(ByteQueue::new());
    let usrp_ptt = Arc::new(PttFlag::new());
    let zello_ptt = Arc::new(PttFlag::new());

    let session = ZelloSession::new(
        config,
        None,
        None,
        Arc::clone(&to_zello),
        Arc::clone(&from_zello),
        Arc::clone(&usrp_ptt),
        Arc::clone(&zello_ptt),
    );

    let (shutdown, shutdown_rx) = watch::channel(false);
    tokio::spawn(session.run(shutdown_rx));

    let (stream, _) = timeout(STEP_TIMEOUT, listener.accept())
        .await
        .expect("session dialled in")
        .unwrap();
    let ws = tokio_tungstenite::accept_async(stream).await.unwrap();

    Harness {
        server: Server {
            ws,
        },
        to_zello,
        from_zello,
        usrp_ptt,
        zello_ptt,
        shutdown,
    }
}

/// Answers the logon and brings the channel online.
async fn log_in(harness: &mut Harness) {
    let logon = harness.server.recv_json().await;
    assert_eq!(logon["command"], "logon");
    assert_eq!(logon["username"], "bridge");
    assert_eq!(logon["channels"][0], "Test Channel");
    let seq = logon["seq"].as_u64().unwrap();

    harness
        .server
        .send_json(json!({"seq": seq, "success": true, "refresh_token": "r1"}))
        .await;
    harness
        .server
        .send_json(json!({"command": "on_channel_status", "channel": "Test Channel", "status": "online"}))
        .await;
}

fn sine_pcm(len: usize) -> Vec<u8> {
    (0..len / 2)
        .flat_map(|i| {
            let sample = (f64::sin(i as f64 * 0.07) * 10_000.0) as i16;
            sample.to_le_bytes()
        })
        .collect()
}

#[tokio::test]
async fn cold_start_logs_in_and_stays_quiet() {
    let mut harness = start().await;
    log_in(&mut harness).await;

    // No USRP traffic: no start_stream may arrive. Give the session a
    // moment to misbehave.
    let quiet = timeout(Duration::from_secs(2), harness.server.recv_json()).await;
    assert!(quiet.is_err(), "unexpected message: {quiet:?}");

    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn usrp_keying_opens_stream_sends_media_and_stops() {
    let mut harness = start().await;
    log_in(&mut harness).await;

    // A USRP carrier: keep 20 ms frames flowing while keyed.
    harness.usrp_ptt.set();
    let feeder = {
        let queue = Arc::clone(&harness.to_zello);
        let ptt = Arc::clone(&harness.usrp_ptt);
        tokio::spawn(async move {
            while ptt.is_set() {
                queue.write(&sine_pcm(640)).await;
                tokio::time::sleep(Duration::from_millis(40)).await;
            }
        })
    };

    // After the post-login cooldown, exactly one start_stream.
    let start = harness.server.recv_json().await;
    assert_eq!(start["command"], "start_stream");
    assert_eq!(start["type"], "audio");
    assert_eq!(start["codec"], "opus");
    let seq = start["seq"].as_u64().unwrap();

    harness
        .server
        .send_json(json!({"seq": seq, "success": true, "stream_id": 42}))
        .await;

    // Media frames: audio type, our stream id, packet ids from zero.
    let first = harness.server.recv_binary().await;
    assert_eq!(first[0], 0x01);
    assert_eq!(&first[1..5], &[0, 0, 0, 42]);
    assert_eq!(&first[5..9], &[0, 0, 0, 0]);
    assert!(first.len() > 9);

    let second = harness.server.recv_binary().await;
    assert_eq!(&second[5..9], &[0, 0, 0, 1]);

    // Unkey: the stream is closed out.
    harness.usrp_ptt.clear();
    feeder.await.unwrap();

    let stop = harness.server.recv_json().await;
    assert_eq!(stop["command"], "stop_stream");
    assert_eq!(stop["stream_id"], 42);

    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn remote_keying_decodes_audio_and_mirrors_ptt() {
    let mut harness = start().await;
    log_in(&mut harness).await;

    harness
        .server
        .send_json(json!({"command": "on_stream_start", "from": "alice"}))
        .await;
    timeout(STEP_TIMEOUT, harness.zello_ptt.wait_set())
        .await
        .expect("zello ptt set on stream start");

    // One 20 ms Opus packet: 9-byte prefix plus a real encoder's output.
    let mut encoder = Encoder::new(None, None).unwrap();
    let opus = encoder.encode(&sine_pcm(320)).unwrap();
    let mut frame = vec![0x01, 0, 0, 0, 7, 0, 0, 0, 0];
    frame.extend_from_slice(&opus);
    harness.server.send_binary(frame).await;

    let pcm = timeout(STEP_TIMEOUT, harness.from_zello.read(320)).await.unwrap();
    assert_eq!(pcm.len(), 320);

    harness
        .server
        .send_json(json!({"command": "on_stream_stop"}))
        .await;
    timeout(STEP_TIMEOUT, harness.zello_ptt.wait_clear())
        .await
        .expect("zello ptt cleared on stream stop");

    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn remote_keying_suppresses_outbound_stream() {
    let mut harness = start().await;
    log_in(&mut harness).await;

    // Remote user talks first.
    harness
        .server
        .send_json(json!({"command": "on_stream_start", "from": "alice"}))
        .await;
    timeout(STEP_TIMEOUT, harness.zello_ptt.wait_set()).await.unwrap();

    // USRP keys anyway: with the remote side keyed, no start_stream may go
    // out.
    harness.usrp_ptt.set();
    harness.to_zello.write(&sine_pcm(640)).await;

    let quiet = timeout(Duration::from_secs(2), harness.server.recv_json()).await;
    assert!(quiet.is_err(), "unexpected message: {quiet:?}");

    let _ = harness.shutdown.send(true);
}
