//! The Zello Channels side of the bridge.
//!
//! [`ZelloSession`] drives one WebSocket connection at a time: logon
//! (password, minted RS256 token, or refresh token), the receive loop that
//! owns the socket, and the transmit task that shares its write half. On
//! any fatal error the connection state is discarded wholesale and the
//! session dials again after a short, growing sleep. Only the refresh token
//! outlives a connection.

mod error;
mod event;
mod state;
mod token;
mod tx;
mod ws;

pub use self::error::ZelloError;
pub use self::event::{codec_header, media_frame, media_payload, Command, ErrorKind, ZelloEvent};
pub use self::token::TokenService;
pub use self::ws::ZelloSink;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use secrecy::ExposeSecret;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};

use self::state::SessionState;
use self::tx::ZelloTx;
use crate::codec::{Decoder, Encoder};
use crate::config::ZelloConfig;
use crate::constants::{
    AUTH_TIMEOUT,
    AUTH_WATCHDOG_TIMEOUT,
    RECONNECT_DELAY_MAX,
    RECONNECT_DELAY_MIN,
    WS_HEARTBEAT_INTERVAL,
};
use crate::internal::prelude::*;
use crate::queue::{ByteQueue, PttFlag};

/// A client for the Zello Channels API, connected to a single channel.
pub struct ZelloSession {
    config: ZelloConfig,
    token_service: Option<TokenService>,
    /// Granted by the server on login; preferred for the next logon,
    /// including across reconnects.
    refresh_token: Option<String>,
    seq: Arc<AtomicU64>,
    opus_complexity: Option<u8>,
    opus_bitrate: Option<i32>,
    /// PCM from the USRP side, awaiting encoding.
    pcm_to_zello: Arc<ByteQueue>,
    /// Decoded PCM headed for the USRP side.
    pcm_from_zello: Arc<ByteQueue>,
    usrp_ptt: Arc<PttFlag>,
    zello_ptt: Arc<PttFlag>,
    consecutive_failures: u32,
}

impl ZelloSession {
    #[must_use]
    pub fn new(
        config: ZelloConfig,
        opus_complexity: Option<u8>,
        opus_bitrate: Option<i32>,
        pcm_to_zello: Arc<ByteQueue>,
        pcm_from_zello: Arc<ByteQueue>,
        usrp_ptt: Arc<PttFlag>,
        zello_ptt: Arc<PttFlag>,
    ) -> Self {
        let token_service = config
            .private_key
            .clone()
            .map(|path| TokenService::new(path, config.issuer.clone()));

        Self {
            config,
            token_service,
            refresh_token: None,
            seq: Arc::new(AtomicU64::new(0)),
            opus_complexity,
            opus_bitrate,
            pcm_to_zello,
            pcm_from_zello,
            usrp_ptt,
            zello_ptt,
            consecutive_failures: 0,
        }
    }

    /// Connects, reconnects and relays until shutdown is signalled.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_connection(&mut shutdown).await {
                Ok(()) => break,
                Err(why) => warn!("Zello connection ended: {why}"),
            }

            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            let delay = (RECONNECT_DELAY_MIN * self.consecutive_failures).min(RECONNECT_DELAY_MAX);
            debug!("Reconnecting in {}s", delay.as_secs());

            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                () = sleep(delay) => {},
            }
        }

        info!("Zello session stopped");
    }

    /// One connection's lifetime. `Ok` means shutdown was requested; any
    /// error sends the caller around the reconnect loop.
    async fn run_connection(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        info!("Connecting to {}", self.config.endpoint);
        let (sink, mut stream) = ws::connect(&self.config.endpoint).await?;

        // Fresh state per connection; a reconnect must never inherit a
        // stale login, stream id or backoff.
        let (state, _) = watch::channel(SessionState::new());
        let state = Arc::new(state);

        self.authenticate(&sink, &state).await?;

        let encoder = Encoder::new(self.opus_complexity, self.opus_bitrate)?;
        let tx_task = tokio::spawn(
            ZelloTx::new(
                sink.clone(),
                Arc::clone(&state),
                Arc::clone(&self.seq),
                self.config.channel.clone(),
                Arc::clone(&self.pcm_to_zello),
                Arc::clone(&self.usrp_ptt),
                Arc::clone(&self.zello_ptt),
                encoder,
            )
            .run(),
        );

        let mut decoder = Decoder::new()?;
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        let mut next_ping = Instant::now() + WS_HEARTBEAT_INTERVAL;

        let result = loop {
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break Ok(()),
                _ = tick.tick() => {
                    if let Err(why) = self.on_tick(&sink, &state, &mut next_ping).await {
                        break Err(why);
                    }
                },
                message = stream.next() => match message {
                    Some(Ok(message)) => {
                        if let Err(why) = self.handle_message(message, &sink, &state, &mut decoder).await {
                            break Err(why);
                        }
                    },
                    Some(Err(why)) => break Err(why.into()),
                    None => break Err(ZelloError::Closed(None).into()),
                },
            }
        };

        // Teardown order matters: silence the transmit task, then close the
        // socket, then drop any lingering remote keying.
        tx_task.abort();
        let _ = tx_task.await;
        sink.close().await;
        self.zello_ptt.clear();

        result
    }

    /// Sends a `logon`, preferring the refresh token from the previous
    /// session and falling back to a minted token where a private key is
    /// configured.
    async fn authenticate(
        &mut self,
        sink: &ZelloSink,
        state: &watch::Sender<SessionState>,
    ) -> Result<()> {
        let refresh_token = self.refresh_token.take();
        let auth_token = match (&refresh_token, self.token_service.as_mut()) {
            (None, Some(service)) => Some(service.mint().await?),
            _ => None,
        };

        if refresh_token.is_some() {
            info!("Authenticating with refresh token");
        } else if auth_token.is_some() {
            info!("Authenticating with new token");
        } else {
            info!("Authenticating with credentials");
        }

        let seq = self.next_seq();
        let logon = Command::Logon {
            seq,
            username: &self.config.username,
            password: self.config.password.expose_secret().as_str(),
            channels: [self.config.channel.as_str()],
            auth_token: auth_token.as_deref(),
            refresh_token: refresh_token.as_deref(),
        };

        state.send_modify(|state| {
            state.auth_in_progress = true;
            state.auth_seq = Some(seq);
            state.auth_started = Some(Instant::now());
        });

        sink.send_json(&logon).await
    }

    /// Once a second: heartbeat, auth watchdog, login deadline, token
    /// refresh.
    async fn on_tick(
        &mut self,
        sink: &ZelloSink,
        state: &watch::Sender<SessionState>,
        next_ping: &mut Instant,
    ) -> Result<()> {
        let now = Instant::now();

        if now >= *next_ping {
            sink.send_ping().await?;
            *next_ping = now + WS_HEARTBEAT_INTERVAL;
        }

        let (logged_in, txing, auth_in_progress, auth_started, connected_at) = {
            let state = state.borrow();
            (
                state.logged_in,
                state.txing,
                state.auth_in_progress,
                state.auth_started,
                state.connected_at,
            )
        };

        if auth_in_progress
            && auth_started.is_some_and(|at| now.duration_since(at) >= AUTH_WATCHDOG_TIMEOUT)
        {
            warn!("No response to authentication; clearing in-flight auth");
            state.send_modify(|state| {
                state.auth_in_progress = false;
                state.auth_seq = None;
                state.auth_started = None;
            });
        }

        if !logged_in && now.duration_since(connected_at) >= AUTH_TIMEOUT {
            return Err(ZelloError::LoginTimeout.into());
        }

        if logged_in && !txing && !auth_in_progress {
            let due = self
                .token_service
                .as_ref()
                .is_some_and(|service| service.needs_refresh(token::unix_now()));

            if due {
                info!("Auth token nearing expiry; reauthenticating");
                self.authenticate(sink, state).await?;
            }
        }

        Ok(())
    }

    async fn handle_message(
        &mut self,
        message: Message,
        sink: &ZelloSink,
        state: &watch::Sender<SessionState>,
        decoder: &mut Decoder,
    ) -> Result<()> {
        match message {
            Message::Text(text) => {
                trace!("Inbound: {text}");
                match ZelloEvent::parse(&text) {
                    Ok(event) => self.handle_event(event, sink, state).await,
                    Err(why) => {
                        warn!("Undecodable message: {why}");
                        Ok(())
                    },
                }
            },
            Message::Binary(data) => {
                if let Some(opus) = media_payload(&data) {
                    match decoder.decode(opus) {
                        Ok(pcm) => self.pcm_from_zello.write(&pcm).await,
                        Err(why) => error!("Opus decode failed: {why}"),
                    }
                } else {
                    debug!("Ignoring {}-byte non-audio binary frame", data.len());
                }
                Ok(())
            },
            Message::Ping(payload) => sink.send_pong(payload).await,
            Message::Pong(_) => Ok(()),
            Message::Close(frame) => Err(ZelloError::Closed(frame).into()),
            Message::Frame(_) => Ok(()),
        }
    }

    async fn handle_event(
        &mut self,
        event: ZelloEvent,
        sink: &ZelloSink,
        state: &watch::Sender<SessionState>,
    ) -> Result<()> {
        match event {
            ZelloEvent::ChannelStatus {
                online,
            } => {
                let was_ready = state.borrow().channel_ready;
                state.send_modify(|state| {
                    state.channel_ready = online;
                    if online {
                        state.channel_seen_online = true;
                    }
                });

                if online && !was_ready {
                    info!("Channel is ready");
                } else if !online {
                    debug!("Channel went offline");
                }

                self.try_complete_login(state);
                Ok(())
            },
            ZelloEvent::Response {
                seq,
                refresh_token,
                stream_id,
            } => {
                let auth_seq = state.borrow().auth_seq;

                if seq.is_some() && seq == auth_seq {
                    if let Some(token) = refresh_token {
                        self.refresh_token = Some(token);
                    }
                    if let Some(service) = self.token_service.as_mut() {
                        service.note_refreshed(token::unix_now());
                    }

                    state.send_modify(|state| {
                        state.auth_in_progress = false;
                        state.auth_seq = None;
                        state.auth_started = None;
                        state.auth_succeeded = true;
                    });

                    self.try_complete_login(state);
                } else if let Some(stream_id) = stream_id {
                    // Ack for start_stream. Ignore a late ack for an attempt
                    // the transmit task has already written off.
                    state.send_modify(|state| {
                        if state.txing {
                            state.stream_id = Some(stream_id);
                        }
                    });
                }

                Ok(())
            },
            ZelloEvent::StreamStart {
                from,
            } => {
                let user = from.unwrap_or_else(|| "Zello".to_owned());
                info!("Keyed:{user}");

                state.send_modify(|state| {
                    state.talk_user = Some(user);
                    state.remote_keyed_at = Some(Instant::now());
                });
                self.zello_ptt.set();
                Ok(())
            },
            ZelloEvent::StreamStop => {
                self.zello_ptt.clear();

                let mut user = None;
                let mut keyed_at = None;
                state.send_modify(|state| {
                    user = state.talk_user.take();
                    keyed_at = state.remote_keyed_at.take();
                });

                let user = user.unwrap_or_else(|| "Zello".to_owned());
                let elapsed = keyed_at.map_or(0.0, |at| at.elapsed().as_secs_f32());
                info!("UnKeyed:{user} ({elapsed:.1}s)");
                Ok(())
            },
            ZelloEvent::Error {
                kind,
            } => self.handle_server_error(kind, sink, state).await,
            ZelloEvent::Unknown => Ok(()),
        }
    }

    async fn handle_server_error(
        &mut self,
        kind: ErrorKind,
        sink: &ZelloSink,
        state: &watch::Sender<SessionState>,
    ) -> Result<()> {
        match kind {
            ErrorKind::Kicked => {
                warn!("Kicked by the server");
                Err(ZelloError::Kicked.into())
            },
            ErrorKind::Woodpecker => {
                warn!("Rate limited (woodpecker); suppressing keying");
                self.force_end_stream(sink, state).await;
                state.send_modify(|state| state.trip_woodpecker(Instant::now()));
                Ok(())
            },
            ErrorKind::EmptyMessage => {
                warn!("Stream rejected as empty; suppressing keying");
                self.force_end_stream(sink, state).await;
                state.send_modify(|state| state.trip_empty_message(Instant::now()));
                Ok(())
            },
            ErrorKind::ChannelNotReady => {
                debug!("Channel is not ready; delaying keying");
                state.send_modify(|state| state.trip_channel_backoff(Instant::now()));
                Ok(())
            },
            ErrorKind::Other(message) => {
                error!("Zello error: {message}");
                Err(ZelloError::Server(message).into())
            },
        }
    }

    /// Closes any in-flight outbound stream from the receive side, used
    /// when the server force-ends a transmission.
    async fn force_end_stream(&self, sink: &ZelloSink, state: &watch::Sender<SessionState>) {
        let stream_id = {
            let state = state.borrow();
            state.txing.then_some(state.stream_id).flatten()
        };

        if let Some(stream_id) = stream_id {
            let stop = Command::StopStream {
                seq: self.next_seq(),
                channel: &self.config.channel,
                stream_id,
            };

            if let Err(why) = sink.send_json(&stop).await {
                warn!("Failed to send stop_stream: {why}");
            }
        }

        state.send_modify(|state| {
            state.txing = false;
            state.stream_id = None;
        });
    }

    /// The logged-in edge: fires exactly once per connection, after both
    /// the auth success and the first online channel status.
    fn try_complete_login(&mut self, state: &watch::Sender<SessionState>) {
        let mut completed = false;

        state.send_modify(|state| {
            if state.auth_succeeded && state.channel_seen_online && !state.logged_in {
                state.logged_in = true;
                state.login_at = Some(Instant::now());
                completed = true;
            }
        });

        if completed {
            info!("Logged in!");
            self.consecutive_failures = 0;
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }
}
