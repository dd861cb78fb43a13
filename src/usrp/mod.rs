//! The USRP side of the bridge.
//!
//! Two UDP sockets and two tasks. The receive task decodes inbound USRP
//! frames, publishes the peer's keying state on the `usrp_ptt` flag and
//! feeds keyed PCM toward the Zello side; the transmit task wraps PCM from
//! the Zello side in keyed USRP frames and falls back to unkey keepalives
//! whenever it has nothing to say, so the downstream radio's squelch tracks
//! the bridge correctly.
//!
//! The sockets are stateless: send and receive errors are logged and the
//! loops carry on. There is no reconnect to perform.

mod packet;

pub use self::packet::{unkey_frame, voice_frame, Gain, UsrpHeader, USRP_MAGIC, USRP_TYPE_VOICE};

use std::sync::Arc;
use std::time::Instant;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{info, trace, warn};

use crate::config::UsrpConfig;
use crate::constants::{UNKEY_KEEPALIVE_GAP, USRP_HEADER_SIZE, USRP_VOICE_SIZE};
use crate::internal::prelude::*;
use crate::queue::{ByteQueue, PttFlag};

/// The USRP endpoint: a pair of UDP sockets plus the task state for each
/// direction.
pub struct UsrpEndpoint {
    rx: UsrpRx,
    tx: UsrpTx,
}

impl UsrpEndpoint {
    /// Binds the receive socket and connects the transmit socket.
    ///
    /// `pcm_to_zello` receives keyed inbound audio; `pcm_from_zello` is
    /// drained onto the wire; `usrp_ptt` mirrors the peer's keying state.
    pub async fn bind(
        config: &UsrpConfig,
        pcm_to_zello: Arc<ByteQueue>,
        pcm_from_zello: Arc<ByteQueue>,
        usrp_ptt: Arc<PttFlag>,
    ) -> Result<Self> {
        let rx_socket = UdpSocket::bind((config.bind_addr, config.rx_port)).await?;

        let tx_socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        tx_socket.connect((config.tx_host.as_str(), config.tx_port)).await?;

        info!(
            "USRP endpoint up: rx {}:{}, tx {}:{}",
            config.bind_addr, config.rx_port, config.tx_host, config.tx_port
        );

        Ok(Self {
            rx: UsrpRx {
                socket: rx_socket,
                gain: Gain::from_db(config.rx_gain_db),
                pcm_out: pcm_to_zello,
                ptt: usrp_ptt,
                keyed_at: None,
            },
            tx: UsrpTx {
                socket: tx_socket,
                gain: Gain::from_db(config.tx_gain_db),
                pcm_in: pcm_from_zello,
                seq: 0,
                keyed: false,
            },
        })
    }

    /// Runs both directions until shutdown.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let Self {
            mut rx,
            mut tx,
        } = self;

        tokio::join!(rx.run(shutdown.clone()), tx.run(shutdown));
    }
}

struct UsrpRx {
    socket: UdpSocket,
    gain: Gain,
    pcm_out: Arc<ByteQueue>,
    ptt: Arc<PttFlag>,
    keyed_at: Option<Instant>,
}

impl UsrpRx {
    async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!("USRP receive task started");

        let mut buffer = [0u8; 2048];

        loop {
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                received = self.socket.recv_from(&mut buffer) => match received {
                    Ok((len, _addr)) => self.process_datagram(&mut buffer[..len]).await,
                    Err(why) => warn!("USRP receive error: {why}"),
                },
            }
        }

        info!("USRP receive task stopped");
    }

    async fn process_datagram(&mut self, data: &mut [u8]) {
        let Some(header) = UsrpHeader::decode(data) else {
            warn!("Dropping malformed USRP datagram ({} bytes)", data.len());
            return;
        };

        if !header.keyed {
            if let Some(keyed_at) = self.keyed_at.take() {
                self.ptt.clear();
                info!("UnKeyed:USRP ({:.1}s)", keyed_at.elapsed().as_secs_f32());
            }
            return;
        }

        if self.keyed_at.is_none() {
            self.keyed_at = Some(Instant::now());
            self.ptt.set();
            info!("Keyed:USRP");
        }

        let payload = &mut data[USRP_HEADER_SIZE..];
        if payload.is_empty() {
            return;
        }

        let take = payload.len().min(USRP_VOICE_SIZE);
        self.gain.apply(&mut payload[..take]);
        self.pcm_out.write(&payload[..take]).await;
    }
}

struct UsrpTx {
    socket: UdpSocket,
    gain: Gain,
    pcm_in: Arc<ByteQueue>,
    seq: u32,
    keyed: bool,
}

impl UsrpTx {
    async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!("USRP transmit task started");

        loop {
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                () = self.step() => {},
            }
        }

        info!("USRP transmit task stopped");
    }

    /// One cycle of the egress loop: forward a frame of Zello audio if any
    /// arrives within the keepalive gap, otherwise report our unkeyed state
    /// so the peer's squelch closes.
    async fn step(&mut self) {
        match timeout(UNKEY_KEEPALIVE_GAP, self.pcm_in.read(USRP_VOICE_SIZE)).await {
            Ok(mut pcm) => {
                self.gain.apply(&mut pcm);
                self.keyed = true;

                let frame = voice_frame(self.next_seq(), &pcm);
                self.send(&frame).await;
            },
            Err(_) => {
                if self.keyed {
                    trace!("Zello audio drained; unkeying USRP peer");
                    self.keyed = false;
                }

                let frame = unkey_frame(self.next_seq());
                self.send(&frame).await;
            },
        }
    }

    async fn send(&self, frame: &[u8]) {
        if let Err(why) = self.socket.send(frame).await {
            warn!("USRP send error: {why}");
        }
    }

    fn next_seq(&mut self) -> u32 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);

        seq
    }
}
