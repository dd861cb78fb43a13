//! The Zello egress task: USRP-keyed PCM out of the bridge, onto the
//! channel as an Opus stream.
//!
//! The loop keys up (sends `start_stream`) when USRP audio starts flowing
//! and all of the session's gating conditions pass, forwards media frames
//! while the flow lasts, and stops the stream on USRP unkey, on a dry spell
//! at the queue, or on persistent encoder failure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::codec::Encoder;
use crate::constants::{
    MONO_FRAME_BYTE_SIZE,
    PCM_READ_TIMEOUT,
    START_RETRY_DELAY,
    START_STREAM_TIMEOUT,
    ZELLO_PCM_READ_SIZE,
};
use crate::queue::{ByteQueue, PttFlag};
use crate::zello::event::{media_frame, Command};
use crate::zello::state::SessionState;
use crate::zello::ws::ZelloSink;

/// Packet ids are 31-bit monotonic.
const PKT_ID_MASK: u32 = 0x7FFF_FFFF;

/// Consecutive encoder failures tolerated before the stream is ended.
const MAX_CODEC_ERRORS: u32 = 5;

pub(crate) struct ZelloTx {
    sink: ZelloSink,
    state: Arc<watch::Sender<SessionState>>,
    seq: Arc<AtomicU64>,
    channel: String,
    pcm_in: Arc<ByteQueue>,
    usrp_ptt: Arc<PttFlag>,
    zello_ptt: Arc<PttFlag>,
    encoder: Encoder,
    pkt_id: u32,
    codec_errors: u32,
    sending: bool,
}

impl ZelloTx {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sink: ZelloSink,
        state: Arc<watch::Sender<SessionState>>,
        seq: Arc<AtomicU64>,
        channel: String,
        pcm_in: Arc<ByteQueue>,
        usrp_ptt: Arc<PttFlag>,
        zello_ptt: Arc<PttFlag>,
        encoder: Encoder,
    ) -> Self {
        Self {
            sink,
            state,
            seq,
            channel,
            pcm_in,
            usrp_ptt,
            zello_ptt,
            encoder,
            pkt_id: 0,
            codec_errors: 0,
            sending: false,
        }
    }

    pub async fn run(mut self) {
        debug!("Zello transmit task started");

        while self.sink.is_open() {
            self.step().await;
        }

        debug!("Zello transmit task stopped");
    }

    async fn step(&mut self) {
        // USRP released mid-stream: close it out before blocking again.
        if self.sending && !self.usrp_ptt.is_set() {
            self.end_stream().await;
        }

        self.usrp_ptt.wait_set().await;

        let pcm = match timeout(PCM_READ_TIMEOUT, self.pcm_in.read(ZELLO_PCM_READ_SIZE)).await {
            Ok(pcm) => pcm,
            Err(_) => {
                if self.sending {
                    self.end_stream().await;
                }
                return;
            },
        };

        // Drop the frame while the remote side is talking or the session is
        // not usable yet; an outstanding stream yields to the remote talker.
        if self.zello_ptt.is_set() || !self.state.borrow().logged_in {
            if self.sending {
                self.end_stream().await;
            }
            return;
        }

        if !self.sending {
            self.begin_stream().await;
            if !self.sending {
                return;
            }
        }

        self.send_media(&pcm).await;
    }

    /// Sends `start_stream` and waits for the server to hand back a stream
    /// id. A silent server costs the retry delay before the next attempt.
    async fn begin_stream(&mut self) {
        if !self.state.borrow().can_start_stream(Instant::now()) {
            return;
        }

        self.state.send_modify(|state| {
            state.txing = true;
            state.stream_id = None;
        });

        let start = Command::start_audio_stream(self.next_seq(), &self.channel);
        if let Err(why) = self.sink.send_json(&start).await {
            warn!("Failed to send start_stream: {why}");
            self.state.send_modify(|state| state.txing = false);
            return;
        }

        let mut updates = self.state.subscribe();
        let acked = timeout(
            START_STREAM_TIMEOUT,
            updates.wait_for(|state| state.stream_id.is_some()),
        )
        .await;

        match acked {
            Ok(Ok(state)) => {
                let stream_id = state.stream_id.expect("guarded by wait_for");
                drop(state);

                self.pkt_id = 0;
                self.codec_errors = 0;
                self.sending = true;
                debug!("Outbound stream {stream_id} open");
            },
            _ => {
                warn!("start_stream was not acknowledged in time");
                self.state.send_modify(|state| {
                    state.txing = false;
                    state.stream_id = None;
                    state.start_retry_after = Some(Instant::now() + START_RETRY_DELAY);
                });
            },
        }
    }

    /// Encodes and sends each 20 ms block of the read as its own media
    /// frame.
    async fn send_media(&mut self, pcm: &[u8]) {
        for block in pcm.chunks(MONO_FRAME_BYTE_SIZE) {
            // The receive loop clears the stream id when the server force-
            // ends a stream; never send media past that point.
            let Some(stream_id) = self.state.borrow().stream_id else {
                self.sending = false;
                self.pkt_id = 0;
                return;
            };

            let opus = match self.encoder.encode(block) {
                Ok(opus) => opus,
                Err(why) => {
                    error!("Opus encode failed: {why}");
                    self.codec_errors += 1;
                    if self.codec_errors >= MAX_CODEC_ERRORS {
                        self.end_stream().await;
                        return;
                    }
                    continue;
                },
            };
            self.codec_errors = 0;

            let packet_id = self.next_pkt_id();
            if let Err(why) = self.sink.send_binary(media_frame(stream_id, packet_id, &opus)).await {
                warn!("Failed to send media frame: {why}");
                return;
            }
        }
    }

    async fn end_stream(&mut self) {
        let stream_id = self.state.borrow().stream_id;

        if let Some(stream_id) = stream_id {
            let stop = Command::StopStream {
                seq: self.next_seq(),
                channel: &self.channel,
                stream_id,
            };

            if let Err(why) = self.sink.send_json(&stop).await {
                warn!("Failed to send stop_stream: {why}");
            }
        }

        self.state.send_modify(|state| {
            state.txing = false;
            state.stream_id = None;
        });
        self.sending = false;
        self.pkt_id = 0;
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn next_pkt_id(&mut self) -> u32 {
        let id = self.pkt_id;
        self.pkt_id = (self.pkt_id + 1) & PKT_ID_MASK;

        id
    }
}

#[cfg(test)]
mod tests {
    use super::PKT_ID_MASK;

    #[test]
    fn pkt_id_wraps_within_31_bits() {
        let mut pkt_id = PKT_ID_MASK;
        pkt_id = (pkt_id + 1) & PKT_ID_MASK;

        assert_eq!(pkt_id, 0);
    }
}
