//! A set of constants used by the bridge.

use std::time::Duration;

use audiopus::SampleRate;

/// Sample rate of audio on both sides of the bridge.
pub const SAMPLE_RATE: SampleRate = SampleRate::Hz8000;

/// Sample rate of audio on both sides of the bridge.
pub const SAMPLE_RATE_RAW: usize = 8_000;

/// Number of audio frames/packets carried per second.
pub const AUDIO_FRAME_RATE: usize = 50;

/// Length (in milliseconds) of any audio frame.
pub const FRAME_LEN_MS: usize = 1000 / AUDIO_FRAME_RATE;

/// Number of samples in one complete frame of mono audio.
pub const MONO_FRAME_SIZE: usize = SAMPLE_RATE_RAW / AUDIO_FRAME_RATE;

/// Number of bytes in one complete frame of raw `i16`-encoded mono audio.
pub const MONO_FRAME_BYTE_SIZE: usize = MONO_FRAME_SIZE * std::mem::size_of::<i16>();

/// Length of time between any two audio frames.
pub const TIMESTEP_LENGTH: Duration = Duration::from_millis(FRAME_LEN_MS as u64);

/// Size of a USRP header on the wire.
pub const USRP_HEADER_SIZE: usize = 32;

/// Size of the PCM payload of a USRP voice frame.
pub const USRP_VOICE_SIZE: usize = MONO_FRAME_BYTE_SIZE;

/// Total size of a USRP voice frame, header included.
pub const USRP_FRAME_SIZE: usize = USRP_HEADER_SIZE + USRP_VOICE_SIZE;

/// Delay between sends of USRP unkey frames while the bridge has no keyed
/// audio to forward. Keeps the downstream radio's squelch state correct.
pub const UNKEY_KEEPALIVE_GAP: Duration = Duration::from_millis(200);

/// Number of PCM bytes the Zello egress task pulls per iteration; encoded as
/// two independent 20 ms Opus frames.
pub const ZELLO_PCM_READ_SIZE: usize = 2 * MONO_FRAME_BYTE_SIZE;

/// Size of the type/stream/packet prefix on a Zello binary media frame.
pub const ZELLO_MEDIA_PREFIX: usize = 9;

/// Type byte marking a Zello binary frame as audio.
pub const ZELLO_FRAME_TYPE_AUDIO: u8 = 0x01;

/// Upper bound on the size of one encoded Opus frame.
pub const OPUS_PACKET_MAX: usize = 400;

/// Interval between client-initiated WebSocket pings.
pub const WS_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Kernel TCP keepalive: idle time before the first probe.
pub const TCP_KEEPALIVE_IDLE: Duration = Duration::from_secs(60);

/// Kernel TCP keepalive: interval between probes.
pub const TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Kernel TCP keepalive: probes before the connection is declared dead.
pub const TCP_KEEPALIVE_RETRIES: u32 = 4;

/// How long a minted authentication token remains valid.
pub const AUTH_TOKEN_EXPIRY: Duration = Duration::from_secs(3600);

/// Remaining validity below which the session reauthenticates.
pub const AUTH_TOKEN_REFRESH_THRESHOLD: Duration = Duration::from_secs(600);

/// Time allowed for a connection to reach the logged-in state.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Time after which a wedged in-flight authentication is abandoned.
pub const AUTH_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(8);

/// Time allowed for the server to answer `start_stream` with a stream id.
pub const START_STREAM_TIMEOUT: Duration = Duration::from_secs(2);

/// Delay before retrying `start_stream` after an ack timeout.
pub const START_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Keying is suppressed for this long after login completes.
pub const POST_LOGIN_COOLDOWN: Duration = Duration::from_millis(800);

/// Timeout on each PCM read in the Zello egress task; expiry ends the
/// current stream.
pub const PCM_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Backoff applied when the server reports the channel is not ready. Fixed,
/// never doubled.
pub const CHANNEL_BACKOFF: Duration = Duration::from_millis(500);

/// Initial backoff after the server's woodpecker rate limiter trips.
pub const WOODPECKER_BACKOFF_START: Duration = Duration::from_secs(3);

/// Initial backoff after the server rejects a stream as an empty message.
pub const EMPTY_MESSAGE_BACKOFF_START: Duration = Duration::from_secs(1);

/// Upper bound for the doubling rate limiter backoffs.
pub const RATE_LIMIT_BACKOFF_CAP: Duration = Duration::from_secs(8);

/// Sleep after a failed connection before the first reconnect attempt.
pub const RECONNECT_DELAY_MIN: Duration = Duration::from_secs(1);

/// Upper bound for the growing reconnect sleep.
pub const RECONNECT_DELAY_MAX: Duration = Duration::from_secs(5);
