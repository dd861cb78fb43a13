//! Wire types for the Zello Channels protocol: outbound JSON commands,
//! inbound events, and the binary media framing.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::constants::{
    FRAME_LEN_MS,
    SAMPLE_RATE_RAW,
    ZELLO_FRAME_TYPE_AUDIO,
    ZELLO_MEDIA_PREFIX,
};
use crate::internal::prelude::*;

/// An outbound command, serialised as a JSON text frame.
#[derive(Debug, Serialize)]
#[serde(tag = "command")]
pub enum Command<'a> {
    #[serde(rename = "logon")]
    Logon {
        seq: u64,
        username: &'a str,
        password: &'a str,
        channels: [&'a str; 1],
        #[serde(skip_serializing_if = "Option::is_none")]
        auth_token: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        refresh_token: Option<&'a str>,
    },
    #[serde(rename = "start_stream")]
    StartStream {
        seq: u64,
        channel: &'a str,
        #[serde(rename = "type")]
        stream_type: &'a str,
        codec: &'a str,
        codec_header: String,
        packet_duration: u32,
    },
    #[serde(rename = "stop_stream")]
    StopStream {
        seq: u64,
        channel: &'a str,
        stream_id: u32,
    },
}

impl<'a> Command<'a> {
    /// The `start_stream` command for this bridge's one supported format.
    #[must_use]
    pub fn start_audio_stream(seq: u64, channel: &'a str) -> Self {
        Self::StartStream {
            seq,
            channel,
            stream_type: "audio",
            codec: "opus",
            codec_header: codec_header(),
            packet_duration: FRAME_LEN_MS as u32,
        }
    }
}

/// The base64 codec descriptor sent with `start_stream`: little-endian
/// sample rate, channel count, frame length in milliseconds.
#[must_use]
pub fn codec_header() -> String {
    let mut raw = [0u8; 4];
    LittleEndian::write_i16(&mut raw[..2], SAMPLE_RATE_RAW as i16);
    raw[2] = 1;
    raw[3] = FRAME_LEN_MS as u8;

    STANDARD.encode(raw)
}

/// Builds one binary media frame: type byte, stream id, packet id, Opus
/// payload.
#[must_use]
pub fn media_frame(stream_id: u32, packet_id: u32, opus: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(ZELLO_MEDIA_PREFIX + opus.len());
    frame.push(ZELLO_FRAME_TYPE_AUDIO);
    frame.extend_from_slice(&stream_id.to_be_bytes());
    frame.extend_from_slice(&packet_id.to_be_bytes());
    frame.extend_from_slice(opus);

    frame
}

/// The Opus payload of an inbound binary media frame, if it carries one.
#[must_use]
pub fn media_payload(frame: &[u8]) -> Option<&[u8]> {
    if frame.len() <= ZELLO_MEDIA_PREFIX || frame[0] != ZELLO_FRAME_TYPE_AUDIO {
        return None;
    }

    Some(&frame[ZELLO_MEDIA_PREFIX..])
}

/// Classified server error strings.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Another login displaced this session.
    Kicked,
    /// The server's rapid-rekey rate limiter tripped.
    Woodpecker,
    /// The server discarded a stream that carried no audio.
    EmptyMessage,
    /// The channel cannot accept a stream yet.
    ChannelNotReady,
    Other(String),
}

impl ErrorKind {
    #[must_use]
    pub fn classify(error: &str) -> Self {
        match error {
            "kicked" => Self::Kicked,
            "woodpecker prohibited" => Self::Woodpecker,
            "empty message" => Self::EmptyMessage,
            "channel is not ready" => Self::ChannelNotReady,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// An inbound JSON message, decoded into the handful of shapes the session
/// acts on.
#[derive(Clone, Debug, PartialEq)]
pub enum ZelloEvent {
    /// `on_channel_status`; `online` is the only status the session cares
    /// about.
    ChannelStatus { online: bool },
    /// A remote user keyed up.
    StreamStart { from: Option<String> },
    /// The remote user released.
    StreamStop,
    /// A `success` response to one of our commands.
    Response {
        seq: Option<u64>,
        refresh_token: Option<String>,
        stream_id: Option<u32>,
    },
    /// The server reported an error.
    Error { kind: ErrorKind },
    /// Anything the bridge has no use for.
    Unknown,
}

impl ZelloEvent {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(Self::decode(&serde_json::from_str(text)?))
    }

    /// Decodes by field probing; the protocol mixes command frames,
    /// responses and errors in one JSON namespace.
    #[must_use]
    pub fn decode(value: &Value) -> Self {
        if let Some(error) = value.get("error").and_then(Value::as_str) {
            return Self::Error {
                kind: ErrorKind::classify(error),
            };
        }

        if let Some(command) = value.get("command").and_then(Value::as_str) {
            return match command {
                "on_channel_status" => Self::ChannelStatus {
                    online: value.get("status").and_then(Value::as_str) == Some("online"),
                },
                "on_stream_start" => Self::StreamStart {
                    from: value.get("from").and_then(Value::as_str).map(str::to_owned),
                },
                "on_stream_stop" => Self::StreamStop,
                _ => Self::Unknown,
            };
        }

        if value.get("success").and_then(Value::as_bool) == Some(true) {
            return Self::Response {
                seq: value.get("seq").and_then(Value::as_u64),
                refresh_token: value
                    .get("refresh_token")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                stream_id: value
                    .get("stream_id")
                    .and_then(Value::as_u64)
                    .map(|id| id as u32),
            };
        }

        Self::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::{codec_header, media_frame, media_payload, Command, ErrorKind, ZelloEvent};

    #[test]
    fn logon_serialises_with_refresh_token_only_when_present() {
        let with_refresh = Command::Logon {
            seq: 0,
            username: "bridge",
            password: "pw",
            channels: ["Test"],
            auth_token: None,
            refresh_token: Some("r1"),
        };

        let json = serde_json::to_value(&with_refresh).unwrap();
        assert_eq!(json["command"], "logon");
        assert_eq!(json["channels"][0], "Test");
        assert_eq!(json["refresh_token"], "r1");
        assert!(json.get("auth_token").is_none());
    }

    #[test]
    fn start_stream_carries_codec_metadata() {
        let json = serde_json::to_value(Command::start_audio_stream(3, "Test")).unwrap();

        assert_eq!(json["command"], "start_stream");
        assert_eq!(json["type"], "audio");
        assert_eq!(json["codec"], "opus");
        assert_eq!(json["packet_duration"], 20);
        assert_eq!(json["codec_header"], codec_header());
    }

    #[test]
    fn codec_header_is_8k_mono_20ms() {
        // 8000 as LE i16, one channel, 20 ms.
        assert_eq!(codec_header(), "QB8BFA==");
    }

    #[test]
    fn media_frame_layout() {
        let frame = media_frame(0x42, 0, &[0xAA, 0xBB]);

        assert_eq!(frame[0], 0x01);
        assert_eq!(&frame[1..5], &[0, 0, 0, 0x42]);
        assert_eq!(&frame[5..9], &[0, 0, 0, 0]);
        assert_eq!(&frame[9..], &[0xAA, 0xBB]);
        assert_eq!(media_payload(&frame), Some(&[0xAA, 0xBB][..]));
    }

    #[test]
    fn media_payload_rejects_prefix_only_frames() {
        assert_eq!(media_payload(&[0x01, 0, 0, 0, 0, 0, 0, 0, 0]), None);
        assert_eq!(media_payload(&[0x02; 16]), None);
    }

    #[test]
    fn decode_auth_response() {
        let event =
            ZelloEvent::parse(r#"{"seq": 0, "success": true, "refresh_token": "abc"}"#).unwrap();

        assert_eq!(event, ZelloEvent::Response {
            seq: Some(0),
            refresh_token: Some("abc".into()),
            stream_id: None,
        });
    }

    #[test]
    fn decode_stream_ack() {
        let event = ZelloEvent::parse(r#"{"seq": 2, "success": true, "stream_id": 42}"#).unwrap();

        assert_eq!(event, ZelloEvent::Response {
            seq: Some(2),
            refresh_token: None,
            stream_id: Some(42),
        });
    }

    #[test]
    fn decode_channel_status_and_stream_events() {
        assert_eq!(
            ZelloEvent::parse(r#"{"command": "on_channel_status", "status": "online"}"#).unwrap(),
            ZelloEvent::ChannelStatus {
                online: true
            },
        );
        assert_eq!(
            ZelloEvent::parse(r#"{"command": "on_channel_status", "status": "offline"}"#).unwrap(),
            ZelloEvent::ChannelStatus {
                online: false
            },
        );
        assert_eq!(
            ZelloEvent::parse(r#"{"command": "on_stream_start", "from": "alice"}"#).unwrap(),
            ZelloEvent::StreamStart {
                from: Some("alice".into())
            },
        );
        assert_eq!(
            ZelloEvent::parse(r#"{"command": "on_stream_stop"}"#).unwrap(),
            ZelloEvent::StreamStop,
        );
    }

    #[test]
    fn decode_classifies_errors() {
        let woodpecker = ZelloEvent::parse(r#"{"error": "woodpecker prohibited"}"#).unwrap();
        assert_eq!(woodpecker, ZelloEvent::Error {
            kind: ErrorKind::Woodpecker
        });

        let other = ZelloEvent::parse(r#"{"error": "server exploded"}"#).unwrap();
        assert_eq!(other, ZelloEvent::Error {
            kind: ErrorKind::Other("server exploded".into())
        });
    }

    #[test]
    fn error_takes_precedence_over_success() {
        // Some server builds set both; the error wins.
        let event = ZelloEvent::parse(r#"{"success": true, "error": "kicked"}"#).unwrap();
        assert_eq!(event, ZelloEvent::Error {
            kind: ErrorKind::Kicked
        });
    }
}
