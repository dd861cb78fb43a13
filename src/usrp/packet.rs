//! USRP wire format: a 32-byte big-endian control header ahead of 320 bytes
//! of raw 16-bit little-endian PCM.

use byteorder::{BigEndian, ByteOrder};

use crate::constants::{USRP_FRAME_SIZE, USRP_HEADER_SIZE};

/// Leading magic of every USRP datagram.
pub const USRP_MAGIC: [u8; 4] = *b"USRP";

/// Frame type carried in the header's `type` word.
pub const USRP_TYPE_VOICE: i32 = 0;

/// Decoded form of the 32-byte USRP header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UsrpHeader {
    pub seq: u32,
    pub memory: i32,
    pub keyed: bool,
    pub talkgroup: i32,
    pub frame_type: i32,
    pub mpx: i32,
    pub reserved: i32,
}

impl UsrpHeader {
    /// A voice header with every optional word zeroed.
    #[must_use]
    pub fn voice(seq: u32, keyed: bool) -> Self {
        Self {
            seq,
            memory: 0,
            keyed,
            talkgroup: 0,
            frame_type: USRP_TYPE_VOICE,
            mpx: 0,
            reserved: 0,
        }
    }

    #[must_use]
    pub fn encode(&self) -> [u8; USRP_HEADER_SIZE] {
        let mut buf = [0u8; USRP_HEADER_SIZE];

        buf[..4].copy_from_slice(&USRP_MAGIC);
        BigEndian::write_u32(&mut buf[4..8], self.seq);
        BigEndian::write_i32(&mut buf[8..12], self.memory);
        BigEndian::write_i32(&mut buf[12..16], i32::from(self.keyed));
        BigEndian::write_i32(&mut buf[16..20], self.talkgroup);
        BigEndian::write_i32(&mut buf[20..24], self.frame_type);
        BigEndian::write_i32(&mut buf[24..28], self.mpx);
        BigEndian::write_i32(&mut buf[28..32], self.reserved);

        buf
    }

    /// Decodes a header from the front of a datagram. `None` for anything
    /// too short or not carrying the USRP magic.
    #[must_use]
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < USRP_HEADER_SIZE || data[..4] != USRP_MAGIC {
            return None;
        }

        Some(Self {
            seq: BigEndian::read_u32(&data[4..8]),
            memory: BigEndian::read_i32(&data[8..12]),
            keyed: BigEndian::read_i32(&data[12..16]) != 0,
            talkgroup: BigEndian::read_i32(&data[16..20]),
            frame_type: BigEndian::read_i32(&data[20..24]),
            mpx: BigEndian::read_i32(&data[24..28]),
            reserved: BigEndian::read_i32(&data[28..32]),
        })
    }
}

/// Builds a full 352-byte keyed voice frame. Payload shorter than the fixed
/// voice size is zero-padded.
#[must_use]
pub fn voice_frame(seq: u32, pcm: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(USRP_FRAME_SIZE);
    frame.extend_from_slice(&UsrpHeader::voice(seq, true).encode());
    frame.extend_from_slice(&pcm[..pcm.len().min(USRP_FRAME_SIZE - USRP_HEADER_SIZE)]);
    frame.resize(USRP_FRAME_SIZE, 0);

    frame
}

/// Builds a full 352-byte unkey frame: `ptt=0`, zero payload.
#[must_use]
pub fn unkey_frame(seq: u32) -> Vec<u8> {
    let mut frame = vec![0u8; USRP_FRAME_SIZE];
    frame[..USRP_HEADER_SIZE].copy_from_slice(&UsrpHeader::voice(seq, false).encode());

    frame
}

/// Linear gain applied to `i16` LE PCM, derived from a whole-dB setting.
///
/// 0 dB is the identity and skips the sample math entirely.
#[derive(Clone, Copy, Debug)]
pub struct Gain {
    factor: Option<f32>,
}

impl Gain {
    #[must_use]
    pub fn from_db(db: i32) -> Self {
        let factor = (db != 0).then(|| 10f32.powf(db as f32 / 10.0));

        Self {
            factor,
        }
    }

    /// Scales every sample in place, saturating at the `i16` bounds.
    pub fn apply(&self, pcm: &mut [u8]) {
        let Some(factor) = self.factor else {
            return;
        };

        for bytes in pcm.chunks_exact_mut(2) {
            let sample = i16::from_le_bytes([bytes[0], bytes[1]]);
            let scaled = (f32::from(sample) * factor)
                .clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16;
            bytes.copy_from_slice(&scaled.to_le_bytes());
        }
    }
}
