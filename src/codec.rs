//! Thin wrappers around the Opus coder pair, fixed at the bridge's one
//! supported format: 8 kHz, mono, 20 ms frames.

use audiopus::coder::{Decoder as OpusDecoder, Encoder as OpusEncoder};
use audiopus::{Application, Bitrate, Channels};

use crate::constants::{MONO_FRAME_BYTE_SIZE, MONO_FRAME_SIZE, OPUS_PACKET_MAX, SAMPLE_RATE};
use crate::internal::prelude::*;

/// Longest PCM run a single Opus packet may decode to at 8 kHz (120 ms).
const DECODE_BUFFER_SIZE: usize = 6 * MONO_FRAME_SIZE;

/// Encodes 20 ms frames of raw `i16` little-endian PCM into Opus packets.
pub struct Encoder {
    inner: OpusEncoder,
}

impl Encoder {
    /// Builds a VoIP-tuned encoder, applying the optional complexity and
    /// bitrate overrides from the environment.
    pub fn new(complexity: Option<u8>, bitrate: Option<i32>) -> Result<Self> {
        let mut inner = OpusEncoder::new(SAMPLE_RATE, Channels::Mono, Application::Voip)?;

        if let Some(complexity) = complexity {
            inner.set_complexity(complexity)?;
        }

        if let Some(bits) = bitrate {
            inner.set_bitrate(Bitrate::BitsPerSecond(bits))?;
        }

        Ok(Self {
            inner,
        })
    }

    /// Encodes one 20 ms PCM frame (320 bytes of `i16` LE samples).
    ///
    /// Short input is zero-padded to a full frame; the encoder only accepts
    /// whole frames.
    pub fn encode(&mut self, pcm: &[u8]) -> Result<Vec<u8>> {
        let mut samples = [0i16; MONO_FRAME_SIZE];
        for (sample, bytes) in samples
            .iter_mut()
            .zip(pcm[..pcm.len().min(MONO_FRAME_BYTE_SIZE)].chunks_exact(2))
        {
            *sample = i16::from_le_bytes([bytes[0], bytes[1]]);
        }

        let mut packet = [0u8; OPUS_PACKET_MAX];
        let len = self.inner.encode(&samples, &mut packet)?;

        Ok(packet[..len].to_vec())
    }
}

/// Decodes Opus packets back into raw `i16` little-endian PCM.
pub struct Decoder {
    inner: OpusDecoder,
}

impl Decoder {
    pub fn new() -> Result<Self> {
        Ok(Self {
            inner: OpusDecoder::new(SAMPLE_RATE, Channels::Mono)?,
        })
    }

    /// Decodes one Opus packet to PCM bytes; a 20 ms packet yields exactly
    /// 320 bytes.
    pub fn decode(&mut self, opus: &[u8]) -> Result<Vec<u8>> {
        let mut samples = [0i16; DECODE_BUFFER_SIZE];
        let decoded = self.inner.decode(Some(opus), &mut samples[..], false)?;

        let mut pcm = Vec::with_capacity(decoded * 2);
        for sample in &samples[..decoded] {
            pcm.extend_from_slice(&sample.to_le_bytes());
        }

        Ok(pcm)
    }
}
