//! PCM16 ⇄ base64 transport codec plus the small sample-rate and channel
//! helpers the pipelines need.
//!
//! - Outbound: f32 samples → clamp/scale → i16 little-endian → base64
//! - Inbound: base64 → bytes → de-interleave i16 → f32 [`AudioChunk`]

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::AudioError;

/// Full-scale value used to map between f32 and signed 16-bit PCM.
const PCM16_SCALE: f32 = 32768.0;

/// One encoded audio frame as exchanged with the remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportChunk {
    /// Base64 of little-endian 16-bit PCM.
    pub data: String,
    /// e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
}

impl TransportChunk {
    pub fn pcm(data: String, sample_rate: u32) -> Self {
        Self {
            data,
            mime_type: pcm_mime_type(sample_rate),
        }
    }
}

pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Decoded audio ready for scheduling. Planar: one sample vector per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioChunk {
    /// Build a chunk from planar samples. All channels must have equal length.
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self, AudioError> {
        if channels.is_empty() {
            return Err(AudioError::decode("chunk needs at least one channel"));
        }
        if sample_rate == 0 {
            return Err(AudioError::decode("sample rate must be positive"));
        }
        let frames = channels[0].len();
        if channels.iter().any(|c| c.len() != frames) {
            return Err(AudioError::decode("channels have different lengths"));
        }
        Ok(Self { channels, sample_rate })
    }

    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Result<Self, AudioError> {
        Self::new(vec![samples], sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel.
    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Playback length in seconds.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Encode samples in [-1, 1] as base64 little-endian PCM16.
///
/// Values are scaled by 32768 and truncated toward zero; anything outside the
/// i16 range saturates instead of wrapping.
pub fn encode_samples(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample * PCM16_SCALE) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    STANDARD.encode(bytes)
}

/// Undo the base64 layer only.
pub fn decode_transport(data: &str) -> Result<Vec<u8>, AudioError> {
    STANDARD
        .decode(data.trim())
        .map_err(|e| AudioError::decode(format!("invalid base64 payload: {}", e)))
}

/// De-interleave PCM16 bytes into a normalized [`AudioChunk`].
pub fn pcm_to_chunk(bytes: &[u8], sample_rate: u32, channel_count: usize) -> Result<AudioChunk, AudioError> {
    if channel_count == 0 {
        return Err(AudioError::decode("channel count must be positive"));
    }
    let frame_bytes = 2 * channel_count;
    if bytes.len() % frame_bytes != 0 {
        return Err(AudioError::decode(format!(
            "PCM16 payload of {} bytes is not a multiple of {}",
            bytes.len(),
            frame_bytes
        )));
    }

    let frames = bytes.len() / frame_bytes;
    let mut channels: Vec<Vec<f32>> = (0..channel_count).map(|_| Vec::with_capacity(frames)).collect();
    for frame in bytes.chunks_exact(frame_bytes) {
        for (ch, sample) in frame.chunks_exact(2).enumerate() {
            let value = i16::from_le_bytes([sample[0], sample[1]]);
            channels[ch].push(value as f32 / PCM16_SCALE);
        }
    }
    AudioChunk::new(channels, sample_rate)
}

/// Linear-interpolation resampler. Good enough for speech.
pub fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() || from_rate == 0 || to_rate == 0 {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as f64) / ratio).round() as usize;
    let last = input.len() - 1;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            if idx >= last {
                return input[last];
            }
            let frac = (pos - idx as f64) as f32;
            input[idx] + (input[idx + 1] - input[idx]) * frac
        })
        .collect()
}

/// Map planar channels onto `output_channels`.
///
/// Down-mix to mono averages; any other mismatch wraps source channels
/// (mono → stereo duplicates).
pub fn map_channels(input: &[Vec<f32>], output_channels: usize) -> Vec<Vec<f32>> {
    if input.is_empty() || output_channels == 0 {
        return Vec::new();
    }
    if input.len() == output_channels {
        return input.to_vec();
    }
    if output_channels == 1 {
        let frames = input[0].len();
        let count = input.len() as f32;
        let mono = (0..frames)
            .map(|i| input.iter().map(|c| c[i]).sum::<f32>() / count)
            .collect();
        return vec![mono];
    }
    (0..output_channels).map(|c| input[c % input.len()].clone()).collect()
}

/// Average interleaved i16 frames down to mono f32.
pub fn interleaved_i16_to_mono(pcm: &[i16], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return pcm.iter().map(|&s| s as f32 / PCM16_SCALE).collect();
    }
    pcm.chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as f32 / PCM16_SCALE
        })
        .collect()
}

/// Clamp and convert f32 to i16 for device output.
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}
