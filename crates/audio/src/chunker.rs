//! Sample conditioning: downmix, resample and cut into fixed-size frames.

use std::borrow::Cow;

use crate::frame::{samples_per_frame, Frame};

/// Accumulates arbitrary-length sample blocks and emits whole frames.
///
/// Device callbacks rarely line up with the frame duration, so leftover
/// samples are carried into the next call.
#[derive(Debug)]
pub struct FrameChunker {
    sample_rate: u32,
    frame_samples: usize,
    pending: Vec<i16>,
    next_seq: u64,
}

impl FrameChunker {
    pub fn new(sample_rate: u32, frame_ms: u32) -> Self {
        let frame_samples = samples_per_frame(sample_rate, frame_ms).max(1);
        Self {
            sample_rate,
            frame_samples,
            pending: Vec::with_capacity(frame_samples * 2),
            next_seq: 0,
        }
    }

    /// Push normalized float samples (-1.0..=1.0).
    pub fn push_f32(&mut self, samples: &[f32]) -> Vec<Frame> {
        self.pending.extend(
            samples
                .iter()
                .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16),
        );
        self.take_frames()
    }

    pub fn push_i16(&mut self, samples: &[i16]) -> Vec<Frame> {
        self.pending.extend_from_slice(samples);
        self.take_frames()
    }

    /// Emit the remaining samples as a final frame padded with silence.
    pub fn flush(&mut self) -> Option<Frame> {
        if self.pending.is_empty() {
            return None;
        }
        self.pending.resize(self.frame_samples, 0);
        self.take_frames().into_iter().next()
    }

    fn take_frames(&mut self) -> Vec<Frame> {
        let count = self.pending.len() / self.frame_samples;
        if count == 0 {
            return Vec::new();
        }

        let mut frames = Vec::with_capacity(count);
        for chunk in self.pending.chunks_exact(self.frame_samples) {
            frames.push(Frame::new(self.next_seq, self.sample_rate, chunk.to_vec()));
            self.next_seq += 1;
        }
        self.pending.drain(..count * self.frame_samples);
        frames
    }
}

/// Average interleaved channels down to mono.
pub fn to_mono(samples: &[f32], channels: usize) -> Cow<'_, [f32]> {
    if channels <= 1 {
        return Cow::Borrowed(samples);
    }
    let inv_channels = 1.0 / channels as f32;
    let mut output = Vec::with_capacity(samples.len() / channels);
    for chunk in samples.chunks_exact(channels) {
        let sum: f32 = chunk.iter().sum();
        output.push(sum * inv_channels);
    }
    Cow::Owned(output)
}

/// Resample a whole buffer using linear interpolation.
///
/// Stateless, so only for one-shot conversions such as a decoded file. Live
/// capture goes through [`StreamResampler`](crate::StreamResampler).
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Cow<'_, [f32]> {
    if from_rate == to_rate || from_rate == 0 {
        return Cow::Borrowed(samples);
    }
    let ratio = to_rate as f64 / from_rate as f64;
    let new_len = (samples.len() as f64 * ratio) as usize;
    let mut output = Vec::with_capacity(new_len);
    for i in 0..new_len {
        let src_idx = i as f64 / ratio;
        let idx = src_idx.floor() as usize;
        let frac = src_idx.fract() as f32;
        let sample = if idx + 1 < samples.len() {
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        } else if idx < samples.len() {
            samples[idx]
        } else {
            0.0
        };
        output.push(sample);
    }
    Cow::Owned(output)
}
