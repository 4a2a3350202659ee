//! Streaming sample-rate conversion for live capture.

use rubato::{FftFixedIn, Resampler as RubatoResampler};

use crate::chunker::{to_mono, FrameChunker};
use crate::frame::Frame;
use crate::AudioError;

/// Requested input chunk; rubato may round it to suit the rate pair.
const CHUNK_SIZE: usize = 256;

/// Stateful FFT resampler for variable-sized input blocks.
///
/// Input that does not fill a whole resampler chunk is kept for the next
/// call, so consecutive device callbacks resample as one continuous signal.
pub struct StreamResampler {
    resampler: FftFixedIn<f32>,
    input_buffer: Vec<f32>,
    from_rate: u32,
    to_rate: u32,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> crate::Result<Self> {
        let resampler = FftFixedIn::<f32>::new(
            from_rate as usize,
            to_rate as usize,
            CHUNK_SIZE,
            2, // Sub-chunks for better quality
            1, // Mono channel
        )
        .map_err(|e| {
            AudioError::UnsupportedFormat(format!(
                "cannot resample {from_rate} Hz to {to_rate} Hz: {e}"
            ))
        })?;

        Ok(Self {
            resampler,
            input_buffer: Vec::with_capacity(CHUNK_SIZE * 2),
            from_rate,
            to_rate,
        })
    }

    /// Resample `samples`, returning everything the completed chunks produced.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        self.input_buffer.extend_from_slice(samples);

        let mut output = Vec::new();
        loop {
            let needed = self.resampler.input_frames_next();
            if needed == 0 || self.input_buffer.len() < needed {
                break;
            }
            match self
                .resampler
                .process(&[&self.input_buffer[..needed]], None)
            {
                Ok(resampled) => {
                    if let Some(channel) = resampled.first() {
                        output.extend_from_slice(channel);
                    }
                }
                Err(e) => tracing::warn!(
                    error = %e,
                    from_rate = self.from_rate,
                    to_rate = self.to_rate,
                    "Resampler rejected chunk"
                ),
            }
            self.input_buffer.drain(..needed);
        }
        output
    }
}

/// Device samples in, 16 kHz mono frames out.
///
/// Downmixes interleaved device audio, resamples it when the device rate
/// differs and cuts the result into fixed frames.
pub struct CapturePipeline {
    channels: usize,
    resampler: Option<StreamResampler>,
    chunker: FrameChunker,
}

impl CapturePipeline {
    pub fn new(
        device_rate: u32,
        channels: usize,
        target_rate: u32,
        frame_ms: u32,
    ) -> crate::Result<Self> {
        let resampler = if device_rate != target_rate {
            tracing::debug!(device_rate, target_rate, "Resampling capture");
            Some(StreamResampler::new(device_rate, target_rate)?)
        } else {
            None
        };
        Ok(Self {
            channels: channels.max(1),
            resampler,
            chunker: FrameChunker::new(target_rate, frame_ms),
        })
    }

    pub fn push(&mut self, interleaved: &[f32]) -> Vec<Frame> {
        let mono = to_mono(interleaved, self.channels);
        match self.resampler.as_mut() {
            Some(resampler) => {
                let resampled = resampler.process(&mono);
                self.chunker.push_f32(&resampled)
            }
            None => self.chunker.push_f32(&mono),
        }
    }
}
