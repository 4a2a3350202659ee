use std::sync::Arc;

/// One fixed-duration chunk of 16-bit mono PCM, as delivered by a single
/// audio source callback.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic sequence number assigned by the producing source.
    pub seq: u64,
    /// Sample rate of the audio data.
    pub sample_rate: u32,
    /// PCM samples (shared ownership, never mutated after production).
    pub samples: Arc<[i16]>,
}

impl Frame {
    pub fn new(seq: u64, sample_rate: u32, samples: impl Into<Arc<[i16]>>) -> Self {
        Self {
            seq,
            sample_rate,
            samples: samples.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration of this frame in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / self.sample_rate as u64
    }

    /// Little-endian PCM16 bytes, the wire format of the recognition engine.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for sample in self.samples.iter() {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }
}

/// Number of samples in one frame of `frame_ms` at `sample_rate`.
pub fn samples_per_frame(sample_rate: u32, frame_ms: u32) -> usize {
    (sample_rate as usize * frame_ms as usize) / 1000
}

/// Receives frames from an [`AudioSource`] on the source's own thread.
pub trait FrameHandler: Send + Sync {
    fn on_frame(&self, correlation_id: &str, frame: Frame);
}

/// A startable/stoppable producer of PCM frames.
///
/// `stop()` must be safe to call when the source was never started and when
/// it has already been stopped.
pub trait AudioSource: Send + Sync {
    fn start(&self, handler: Arc<dyn FrameHandler>, correlation_id: &str) -> crate::Result<()>;

    /// Stop delivering frames. May block until the capture thread exits, so
    /// async callers run it on a blocking thread.
    fn stop(&self);

    fn is_running(&self) -> bool;

    fn name(&self) -> &str {
        "audio-source"
    }
}
