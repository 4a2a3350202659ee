mod chunker;
mod file;
mod frame;
mod recorder;
mod resampler;

#[cfg(feature = "microphone")]
mod microphone;

pub use chunker::{resample_linear, to_mono, FrameChunker};
pub use file::{Pacing, WavFileSource};
pub use frame::{samples_per_frame, AudioSource, Frame, FrameHandler};
pub use recorder::AudioRecorder;
pub use resampler::{CapturePipeline, StreamResampler};

#[cfg(feature = "microphone")]
pub use microphone::Microphone;

/// Sample rate every source delivers and the engine expects.
pub const SAMPLE_RATE: u32 = 16000;

/// Default frame duration (one audio callback).
pub const DEFAULT_FRAME_MS: u32 = 20;

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("stream error: {0}")]
    StreamError(String),
    #[error("file error: {0}")]
    File(String),
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[cfg(feature = "microphone")]
    #[error("device error: {0}")]
    DeviceError(#[from] cpal::DevicesError),
    #[cfg(feature = "microphone")]
    #[error("build stream error: {0}")]
    BuildStreamError(#[from] cpal::BuildStreamError),
}

pub type Result<T> = std::result::Result<T, AudioError>;
