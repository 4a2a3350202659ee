//! Call contract of a native, handle-based VAD.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Status returned by a successful `process_audio` call.
pub const VAD_OK: i32 = 0;
/// The classifier failed on a frame.
pub const VAD_ERR_PROCESS: i32 = -1;
/// The frame length does not match the instance's frame size.
pub const VAD_ERR_BAD_FRAME: i32 = -2;
/// Options the backend cannot honour (sample rate, frame duration).
pub const VAD_ERR_UNSUPPORTED: i32 = -3;

/// Endpointer tuning. Windows are in milliseconds of audio, not wall time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadOptions {
    /// Continuous speech required before start-of-speech is reported.
    pub sos_window_ms: u32,
    /// Continuous silence after speech required before end-of-speech.
    pub eos_window_ms: u32,
    /// 0-100. Higher values classify marginal audio as speech more readily.
    pub sensitivity: u8,
    /// Native sub-chunk duration.
    pub frame_ms: u32,
    pub sample_rate: u32,
}

impl Default for VadOptions {
    fn default() -> Self {
        Self {
            sos_window_ms: 220,
            eos_window_ms: 900,
            sensitivity: 20,
            frame_ms: 20,
            sample_rate: 16000,
        }
    }
}

/// Receives a stream position in milliseconds.
pub type PositionCallback = Arc<dyn Fn(u32) + Send + Sync>;

/// Callbacks a VAD instance invokes. They may run synchronously inside
/// `process_audio` or on a thread owned by the backend.
#[derive(Clone)]
pub struct VadCallbacks {
    pub on_sos: PositionCallback,
    pub on_eos: PositionCallback,
}

impl std::fmt::Debug for VadCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VadCallbacks").finish_non_exhaustive()
    }
}

/// Factory for VAD instances. Creation failures carry the native status code.
pub trait VadBackend: Send + Sync {
    fn create(
        &self,
        options: &VadOptions,
        callbacks: VadCallbacks,
    ) -> std::result::Result<Box<dyn VadInstance>, i32>;

    fn name(&self) -> &str {
        "vad"
    }
}

/// One live VAD instance. Dropping it releases the native resources.
pub trait VadInstance: Send {
    /// Required sub-chunk size in samples.
    fn frame_size(&self) -> usize;

    /// Process exactly `frame_size()` samples; returns a status code.
    fn process_audio(&mut self, frame: &[i16]) -> i32;
}

/// Owns a VAD instance and destroys it on every exit path.
pub struct VadHandle {
    instance: Box<dyn VadInstance>,
    frame_size: usize,
}

impl VadHandle {
    pub fn new(instance: Box<dyn VadInstance>) -> Self {
        let frame_size = instance.frame_size();
        Self {
            instance,
            frame_size,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn process_audio(&mut self, frame: &[i16]) -> i32 {
        self.instance.process_audio(frame)
    }
}

impl Drop for VadHandle {
    fn drop(&mut self) {
        tracing::debug!(frame_size = self.frame_size, "VAD instance destroyed");
    }
}
