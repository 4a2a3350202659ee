//! Pure-Rust VAD backend built on the `earshot` WebRTC-style classifier.

use earshot::{VoiceActivityDetector, VoiceActivityProfile};

use crate::backend::{
    VadBackend, VadCallbacks, VadInstance, VadOptions, VAD_ERR_BAD_FRAME, VAD_ERR_PROCESS,
    VAD_ERR_UNSUPPORTED, VAD_OK,
};
use crate::tracker::{Endpoint, EndpointTracker};

/// Creates [`VadInstance`]s that classify 10, 20 or 30 ms frames of 16 kHz
/// audio and report endpoints through [`EndpointTracker`].
#[derive(Debug, Default, Clone, Copy)]
pub struct EarshotBackend;

impl EarshotBackend {
    pub fn new() -> Self {
        Self
    }

    fn profile(sensitivity: u8) -> VoiceActivityProfile {
        match sensitivity {
            s if s >= 60 => VoiceActivityProfile::QUALITY,
            s if s >= 30 => VoiceActivityProfile::LBR,
            s if s >= 10 => VoiceActivityProfile::AGGRESSIVE,
            _ => VoiceActivityProfile::VERY_AGGRESSIVE,
        }
    }
}

impl VadBackend for EarshotBackend {
    fn create(
        &self,
        options: &VadOptions,
        callbacks: VadCallbacks,
    ) -> std::result::Result<Box<dyn VadInstance>, i32> {
        if options.sample_rate != 16000 || !matches!(options.frame_ms, 10 | 20 | 30) {
            tracing::warn!(
                sample_rate = options.sample_rate,
                frame_ms = options.frame_ms,
                "earshot supports 16 kHz audio in 10/20/30 ms frames"
            );
            return Err(VAD_ERR_UNSUPPORTED);
        }

        let frame_size = (options.sample_rate as usize * options.frame_ms as usize) / 1000;
        tracing::debug!(
            frame_size,
            sensitivity = options.sensitivity,
            sos_window_ms = options.sos_window_ms,
            eos_window_ms = options.eos_window_ms,
            "Creating earshot VAD instance"
        );

        Ok(Box::new(EarshotInstance {
            detector: VoiceActivityDetector::new(Self::profile(options.sensitivity)),
            frame_size,
            tracker: EndpointTracker::new(
                options.frame_ms,
                options.sos_window_ms,
                options.eos_window_ms,
            ),
            callbacks,
        }))
    }

    fn name(&self) -> &str {
        "earshot"
    }
}

struct EarshotInstance {
    detector: VoiceActivityDetector,
    frame_size: usize,
    tracker: EndpointTracker,
    callbacks: VadCallbacks,
}

impl VadInstance for EarshotInstance {
    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn process_audio(&mut self, frame: &[i16]) -> i32 {
        if frame.len() != self.frame_size {
            return VAD_ERR_BAD_FRAME;
        }
        let is_speech = match self.detector.predict_16khz(frame) {
            Ok(is_speech) => is_speech,
            Err(_) => return VAD_ERR_PROCESS,
        };
        match self.tracker.observe(is_speech) {
            Some(Endpoint::StartOfSpeech(pos)) => (self.callbacks.on_sos)(pos),
            Some(Endpoint::EndOfSpeech(pos)) => (self.callbacks.on_eos)(pos),
            None => {}
        }
        VAD_OK
    }
}
