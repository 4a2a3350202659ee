/// An endpoint crossing reported by [`EndpointTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Position of the first frame of the speech run that crossed the window.
    StartOfSpeech(u32),
    /// Position just after the last speech frame before the silence run.
    EndOfSpeech(u32),
}

/// Turns per-frame speech/silence decisions into endpoint crossings.
///
/// Start-of-speech needs `sos_window_ms` of uninterrupted speech. End of
/// speech needs `eos_window_ms` of uninterrupted silence after a start. After
/// an end the tracker looks for the next start.
#[derive(Debug, Clone)]
pub struct EndpointTracker {
    frame_ms: u32,
    sos_window_ms: u32,
    eos_window_ms: u32,
    position_ms: u32,
    in_speech: bool,
    speech_run_ms: u32,
    speech_run_start_ms: u32,
    silence_run_ms: u32,
}

impl EndpointTracker {
    pub fn new(frame_ms: u32, sos_window_ms: u32, eos_window_ms: u32) -> Self {
        Self {
            frame_ms,
            sos_window_ms,
            eos_window_ms,
            position_ms: 0,
            in_speech: false,
            speech_run_ms: 0,
            speech_run_start_ms: 0,
            silence_run_ms: 0,
        }
    }

    /// Milliseconds of audio observed so far.
    pub fn position_ms(&self) -> u32 {
        self.position_ms
    }

    pub fn in_speech(&self) -> bool {
        self.in_speech
    }

    pub fn observe(&mut self, is_speech: bool) -> Option<Endpoint> {
        let frame_start = self.position_ms;
        self.position_ms = self.position_ms.saturating_add(self.frame_ms);

        if !self.in_speech {
            if !is_speech {
                self.speech_run_ms = 0;
                return None;
            }
            if self.speech_run_ms == 0 {
                self.speech_run_start_ms = frame_start;
            }
            self.speech_run_ms += self.frame_ms;
            if self.speech_run_ms >= self.sos_window_ms {
                self.in_speech = true;
                self.silence_run_ms = 0;
                return Some(Endpoint::StartOfSpeech(self.speech_run_start_ms));
            }
            return None;
        }

        if is_speech {
            self.silence_run_ms = 0;
            return None;
        }
        self.silence_run_ms += self.frame_ms;
        if self.silence_run_ms >= self.eos_window_ms {
            self.in_speech = false;
            self.speech_run_ms = 0;
            let end = self.position_ms - self.silence_run_ms;
            self.silence_run_ms = 0;
            return Some(Endpoint::EndOfSpeech(end));
        }
        None
    }
}
