use std::fmt;
use std::time::Instant;

/// Controller lifecycle within one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No turn in progress.
    Idle,
    /// Audio flowing into the pre-speech buffer, waiting for start-of-speech.
    Listening,
    /// Start-of-speech seen; audio flowing to the engine.
    Streaming,
    /// Completion resolved; resources being released.
    Completing,
    /// Turn finished.
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Listening => "listening",
            Phase::Streaming => "streaming",
            Phase::Completing => "completing",
            Phase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Per-turn bookkeeping, owned by the turn's event loop.
#[derive(Debug, Clone)]
pub struct TurnState {
    pub request_id: u64,
    pub correlation_id: String,
    pub session_id: Option<String>,
    pub phase: Phase,
    pub sos_detected: bool,
    pub eos_detected: bool,
    pub sos_position_ms: Option<u32>,
    pub eos_position_ms: Option<u32>,
    pub audio_duration_ms: u64,
    pub frames_received: u64,
    pub frames_streamed: u64,
    pub frames_dropped: u64,
    pub frames_discarded: u64,
    pub started_at: Instant,
}

impl TurnState {
    pub fn new(request_id: u64, correlation_id: String) -> Self {
        Self {
            request_id,
            correlation_id,
            session_id: None,
            phase: Phase::Idle,
            sos_detected: false,
            eos_detected: false,
            sos_position_ms: None,
            eos_position_ms: None,
            audio_duration_ms: 0,
            frames_received: 0,
            frames_streamed: 0,
            frames_dropped: 0,
            frames_discarded: 0,
            started_at: Instant::now(),
        }
    }

    pub fn transition(&mut self, next: Phase) {
        if self.phase != next {
            tracing::debug!(
                request_id = self.request_id,
                from = %self.phase,
                to = %next,
                "Turn phase change"
            );
            self.phase = next;
        }
    }

    /// Record start-of-speech. Returns `false` if it was already recorded.
    pub fn mark_start_of_speech(&mut self, position_ms: u32) -> bool {
        if self.sos_detected {
            return false;
        }
        self.sos_detected = true;
        self.sos_position_ms = Some(position_ms);
        true
    }

    /// Record end-of-speech. Ignored before start-of-speech or when repeated.
    pub fn mark_end_of_speech(&mut self, position_ms: u32) -> bool {
        if !self.sos_detected || self.eos_detected {
            return false;
        }
        self.eos_detected = true;
        self.eos_position_ms = Some(position_ms);
        true
    }

    /// Account for one frame written to the engine.
    pub fn record_streamed(&mut self, frame_ms: u32) {
        self.frames_streamed += 1;
        self.audio_duration_ms += frame_ms as u64;
    }
}
