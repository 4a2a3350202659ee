//! What a turn reports: progress events, the terminal outcome and the
//! result snapshot.

use std::time::Duration;

use hark_engine::{Alternative, EngineEvent};
use serde::Serialize;

/// What settled a turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompletionTrigger {
    EndOfSpeech { position_ms: u32 },
    /// A terminal engine event (final, no-match, canceled or error).
    Engine { event: EngineEvent },
    RecognitionTimeout,
    ListeningTimeout,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnOutcome {
    Recognized {
        text: String,
        confidence: f32,
        alternatives: Vec<Alternative>,
    },
    NoMatch {
        reason: String,
    },
    Cancelled {
        reason: String,
    },
    Failed {
        code: i32,
        details: String,
    },
    /// The recognition timer expired before any other completion.
    TimedOut,
    /// The listening timer expired before start-of-speech.
    NoSpeech,
    /// End-of-speech ended the turn and the engine produced no result.
    Completed,
}

impl TurnOutcome {
    /// Outcome for a terminal engine event; `None` for non-terminal events.
    pub fn from_engine_event(event: &EngineEvent) -> Option<Self> {
        match event {
            EngineEvent::Final { alternatives } => Some(Self::recognized(alternatives.clone())),
            EngineEvent::NoMatch { reason } => Some(Self::NoMatch {
                reason: reason.clone(),
            }),
            EngineEvent::Canceled { reason } => Some(Self::Cancelled {
                reason: reason.clone(),
            }),
            EngineEvent::Error { code, details } => Some(Self::Failed {
                code: *code,
                details: details.clone(),
            }),
            _ => None,
        }
    }

    fn recognized(alternatives: Vec<Alternative>) -> Self {
        let (text, confidence) = alternatives
            .first()
            .map(|best| (best.text.clone(), best.confidence))
            .unwrap_or_default();
        Self::Recognized {
            text,
            confidence,
            alternatives,
        }
    }

    pub fn is_recognized(&self) -> bool {
        matches!(self, Self::Recognized { .. })
    }
}

/// Progress notifications delivered to the `run_turn` callback, in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Detector start-of-speech, position in ms from the start of the turn.
    ClientSpeechStart { position_ms: u32 },
    ClientSpeechEnd { position_ms: u32 },
    ListeningTimerExpired,
    RecognitionTimerExpired,
    RecognitionStarted { session_id: String },
    RecognitionComplete { session_id: String },
    /// Engine-side speech detection.
    SpeechStartDetected { offset_ms: u64 },
    SpeechEndDetected { offset_ms: u64 },
    Interim { text: String },
    Final { alternatives: Vec<Alternative> },
    NoMatch { reason: String },
    Cancelled { reason: String },
    Error { code: i32, details: String },
    /// Always the last event of a turn.
    Completed { outcome: TurnOutcome },
}

impl From<EngineEvent> for TurnEvent {
    fn from(event: EngineEvent) -> Self {
        match event {
            EngineEvent::SessionStarted { session_id } => Self::RecognitionStarted { session_id },
            EngineEvent::SessionStopped { session_id } => Self::RecognitionComplete { session_id },
            EngineEvent::SpeechStart { offset_ms } => Self::SpeechStartDetected { offset_ms },
            EngineEvent::SpeechEnd { offset_ms } => Self::SpeechEndDetected { offset_ms },
            EngineEvent::Interim { text } => Self::Interim { text },
            EngineEvent::Final { alternatives } => Self::Final { alternatives },
            EngineEvent::NoMatch { reason } => Self::NoMatch { reason },
            EngineEvent::Canceled { reason } => Self::Cancelled { reason },
            EngineEvent::Error { code, details } => Self::Error { code, details },
        }
    }
}

/// Snapshot of a finished turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnResult {
    pub request_id: u64,
    pub correlation_id: String,
    /// Engine session id, when the engine was engaged.
    pub session_id: Option<String>,
    pub outcome: TurnOutcome,
    pub trigger: CompletionTrigger,
    /// Best transcript seen, including one delivered while the engine stopped.
    pub transcript: Option<String>,
    pub sos_position_ms: Option<u32>,
    pub eos_position_ms: Option<u32>,
    /// Audio written to the engine.
    pub audio_duration_ms: u64,
    pub frames_received: u64,
    pub frames_streamed: u64,
    /// Frames ignored after end-of-speech.
    pub frames_dropped: u64,
    /// Pre-speech frames never streamed: evicted from the buffer or older
    /// than the start-of-speech window.
    pub frames_discarded: u64,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

mod duration_ms {
    use std::time::Duration;

    pub fn serialize<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
