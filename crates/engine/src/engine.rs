use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One hypothesis of an n-best list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub text: String,
    /// 0.0-1.0.
    pub confidence: f32,
}

/// Session lifecycle and transcription events emitted by an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    SessionStarted { session_id: String },
    SessionStopped { session_id: String },
    /// Engine-side speech detection, offset into the streamed audio.
    SpeechStart { offset_ms: u64 },
    SpeechEnd { offset_ms: u64 },
    Interim { text: String },
    /// Alternatives are ordered best first.
    Final { alternatives: Vec<Alternative> },
    NoMatch { reason: String },
    Canceled { reason: String },
    Error { code: i32, details: String },
}

impl EngineEvent {
    /// Whether the event settles the recognition for the current session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EngineEvent::Final { .. }
                | EngineEvent::NoMatch { .. }
                | EngineEvent::Canceled { .. }
                | EngineEvent::Error { .. }
        )
    }
}

/// Receives engine events. Engines may call this from any thread, including
/// synchronously from inside `write` or `stop_session`.
pub trait EngineEventSink: Send + Sync {
    fn on_engine_event(&self, event: EngineEvent);
}

/// A push-stream speech recognizer.
///
/// The sink is registered once per engine lifetime; every later session
/// reports through it.
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    fn subscribe(&self, sink: Arc<dyn EngineEventSink>);

    /// Open a session biased towards `grammar_hints`.
    async fn start_session(&self, grammar_hints: &[String]) -> crate::Result<()>;

    /// Push little-endian PCM16 audio into the open session.
    fn write(&self, pcm: &[u8]) -> crate::Result<()>;

    /// Close the session. Safe when no session is open.
    async fn stop_session(&self) -> crate::Result<()>;

    /// Refresh whatever authorization the engine holds.
    async fn renew_credentials(&self) -> crate::Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "recognition-engine"
    }
}
