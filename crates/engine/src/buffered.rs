//! Push-stream engine over a batch transcriber.
//!
//! Audio written during a session is accumulated and transcribed in one pass
//! when the session stops, which is how local models without streaming
//! support are driven.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::engine::{Alternative, EngineEvent, EngineEventSink, RecognitionEngine};
use crate::{EngineError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub confidence: f32,
}

pub trait Transcriber: Send + Sync {
    /// Transcribe 16 kHz mono audio.
    fn transcribe(&self, audio: &[f32], hints: &[String]) -> Result<Vec<Segment>>;

    fn model_name(&self) -> &str;
}

struct ActiveSession {
    id: String,
    hints: Vec<String>,
    samples: Vec<i16>,
}

pub struct BufferedEngine {
    transcriber: Arc<dyn Transcriber>,
    sink: Mutex<Option<Arc<dyn EngineEventSink>>>,
    session: Mutex<Option<ActiveSession>>,
}

impl BufferedEngine {
    pub fn new(transcriber: Arc<dyn Transcriber>) -> Self {
        Self {
            transcriber,
            sink: Mutex::new(None),
            session: Mutex::new(None),
        }
    }

    pub fn is_active(&self) -> bool {
        self.session
            .lock()
            .expect("engine session mutex poisoned")
            .is_some()
    }

    fn emit(&self, event: EngineEvent) {
        let sink = self.sink.lock().expect("engine sink mutex poisoned").clone();
        match sink {
            Some(sink) => sink.on_engine_event(event),
            None => tracing::debug!(?event, "Engine event with no subscriber"),
        }
    }

    fn result_event(outcome: Result<Vec<Segment>>) -> EngineEvent {
        match outcome {
            Ok(segments) => {
                let text = segments
                    .iter()
                    .map(|s| s.text.trim())
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");
                if text.is_empty() {
                    return EngineEvent::NoMatch {
                        reason: "no speech recognized".to_string(),
                    };
                }
                let confidence = segments.iter().map(|s| s.confidence).sum::<f32>()
                    / segments.len() as f32;
                EngineEvent::Final {
                    alternatives: vec![Alternative { text, confidence }],
                }
            }
            Err(e) => EngineEvent::Error {
                code: -1,
                details: e.to_string(),
            },
        }
    }
}

#[async_trait]
impl RecognitionEngine for BufferedEngine {
    fn subscribe(&self, sink: Arc<dyn EngineEventSink>) {
        *self.sink.lock().expect("engine sink mutex poisoned") = Some(sink);
    }

    async fn start_session(&self, grammar_hints: &[String]) -> Result<()> {
        let id = {
            let mut session = self.session.lock().expect("engine session mutex poisoned");
            if session.is_some() {
                return Err(EngineError::SessionActive);
            }
            let id = uuid::Uuid::new_v4().to_string();
            *session = Some(ActiveSession {
                id: id.clone(),
                hints: grammar_hints.to_vec(),
                samples: Vec::new(),
            });
            id
        };
        tracing::info!(
            session_id = %id,
            model = self.transcriber.model_name(),
            hints = grammar_hints.len(),
            "Recognition session started"
        );
        self.emit(EngineEvent::SessionStarted { session_id: id });
        Ok(())
    }

    fn write(&self, pcm: &[u8]) -> Result<()> {
        let mut session = self.session.lock().expect("engine session mutex poisoned");
        let session = session.as_mut().ok_or(EngineError::NotStarted)?;
        if pcm.len() % 2 != 0 {
            return Err(EngineError::WriteFailed(format!(
                "odd byte count {} for PCM16",
                pcm.len()
            )));
        }
        session.samples.extend(
            pcm.chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]])),
        );
        Ok(())
    }

    async fn stop_session(&self) -> Result<()> {
        let session = self
            .session
            .lock()
            .expect("engine session mutex poisoned")
            .take();
        let Some(session) = session else {
            return Ok(());
        };

        let event = if session.samples.is_empty() {
            EngineEvent::NoMatch {
                reason: "no audio received".to_string(),
            }
        } else {
            let transcriber = self.transcriber.clone();
            let hints = session.hints;
            let audio: Vec<f32> = session
                .samples
                .iter()
                .map(|&s| s as f32 / 32768.0)
                .collect();
            let outcome = tokio::task::spawn_blocking(move || transcriber.transcribe(&audio, &hints))
                .await
                .map_err(|e| EngineError::TranscriptionFailed(e.to_string()))
                .and_then(|r| r);
            Self::result_event(outcome)
        };

        tracing::info!(session_id = %session.id, ?event, "Recognition session stopped");
        self.emit(event);
        self.emit(EngineEvent::SessionStopped {
            session_id: session.id,
        });
        Ok(())
    }

    fn name(&self) -> &str {
        "buffered"
    }
}
