mod buffered;
mod engine;

pub use buffered::{BufferedEngine, Segment, Transcriber};
pub use engine::{Alternative, EngineEvent, EngineEventSink, RecognitionEngine};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no recognition session is active")]
    NotStarted,
    #[error("a recognition session is already active")]
    SessionActive,
    #[error("failed to start session: {0}")]
    StartFailed(String),
    #[error("failed to write audio: {0}")]
    WriteFailed(String),
    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),
    #[error("credential renewal failed: {0}")]
    Credentials(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
