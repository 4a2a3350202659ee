use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("audio source failed to start: {0}")]
    AudioStart(#[from] hark_audio::AudioError),
    #[error("endpoint detector failed to start: {0}")]
    DetectorStart(#[from] hark_endpoint::EndpointError),
    #[error("recognition engine failed to start: {0}")]
    EngineStart(#[from] hark_engine::EngineError),
    #[error("failed to start {name} timer: {source}")]
    Timer {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, SessionError>;
