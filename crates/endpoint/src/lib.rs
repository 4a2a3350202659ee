//! Endpoint detection: turns a stateful VAD's start/end-of-speech callbacks
//! into calls on an [`EndpointHandler`].

mod backend;
mod detector;
mod tracker;
mod vad_earshot;

pub use backend::{
    PositionCallback, VadBackend, VadCallbacks, VadHandle, VadInstance, VadOptions,
    VAD_ERR_BAD_FRAME, VAD_ERR_PROCESS, VAD_ERR_UNSUPPORTED, VAD_OK,
};
pub use detector::{DetectorState, EndpointDetector, EndpointHandler};
pub use tracker::{Endpoint, EndpointTracker};
pub use vad_earshot::EarshotBackend;

#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("endpoint detector not started")]
    NotStarted,
    #[error("failed to create VAD instance (code {0})")]
    CreateFailed(i32),
}

pub type Result<T> = std::result::Result<T, EndpointError>;
