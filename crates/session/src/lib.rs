//! Turn-based speech session control.
//!
//! A turn listens for start-of-speech, replays the buffered pre-speech audio
//! to a recognition engine, streams live audio until end-of-speech, an engine
//! result or a timeout, then releases every resource it started.

mod buffer;
mod completion;
mod config;
mod controller;
mod error;
mod events;
mod renewal;
mod router;
mod state;
mod timer;

pub use buffer::FrameBuffer;
pub use completion::TurnCompletion;
pub use config::{
    SessionConfig, DEFAULT_CREDENTIAL_REFRESH_MS, DEFAULT_EOS_WINDOW_MS,
    DEFAULT_LISTENING_TIMEOUT_MS, DEFAULT_RECOGNITION_TIMEOUT_MS, DEFAULT_SOS_WINDOW_MS,
};
pub use controller::SessionController;
pub use error::{ConfigError, Result, SessionError};
pub use events::{CompletionTrigger, TurnEvent, TurnOutcome, TurnResult};
pub use renewal::CredentialRenewer;
pub use state::{Phase, TurnState};
pub use timer::TimerService;
