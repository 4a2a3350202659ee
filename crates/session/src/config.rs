use std::path::{Path, PathBuf};
use std::time::Duration;

use hark_endpoint::VadOptions;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Start-of-speech window in milliseconds.
pub const DEFAULT_SOS_WINDOW_MS: u32 = 220;
/// End-of-speech window in milliseconds.
pub const DEFAULT_EOS_WINDOW_MS: u32 = 900;
pub const DEFAULT_LISTENING_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_RECOGNITION_TIMEOUT_MS: u64 = 15_000;
/// Nine minutes, inside the usual ten-minute token lifetime.
pub const DEFAULT_CREDENTIAL_REFRESH_MS: u64 = 540_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub sos_window_ms: u32,
    pub eos_window_ms: u32,
    /// How long to wait for start-of-speech. 0 waits forever.
    pub listening_timeout_ms: u64,
    /// Upper bound on a turn once speech has started.
    pub recognition_timeout_ms: u64,
    pub frame_ms: u32,
    pub sample_rate: u32,
    /// 0-100, passed to the endpoint detector.
    pub vad_sensitivity: u8,
    /// Save every turn's raw audio as WAV here.
    pub capture_audio_dir: Option<PathBuf>,
    /// Engine credential renewal period. 0 disables renewal.
    pub credential_refresh_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sos_window_ms: DEFAULT_SOS_WINDOW_MS,
            eos_window_ms: DEFAULT_EOS_WINDOW_MS,
            listening_timeout_ms: DEFAULT_LISTENING_TIMEOUT_MS,
            recognition_timeout_ms: DEFAULT_RECOGNITION_TIMEOUT_MS,
            frame_ms: hark_audio::DEFAULT_FRAME_MS,
            sample_rate: hark_audio::SAMPLE_RATE,
            vad_sensitivity: 20,
            capture_audio_dir: None,
            credential_refresh_ms: DEFAULT_CREDENTIAL_REFRESH_MS,
        }
    }
}

impl SessionConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_ms == 0 {
            return Err(ConfigError::Invalid("frame_ms must be positive".into()));
        }
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be positive".into()));
        }
        if self.recognition_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "recognition_timeout_ms must be positive".into(),
            ));
        }
        if self.vad_sensitivity > 100 {
            return Err(ConfigError::Invalid(format!(
                "vad_sensitivity {} outside 0-100",
                self.vad_sensitivity
            )));
        }
        if self.frame_samples() == 0 {
            return Err(ConfigError::Invalid(format!(
                "{} ms at {} Hz is less than one sample",
                self.frame_ms, self.sample_rate
            )));
        }
        Ok(())
    }

    /// Samples in one audio frame.
    pub fn frame_samples(&self) -> usize {
        hark_audio::samples_per_frame(self.sample_rate, self.frame_ms)
    }

    pub fn listening_timeout(&self) -> Option<Duration> {
        (self.listening_timeout_ms > 0).then(|| Duration::from_millis(self.listening_timeout_ms))
    }

    pub fn recognition_timeout(&self) -> Duration {
        Duration::from_millis(self.recognition_timeout_ms)
    }

    pub fn credential_refresh(&self) -> Option<Duration> {
        (self.credential_refresh_ms > 0).then(|| Duration::from_millis(self.credential_refresh_ms))
    }

    /// Detector options matching these endpoint windows.
    pub fn vad_options(&self) -> VadOptions {
        VadOptions {
            sos_window_ms: self.sos_window_ms,
            eos_window_ms: self.eos_window_ms,
            sensitivity: self.vad_sensitivity,
            frame_ms: self.frame_ms,
            sample_rate: self.sample_rate,
        }
    }
}
