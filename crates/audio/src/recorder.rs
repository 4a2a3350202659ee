use hound::{WavSpec, WavWriter};
use std::io::BufWriter;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::frame::Frame;

/// Collects frames in memory and writes them out as a 16-bit mono WAV.
///
/// Used for debug capture of everything the microphone delivered in a turn.
pub struct AudioRecorder {
    sample_rate: u32,
    samples: Arc<Mutex<Vec<i16>>>,
}

impl AudioRecorder {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            samples: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push_frame(&self, frame: &Frame) {
        self.samples
            .lock()
            .expect("audio recorder mutex poisoned")
            .extend_from_slice(&frame.samples);
    }

    pub fn sample_count(&self) -> usize {
        self.samples
            .lock()
            .expect("audio recorder mutex poisoned")
            .len()
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.sample_count() as u64 * 1000) / self.sample_rate as u64
    }

    pub fn save_wav(&self, path: impl AsRef<Path>) -> crate::Result<()> {
        let samples = self.samples.lock().expect("audio recorder mutex poisoned");
        let spec = WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| crate::AudioError::File(format!("failed to create directory: {e}")))?;
        }

        let file = std::fs::File::create(path.as_ref())
            .map_err(|e| crate::AudioError::File(format!("failed to create file: {e}")))?;
        let mut writer = WavWriter::new(BufWriter::new(file), spec)
            .map_err(|e| crate::AudioError::File(format!("failed to create wav writer: {e}")))?;

        for &sample in samples.iter() {
            writer
                .write_sample(sample)
                .map_err(|e| crate::AudioError::File(format!("failed to write sample: {e}")))?;
        }

        writer
            .finalize()
            .map_err(|e| crate::AudioError::File(format!("failed to finalize wav: {e}")))?;

        Ok(())
    }
}

impl Clone for AudioRecorder {
    fn clone(&self) -> Self {
        Self {
            sample_rate: self.sample_rate,
            samples: Arc::clone(&self.samples),
        }
    }
}
