//! WAV file playback as an audio source.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender, TryRecvError};

use crate::chunker::{resample_linear, to_mono, FrameChunker};
use crate::frame::{samples_per_frame, AudioSource, Frame, FrameHandler};
use crate::{AudioError, SAMPLE_RATE};

/// How fast a [`WavFileSource`] delivers frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pacing {
    /// One frame per frame duration, like a live device.
    #[default]
    RealTime,
    /// As fast as the handler accepts them.
    Immediate,
}

struct Running {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Plays a WAV file through the [`AudioSource`] contract.
///
/// The file is decoded, downmixed and resampled to 16 kHz when `start()` is
/// called, so unreadable files fail the start rather than the playback thread.
pub struct WavFileSource {
    path: PathBuf,
    frame_ms: u32,
    pacing: Pacing,
    trailing_silence_ms: u32,
    running: Mutex<Option<Running>>,
}

impl WavFileSource {
    pub fn new(path: impl AsRef<Path>, frame_ms: u32) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            frame_ms,
            pacing: Pacing::default(),
            trailing_silence_ms: 0,
            running: Mutex::new(None),
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Append silence after the file so an endpointer can observe the end of
    /// speech.
    pub fn with_trailing_silence(mut self, silence_ms: u32) -> Self {
        self.trailing_silence_ms = silence_ms;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_frames(&self) -> crate::Result<Vec<Frame>> {
        let mut reader = hound::WavReader::open(&self.path)
            .map_err(|e| AudioError::File(format!("{}: {e}", self.path.display())))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let mut chunker = FrameChunker::new(SAMPLE_RATE, self.frame_ms);
        let mut frames = Vec::new();

        let native_pcm16 = spec.sample_format == hound::SampleFormat::Int
            && spec.bits_per_sample == 16
            && channels == 1
            && spec.sample_rate == SAMPLE_RATE;

        if native_pcm16 {
            let samples: Vec<i16> = reader
                .samples::<i16>()
                .collect::<Result<_, _>>()
                .map_err(|e| AudioError::File(e.to_string()))?;
            frames.extend(chunker.push_i16(&samples));
        } else {
            let interleaved: Vec<f32> = match spec.sample_format {
                hound::SampleFormat::Float => reader
                    .samples::<f32>()
                    .collect::<Result<_, _>>()
                    .map_err(|e| AudioError::File(e.to_string()))?,
                hound::SampleFormat::Int => {
                    if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                        return Err(AudioError::UnsupportedFormat(format!(
                            "{} bits per sample",
                            spec.bits_per_sample
                        )));
                    }
                    let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                    reader
                        .samples::<i32>()
                        .map(|s| s.map(|v| v as f32 / scale))
                        .collect::<Result<_, _>>()
                        .map_err(|e| AudioError::File(e.to_string()))?
                }
            };
            let mono = to_mono(&interleaved, channels);
            let resampled = resample_linear(&mono, spec.sample_rate, SAMPLE_RATE);
            frames.extend(chunker.push_f32(&resampled));
        }
        frames.extend(chunker.flush());

        let frame_samples = samples_per_frame(SAMPLE_RATE, self.frame_ms).max(1);
        let silence_frames = self.trailing_silence_ms.div_ceil(self.frame_ms.max(1));
        let mut seq = frames.len() as u64;
        for _ in 0..silence_frames {
            frames.push(Frame::new(seq, SAMPLE_RATE, vec![0i16; frame_samples]));
            seq += 1;
        }

        Ok(frames)
    }
}

impl AudioSource for WavFileSource {
    fn start(&self, handler: Arc<dyn FrameHandler>, correlation_id: &str) -> crate::Result<()> {
        let mut running = self.running.lock().expect("wav source mutex poisoned");
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            tracing::debug!(path = %self.path.display(), "WAV source already running");
            return Ok(());
        }
        if let Some(finished) = running.take() {
            let _ = finished.handle.join();
        }

        let frames = self.load_frames()?;
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let pacing = self.pacing;
        let frame_interval = Duration::from_millis(self.frame_ms as u64);
        let correlation_id = correlation_id.to_string();

        let duration_ms: u64 = frames.iter().map(Frame::duration_ms).sum();
        tracing::info!(
            path = %self.path.display(),
            frames = frames.len(),
            duration_ms,
            ?pacing,
            %correlation_id,
            "Starting WAV source"
        );

        let handle = std::thread::Builder::new()
            .name("hark-wav-source".to_string())
            .spawn(move || {
                let mut delivered = 0usize;
                for frame in frames {
                    let stop_requested = match pacing {
                        Pacing::RealTime => !matches!(
                            stop_rx.recv_timeout(frame_interval),
                            Err(RecvTimeoutError::Timeout)
                        ),
                        Pacing::Immediate => {
                            !matches!(stop_rx.try_recv(), Err(TryRecvError::Empty))
                        }
                    };
                    if stop_requested {
                        break;
                    }
                    handler.on_frame(&correlation_id, frame);
                    delivered += 1;
                }
                tracing::debug!(delivered, "WAV source finished");
            })
            .map_err(|e| AudioError::StreamError(format!("failed to spawn playback thread: {e}")))?;

        *running = Some(Running { stop_tx, handle });
        Ok(())
    }

    fn stop(&self) {
        let running = self.running.lock().expect("wav source mutex poisoned").take();
        if let Some(running) = running {
            let _ = running.stop_tx.send(());
            let _ = running.handle.join();
            tracing::debug!(path = %self.path.display(), "WAV source stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.running
            .lock()
            .expect("wav source mutex poisoned")
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    fn name(&self) -> &str {
        "wav-file"
    }
}

impl Drop for WavFileSource {
    fn drop(&mut self) {
        self.stop();
    }
}
