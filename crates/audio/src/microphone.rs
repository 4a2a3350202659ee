//! Live capture from an input device.
//!
//! `cpal::Stream` is not `Send`, so the stream lives on a dedicated thread
//! that owns it from build to drop. `start()` waits for that thread to report
//! whether the device opened.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream};
use crossbeam_channel::Sender;

use crate::frame::{AudioSource, FrameHandler};
use crate::resampler::CapturePipeline;
use crate::{AudioError, SAMPLE_RATE};

struct Capture {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Microphone source delivering 16 kHz mono frames of `frame_ms`.
pub struct Microphone {
    device_name: Option<String>,
    frame_ms: u32,
    capture: Mutex<Option<Capture>>,
}

impl Microphone {
    /// `device_name` of `None` selects the host's default input device.
    pub fn new(device_name: Option<String>, frame_ms: u32) -> Self {
        Self {
            device_name,
            frame_ms,
            capture: Mutex::new(None),
        }
    }

    /// Names of the input devices the default host exposes.
    pub fn input_device_names() -> crate::Result<Vec<String>> {
        let host = cpal::default_host();
        Ok(host
            .input_devices()?
            .map(|d| d.name().unwrap_or_else(|_| "Unknown".to_string()))
            .collect())
    }
}

impl AudioSource for Microphone {
    fn start(&self, handler: Arc<dyn FrameHandler>, correlation_id: &str) -> crate::Result<()> {
        let mut capture = self.capture.lock().expect("microphone mutex poisoned");
        if capture.is_some() {
            tracing::debug!("Microphone already capturing");
            return Ok(());
        }

        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<crate::Result<()>>(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let device_name = self.device_name.clone();
        let frame_ms = self.frame_ms;
        let correlation_id = correlation_id.to_string();

        let handle = std::thread::Builder::new()
            .name("hark-microphone".to_string())
            .spawn(move || {
                let stream = get_device(device_name.as_deref())
                    .and_then(|device| build_stream(device, frame_ms, handler, correlation_id));
                match stream {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        // Blocks until stop() sends or the sender is dropped.
                        let _ = stop_rx.recv();
                        drop(stream);
                        tracing::debug!("Microphone stream dropped");
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::info!(device = ?self.device_name, "Microphone capture started");
                *capture = Some(Capture { stop_tx, handle });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                tracing::error!(error = %e, "Microphone failed to start");
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::StreamError(
                    "capture thread exited before reporting".to_string(),
                ))
            }
        }
    }

    fn stop(&self) {
        let capture = self.capture.lock().expect("microphone mutex poisoned").take();
        if let Some(capture) = capture {
            let _ = capture.stop_tx.send(());
            let _ = capture.handle.join();
            tracing::info!("Microphone capture stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.capture
            .lock()
            .expect("microphone mutex poisoned")
            .is_some()
    }

    fn name(&self) -> &str {
        "microphone"
    }
}

impl Drop for Microphone {
    fn drop(&mut self) {
        self.stop();
    }
}

fn get_device(device_name: Option<&str>) -> crate::Result<Device> {
    let host = cpal::default_host();
    match device_name {
        Some(name) => host
            .input_devices()?
            .find(|d| d.name().ok().as_deref() == Some(name))
            .ok_or_else(|| AudioError::DeviceNotFound(name.to_string())),
        None => host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound("default".to_string())),
    }
}

fn build_stream(
    device: Device,
    frame_ms: u32,
    handler: Arc<dyn FrameHandler>,
    correlation_id: String,
) -> crate::Result<Stream> {
    let config = device
        .default_input_config()
        .map_err(|e| AudioError::StreamError(format!("failed to get default config: {e}")))?;

    let sample_rate = config.sample_rate().0;
    let channels = config.channels() as usize;
    let mut pipeline = CapturePipeline::new(sample_rate, channels, SAMPLE_RATE, frame_ms)?;

    let mut deliver = move |data: &[f32]| {
        for frame in pipeline.push(data) {
            handler.on_frame(&correlation_id, frame);
        }
    };

    let stream = match config.sample_format() {
        SampleFormat::F32 => device.build_input_stream(
            &config.into(),
            move |data: &[f32], _| deliver(data),
            |err| tracing::error!("audio stream error: {}", err),
            None,
        )?,
        SampleFormat::I16 => device.build_input_stream(
            &config.into(),
            move |data: &[i16], _| {
                let float: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                deliver(&float);
            },
            |err| tracing::error!("audio stream error: {}", err),
            None,
        )?,
        format => {
            return Err(AudioError::UnsupportedFormat(format!(
                "unsupported sample format: {format:?}"
            )));
        }
    };

    stream
        .play()
        .map_err(|e| AudioError::StreamError(format!("failed to start stream: {e}")))?;

    Ok(stream)
}
