use std::sync::{Arc, Mutex};

use crate::backend::{VadBackend, VadCallbacks, VadHandle, VadOptions, VAD_OK};
use crate::{EndpointError, Result};

/// Receives endpoint notifications. Implementations must not call back into
/// the detector that invoked them.
pub trait EndpointHandler: Send + Sync {
    fn on_start_of_speech(&self, position_ms: u32);
    fn on_end_of_speech(&self, position_ms: u32);
    fn on_processing_error(&self, code: i32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    Uninitialized,
    Ready,
    Processing,
    Stopped,
}

type HandlerSlot = Arc<Mutex<Option<Arc<dyn EndpointHandler>>>>;

struct Inner {
    handle: Option<VadHandle>,
    state: DetectorState,
    frame_size: Option<usize>,
    pending: Vec<i16>,
}

/// Adapter between a [`VadBackend`] and an [`EndpointHandler`].
///
/// The handler lives in its own slot rather than behind the instance lock,
/// so SOS/EOS callbacks fired synchronously from inside `process_audio`
/// never wait on the lock `process_audio` holds.
pub struct EndpointDetector {
    backend: Arc<dyn VadBackend>,
    options: VadOptions,
    inner: Mutex<Inner>,
    handler: HandlerSlot,
}

impl EndpointDetector {
    pub fn new(backend: Arc<dyn VadBackend>, options: VadOptions) -> Self {
        Self {
            backend,
            options,
            inner: Mutex::new(Inner {
                handle: None,
                state: DetectorState::Uninitialized,
                frame_size: None,
                pending: Vec::new(),
            }),
            handler: Arc::new(Mutex::new(None)),
        }
    }

    pub fn options(&self) -> &VadOptions {
        &self.options
    }

    /// Create the VAD instance and route its callbacks to `handler`.
    ///
    /// Calling again while started only replaces the handler.
    pub fn start(&self, handler: Arc<dyn EndpointHandler>) -> Result<()> {
        let mut inner = self.inner.lock().expect("endpoint detector mutex poisoned");
        *self.handler.lock().expect("endpoint handler mutex poisoned") = Some(handler);

        if inner.handle.is_some() {
            return Ok(());
        }

        let instance = self
            .backend
            .create(&self.options, self.callbacks())
            .map_err(|code| {
                tracing::error!(code, backend = self.backend.name(), "Failed to create VAD");
                EndpointError::CreateFailed(code)
            })?;
        let handle = VadHandle::new(instance);

        tracing::info!(
            backend = self.backend.name(),
            frame_size = handle.frame_size(),
            "Endpoint detector started"
        );
        inner.frame_size = Some(handle.frame_size());
        inner.handle = Some(handle);
        inner.pending.clear();
        inner.state = DetectorState::Ready;
        Ok(())
    }

    /// Feed samples in the VAD's sub-chunk size. Samples short of a whole
    /// sub-chunk are kept for the next call.
    pub fn process_audio(&self, samples: &[i16]) -> Result<()> {
        let mut failures = Vec::new();
        {
            let mut inner = self.inner.lock().expect("endpoint detector mutex poisoned");
            let Inner {
                handle,
                state,
                pending,
                ..
            } = &mut *inner;
            let handle = handle.as_mut().ok_or(EndpointError::NotStarted)?;
            let frame_size = handle.frame_size().max(1);

            *state = DetectorState::Processing;
            pending.extend_from_slice(samples);
            let whole = (pending.len() / frame_size) * frame_size;
            for chunk in pending[..whole].chunks_exact(frame_size) {
                let status = handle.process_audio(chunk);
                if status != VAD_OK {
                    failures.push(status);
                }
            }
            pending.drain(..whole);
            *state = DetectorState::Ready;
        }

        if !failures.is_empty() {
            let handler = self.current_handler();
            for code in failures {
                tracing::error!(code, "VAD failed to process frame");
                if let Some(handler) = &handler {
                    handler.on_processing_error(code);
                }
            }
        }
        Ok(())
    }

    /// Destroy the VAD instance. Safe when never started or already stopped.
    pub fn stop(&self) {
        let mut inner = self.inner.lock().expect("endpoint detector mutex poisoned");
        *self.handler.lock().expect("endpoint handler mutex poisoned") = None;
        if inner.handle.take().is_some() {
            inner.pending.clear();
            inner.state = DetectorState::Stopped;
            tracing::info!("Endpoint detector stopped");
        }
    }

    /// Native sub-chunk size in samples, known once started.
    pub fn frame_size(&self) -> Option<usize> {
        self.inner
            .lock()
            .expect("endpoint detector mutex poisoned")
            .frame_size
    }

    pub fn state(&self) -> DetectorState {
        self.inner
            .lock()
            .expect("endpoint detector mutex poisoned")
            .state
    }

    fn current_handler(&self) -> Option<Arc<dyn EndpointHandler>> {
        self.handler
            .lock()
            .expect("endpoint handler mutex poisoned")
            .clone()
    }

    fn callbacks(&self) -> VadCallbacks {
        let sos_slot = self.handler.clone();
        let eos_slot = self.handler.clone();
        VadCallbacks {
            on_sos: Arc::new(move |position_ms| {
                tracing::debug!(position_ms, "VAD start of speech");
                let handler = sos_slot.lock().ok().and_then(|h| h.clone());
                if let Some(handler) = handler {
                    handler.on_start_of_speech(position_ms);
                }
            }),
            on_eos: Arc::new(move |position_ms| {
                tracing::debug!(position_ms, "VAD end of speech");
                let handler = eos_slot.lock().ok().and_then(|h| h.clone());
                if let Some(handler) = handler {
                    handler.on_end_of_speech(position_ms);
                }
            }),
        }
    }
}

impl Drop for EndpointDetector {
    fn drop(&mut self) {
        self.stop();
    }
}
