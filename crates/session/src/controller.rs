use std::sync::Arc;

use hark_audio::{AudioRecorder, AudioSource, Frame};
use hark_endpoint::{EarshotBackend, EndpointDetector, EndpointError};
use hark_engine::{EngineEvent, RecognitionEngine};
use tokio::sync::{mpsc, oneshot};

use crate::buffer::FrameBuffer;
use crate::completion::TurnCompletion;
use crate::config::SessionConfig;
use crate::error::{ConfigError, Result};
use crate::events::{CompletionTrigger, TurnEvent, TurnOutcome, TurnResult};
use crate::renewal::CredentialRenewer;
use crate::router::{EventRouter, SessionEvent, TurnChannels, TurnLink};
use crate::state::{Phase, TurnState};
use crate::timer::TimerService;

type EventCallback<'a> = dyn FnMut(TurnEvent) + Send + 'a;

/// A pre-speech frame and its offset from the start of the turn.
struct BufferedFrame {
    offset_ms: u64,
    frame: Frame,
}

/// Everything that exists for the duration of one `run_turn` call.
struct Turn {
    state: TurnState,
    buffer: FrameBuffer<BufferedFrame>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    endpoints: mpsc::UnboundedReceiver<SessionEvent>,
    completion: Arc<TurnCompletion>,
    completion_rx: oneshot::Receiver<CompletionTrigger>,
    listening_timer: Option<TimerService>,
    recognition_timer: TimerService,
    recorder: Option<AudioRecorder>,
    detector_started: bool,
    audio_started: bool,
    engine_started: bool,
    /// First terminal engine result, including one flushed by `stop_session`.
    engine_outcome: Option<TurnOutcome>,
    transcript: Option<String>,
}

/// Runs listen/recognize turns against an audio source, an endpoint detector
/// and a recognition engine.
///
/// Callbacks from those collaborators only post events; the turn's state is
/// owned by the `run_turn` future. `run_turn` takes `&mut self`, so turns on
/// one controller never overlap.
pub struct SessionController {
    config: SessionConfig,
    audio: Arc<dyn AudioSource>,
    detector: EndpointDetector,
    engine: Arc<dyn RecognitionEngine>,
    router: Arc<EventRouter>,
    renewer: Option<CredentialRenewer>,
    next_request_id: u64,
    last_result: Option<TurnResult>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        audio: Arc<dyn AudioSource>,
        detector: EndpointDetector,
        engine: Arc<dyn RecognitionEngine>,
    ) -> Result<Self> {
        config.validate()?;
        let router = Arc::new(EventRouter::default());
        engine.subscribe(router.clone());
        tracing::info!(
            audio = audio.name(),
            engine = engine.name(),
            frame_ms = config.frame_ms,
            "Session controller created"
        );
        Ok(Self {
            config,
            audio,
            detector,
            engine,
            router,
            renewer: None,
            next_request_id: 0,
            last_result: None,
        })
    }

    /// Controller with the built-in earshot endpoint detector.
    pub fn with_earshot(
        config: SessionConfig,
        audio: Arc<dyn AudioSource>,
        engine: Arc<dyn RecognitionEngine>,
    ) -> Result<Self> {
        let detector = EndpointDetector::new(Arc::new(EarshotBackend::new()), config.vad_options());
        Self::new(config, audio, detector, engine)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn detector(&self) -> &EndpointDetector {
        &self.detector
    }

    pub fn last_result(&self) -> Option<&TurnResult> {
        self.last_result.as_ref()
    }

    /// Number of turns started on this controller.
    pub fn turns_started(&self) -> u64 {
        self.next_request_id
    }

    /// Run one listen/recognize turn.
    ///
    /// `on_event` receives progress events in order, ending with
    /// [`TurnEvent::Completed`]. Start failures of the detector, the audio
    /// source or the engine return an error after everything already started
    /// has been stopped.
    #[tracing::instrument(skip_all, fields(request_id, correlation_id))]
    pub async fn run_turn<F>(
        &mut self,
        mut on_event: F,
        grammar_hints: Option<&[String]>,
    ) -> Result<TurnResult>
    where
        F: FnMut(TurnEvent) + Send,
    {
        self.ensure_credential_renewal();

        self.next_request_id += 1;
        let request_id = self.next_request_id;
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::Span::current();
        span.record("request_id", request_id);
        span.record("correlation_id", correlation_id.as_str());

        let mut turn = self.begin_turn(request_id, correlation_id);
        tracing::info!("Turn started");

        let hints = grammar_hints.unwrap_or(&[]);
        let driven = self.drive_turn(&mut turn, &mut on_event, hints).await;
        self.finish_turn(&mut turn, &mut on_event).await;

        let trigger = match driven {
            Ok(trigger) => trigger,
            Err(e) => {
                tracing::error!(error = %e, "Turn aborted");
                return Err(e);
            }
        };

        let outcome = match &trigger {
            CompletionTrigger::ListeningTimeout => TurnOutcome::NoSpeech,
            CompletionTrigger::RecognitionTimeout => TurnOutcome::TimedOut,
            CompletionTrigger::Engine { event } => {
                TurnOutcome::from_engine_event(event).unwrap_or(TurnOutcome::Completed)
            }
            CompletionTrigger::EndOfSpeech { .. } => turn
                .engine_outcome
                .take()
                .unwrap_or(TurnOutcome::Completed),
        };

        let state = &turn.state;
        let result = TurnResult {
            request_id: state.request_id,
            correlation_id: state.correlation_id.clone(),
            session_id: state.session_id.clone(),
            outcome: outcome.clone(),
            trigger,
            transcript: turn.transcript.clone(),
            sos_position_ms: state.sos_position_ms,
            eos_position_ms: state.eos_position_ms,
            audio_duration_ms: state.audio_duration_ms,
            frames_received: state.frames_received,
            frames_streamed: state.frames_streamed,
            frames_dropped: state.frames_dropped,
            frames_discarded: state.frames_discarded,
            elapsed: state.started_at.elapsed(),
        };

        tracing::info!(
            outcome = ?result.outcome,
            audio_duration_ms = result.audio_duration_ms,
            frames_streamed = result.frames_streamed,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "Turn completed"
        );
        on_event(TurnEvent::Completed { outcome });
        self.last_result = Some(result.clone());
        Ok(result)
    }

    fn ensure_credential_renewal(&mut self) {
        if self.renewer.is_some() {
            return;
        }
        if let Some(period) = self.config.credential_refresh() {
            self.renewer = Some(CredentialRenewer::spawn(self.engine.clone(), period));
        }
    }

    fn begin_turn(&self, request_id: u64, correlation_id: String) -> Turn {
        let TurnChannels { events, endpoints } = self.router.open(request_id);
        let (completion, completion_rx) = TurnCompletion::new();
        let recorder = self
            .config
            .capture_audio_dir
            .as_ref()
            .map(|_| AudioRecorder::new(self.config.sample_rate));

        Turn {
            state: TurnState::new(request_id, correlation_id),
            buffer: FrameBuffer::for_window(self.config.sos_window_ms, self.config.frame_ms),
            events,
            endpoints,
            completion: Arc::new(completion),
            completion_rx,
            listening_timer: self
                .config
                .listening_timeout()
                .map(|d| TimerService::new("listening", d)),
            recognition_timer: TimerService::new("recognition", self.config.recognition_timeout()),
            recorder,
            detector_started: false,
            audio_started: false,
            engine_started: false,
            engine_outcome: None,
            transcript: None,
        }
    }

    async fn drive_turn(
        &self,
        turn: &mut Turn,
        on_event: &mut EventCallback<'_>,
        hints: &[String],
    ) -> Result<CompletionTrigger> {
        let request_id = turn.state.request_id;
        let link = Arc::new(TurnLink::new(
            request_id,
            turn.state.correlation_id.clone(),
            self.router.clone(),
            turn.recorder.clone(),
        ));

        self.detector.start(link.clone())?;
        turn.detector_started = true;

        let frame_samples = self.config.frame_samples();
        let native = self.detector.frame_size().unwrap_or(frame_samples).max(1);
        if frame_samples % native != 0 {
            return Err(ConfigError::Invalid(format!(
                "frame of {frame_samples} samples is not a multiple of the detector frame size {native}"
            ))
            .into());
        }

        self.audio.start(link, &turn.state.correlation_id)?;
        turn.audio_started = true;
        turn.state.transition(Phase::Listening);

        if let Some(timer) = &turn.listening_timer {
            let router = self.router.clone();
            timer.start(move || {
                router.post(request_id, SessionEvent::ListeningTimeout);
            })?;
        }

        loop {
            tokio::select! {
                biased;
                trigger = &mut turn.completion_rx => {
                    let trigger = trigger.unwrap_or(CompletionTrigger::Engine {
                        event: EngineEvent::Canceled {
                            reason: "completion signal dropped".to_string(),
                        },
                    });
                    if trigger == CompletionTrigger::RecognitionTimeout {
                        tracing::info!("Recognition timer expired");
                        on_event(TurnEvent::RecognitionTimerExpired);
                    }
                    return Ok(trigger);
                }
                Some(event) = turn.endpoints.recv() => {
                    self.handle_endpoint(turn, event, on_event, hints).await?;
                }
                event = turn.events.recv() => match event {
                    Some(event) => self.handle_event(turn, event, on_event, hints).await?,
                    None => {
                        return Ok(CompletionTrigger::Engine {
                            event: EngineEvent::Canceled {
                                reason: "event channel closed".to_string(),
                            },
                        });
                    }
                },
            }
        }
    }

    async fn handle_event(
        &self,
        turn: &mut Turn,
        event: SessionEvent,
        on_event: &mut EventCallback<'_>,
        hints: &[String],
    ) -> Result<()> {
        match event {
            SessionEvent::Frame(frame) => {
                self.route_frame(turn, frame);
                // Apply endpoints the detector reported for this frame before
                // the next frame is routed.
                while let Ok(endpoint) = turn.endpoints.try_recv() {
                    self.handle_endpoint(turn, endpoint, on_event, hints).await?;
                }
            }
            SessionEvent::Engine(event) => {
                let terminal = self.forward_engine_event(turn, event.clone(), on_event);
                if terminal && turn.state.phase == Phase::Streaming {
                    turn.completion.resolve(CompletionTrigger::Engine { event });
                }
            }
            SessionEvent::ListeningTimeout => {
                if turn.state.phase == Phase::Listening && !turn.state.sos_detected {
                    tracing::info!("Listening timer expired before speech");
                    on_event(TurnEvent::ListeningTimerExpired);
                    turn.completion.resolve(CompletionTrigger::ListeningTimeout);
                }
            }
            endpoint => self.handle_endpoint(turn, endpoint, on_event, hints).await?,
        }
        Ok(())
    }

    async fn handle_endpoint(
        &self,
        turn: &mut Turn,
        event: SessionEvent,
        on_event: &mut EventCallback<'_>,
        hints: &[String],
    ) -> Result<()> {
        if turn.completion.is_resolved() {
            return Ok(());
        }
        match event {
            SessionEvent::StartOfSpeech(position_ms) => {
                if turn.state.phase != Phase::Listening
                    || !turn.state.mark_start_of_speech(position_ms)
                {
                    return Ok(());
                }
                tracing::info!(position_ms, "Start of speech");
                on_event(TurnEvent::ClientSpeechStart { position_ms });
                self.begin_streaming(turn, hints).await?;
            }
            SessionEvent::EndOfSpeech(position_ms) => {
                if !turn.state.mark_end_of_speech(position_ms) {
                    return Ok(());
                }
                tracing::info!(position_ms, "End of speech");
                on_event(TurnEvent::ClientSpeechEnd { position_ms });
                turn.completion
                    .resolve(CompletionTrigger::EndOfSpeech { position_ms });
            }
            SessionEvent::ProcessingError(code) => {
                tracing::error!(code, "Endpoint detector processing error");
            }
            other => tracing::debug!(?other, "Unexpected event on endpoint channel"),
        }
        Ok(())
    }

    async fn begin_streaming(&self, turn: &mut Turn, hints: &[String]) -> Result<()> {
        if let Some(timer) = &turn.listening_timer {
            timer.stop();
        }
        turn.state.transition(Phase::Streaming);

        let completion = turn.completion.clone();
        turn.recognition_timer.start(move || {
            completion.resolve(CompletionTrigger::RecognitionTimeout);
        })?;

        turn.engine_started = true;
        self.engine.start_session(hints).await?;

        // Frames buffered before start-of-speech go out ahead of any later
        // live frame.
        self.flush_buffer(turn);
        Ok(())
    }

    fn route_frame(&self, turn: &mut Turn, frame: Frame) {
        let frame_ms = self.config.frame_ms as u64;
        let offset_ms = turn.state.frames_received * frame_ms;
        turn.state.frames_received += 1;

        if turn.state.sos_detected && turn.state.eos_detected {
            turn.state.frames_dropped += 1;
            return;
        }

        if !turn.state.sos_detected {
            let evicted = turn.buffer.push(BufferedFrame {
                offset_ms,
                frame: frame.clone(),
            });
            if evicted.is_some() {
                turn.state.frames_discarded += 1;
            }
            self.detect(&frame);
            return;
        }

        if !turn.buffer.is_empty() {
            self.flush_buffer(turn);
        }
        self.stream(turn, &frame);
        self.detect(&frame);
    }

    /// Stream buffered frames oldest first, skipping those that end before the
    /// start-of-speech window.
    fn flush_buffer(&self, turn: &mut Turn) {
        let frame_ms = self.config.frame_ms as u64;
        let cutoff_ms = turn
            .state
            .sos_position_ms
            .unwrap_or(0)
            .saturating_sub(self.config.sos_window_ms) as u64;

        let replay: Vec<BufferedFrame> = turn.buffer.drain_oldest_first().collect();
        let mut replayed = 0usize;
        for buffered in replay {
            if buffered.offset_ms + frame_ms <= cutoff_ms {
                turn.state.frames_discarded += 1;
                continue;
            }
            self.stream(turn, &buffered.frame);
            replayed += 1;
        }
        tracing::debug!(replayed, cutoff_ms, "Replayed pre-speech audio");
    }

    fn stream(&self, turn: &mut Turn, frame: &Frame) {
        match self.engine.write(&frame.to_le_bytes()) {
            Ok(()) => turn.state.record_streamed(self.config.frame_ms),
            Err(e) => tracing::warn!(seq = frame.seq, error = %e, "Engine rejected audio"),
        }
    }

    fn detect(&self, frame: &Frame) {
        match self.detector.process_audio(&frame.samples) {
            Ok(()) => {}
            Err(EndpointError::NotStarted) => {
                tracing::warn!(seq = frame.seq, "Frame arrived with detector stopped")
            }
            Err(e) => tracing::error!(seq = frame.seq, error = %e, "Endpoint detection failed"),
        }
    }

    /// Forward an engine event to the caller and record what it carries.
    /// Returns whether the event is terminal.
    fn forward_engine_event(
        &self,
        turn: &mut Turn,
        event: EngineEvent,
        on_event: &mut EventCallback<'_>,
    ) -> bool {
        tracing::debug!(?event, "Engine event");
        match &event {
            EngineEvent::SessionStarted { session_id } => {
                tracing::info!(%session_id, "Recognition session started");
                turn.state.session_id = Some(session_id.clone());
            }
            EngineEvent::Final { alternatives } => {
                if let Some(best) = alternatives.first() {
                    turn.transcript = Some(best.text.clone());
                }
            }
            _ => {}
        }

        let terminal = event.is_terminal();
        if terminal && turn.engine_outcome.is_none() {
            turn.engine_outcome = TurnOutcome::from_engine_event(&event);
        }
        on_event(event.into());
        terminal
    }

    /// Stop everything the turn started, in order: timers, audio source,
    /// engine session, detector.
    async fn finish_turn(&self, turn: &mut Turn, on_event: &mut EventCallback<'_>) {
        turn.state.transition(Phase::Completing);

        if let Some(timer) = &turn.listening_timer {
            timer.stop();
        }
        turn.recognition_timer.stop();

        if turn.audio_started {
            let audio = self.audio.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || audio.stop()).await {
                tracing::warn!(error = %e, "Audio source stop task failed");
            }
        }

        if turn.engine_started {
            if let Err(e) = self.engine.stop_session().await {
                tracing::warn!(error = %e, "Failed to stop recognition session");
            }
            // Results the engine flushed while stopping.
            while let Ok(event) = turn.events.try_recv() {
                if let SessionEvent::Engine(event) = event {
                    self.forward_engine_event(turn, event, on_event);
                }
            }
        }

        if turn.detector_started {
            self.detector.stop();
        }
        self.router.close(turn.state.request_id);

        if let (Some(dir), Some(recorder)) = (&self.config.capture_audio_dir, &turn.recorder) {
            let path = dir.join(format!(
                "turn-{}-{}.wav",
                turn.state.request_id, turn.state.correlation_id
            ));
            match recorder.save_wav(&path) {
                Ok(()) => tracing::info!(
                    path = %path.display(),
                    duration_ms = recorder.duration_ms(),
                    "Saved turn audio"
                ),
                Err(e) => tracing::warn!(error = %e, "Failed to save turn audio"),
            }
        }

        turn.state.transition(Phase::Stopped);
    }

    /// Stop background credential renewal.
    pub fn shutdown(&mut self) {
        if let Some(renewer) = self.renewer.take() {
            renewer.stop();
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
