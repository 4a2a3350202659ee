//! End-to-end turn tests for the session controller.
//!
//! Every collaborator is a scripted fake: the audio source plays numbered
//! frames (each frame's samples all equal its number), the VAD fires
//! endpoints at fixed chunk counts and the engine records which frames it
//! was given.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;

use async_trait::async_trait;
use crossbeam_channel::{RecvTimeoutError, Sender};
use hark_audio::{AudioError, AudioSource, Frame, FrameHandler};
use hark_endpoint::{
    DetectorState, EndpointDetector, VadBackend, VadCallbacks, VadInstance, VadOptions, VAD_OK,
};
use hark_engine::{Alternative, EngineError, EngineEvent, EngineEventSink, RecognitionEngine};
use hark_session::{
    CompletionTrigger, SessionConfig, SessionController, SessionError, TurnEvent, TurnOutcome,
};

const FRAME_MS: u32 = 20;
const FRAME_SAMPLES: usize = 320;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn test_config() -> SessionConfig {
    SessionConfig {
        sos_window_ms: 100,
        eos_window_ms: 100,
        listening_timeout_ms: 0,
        recognition_timeout_ms: 5_000,
        frame_ms: FRAME_MS,
        credential_refresh_ms: 0,
        ..Default::default()
    }
}

// =============================================================================
// Fakes
// =============================================================================

/// Plays frames numbered 1..=scripted, then silence (frame number 0) until
/// stopped when `continuous` is set.
struct ScriptedSource {
    scripted: usize,
    continuous: bool,
    interval: Duration,
    fail_start: bool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    stopped_on: Mutex<Vec<ThreadId>>,
    running: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
}

impl ScriptedSource {
    fn new(scripted: usize) -> Self {
        Self {
            scripted,
            continuous: false,
            interval: Duration::from_millis(2),
            fail_start: false,
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            stopped_on: Mutex::new(Vec::new()),
            running: Mutex::new(None),
        }
    }

    fn continuous(mut self) -> Self {
        self.continuous = true;
        self
    }

    fn failing() -> Self {
        Self {
            fail_start: true,
            ..Self::new(0)
        }
    }
}

impl AudioSource for ScriptedSource {
    fn start(&self, handler: Arc<dyn FrameHandler>, correlation_id: &str) -> hark_audio::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(AudioError::DeviceNotFound("scripted".into()));
        }

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let scripted = self.scripted;
        let continuous = self.continuous;
        let interval = self.interval;
        let correlation_id = correlation_id.to_string();
        let handle = std::thread::spawn(move || {
            let mut seq = 0u64;
            loop {
                if !matches!(stop_rx.recv_timeout(interval), Err(RecvTimeoutError::Timeout)) {
                    break;
                }
                seq += 1;
                let value = if (seq as usize) <= scripted {
                    seq as i16
                } else if continuous {
                    0
                } else {
                    break;
                };
                handler.on_frame(
                    &correlation_id,
                    Frame::new(seq, 16000, vec![value; FRAME_SAMPLES]),
                );
            }
        });
        *self.running.lock().unwrap() = Some((stop_tx, handle));
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.stopped_on
            .lock()
            .unwrap()
            .push(std::thread::current().id());
        if let Some((stop_tx, handle)) = self.running.lock().unwrap().take() {
            let _ = stop_tx.send(());
            let _ = handle.join();
        }
    }

    fn is_running(&self) -> bool {
        self.running.lock().unwrap().is_some()
    }
}

/// VAD that reports endpoints after fixed numbers of processed chunks.
#[derive(Clone, Default)]
struct ScriptedVad {
    frame_size: usize,
    /// (chunk number, position) for start-of-speech.
    sos: Option<(usize, u32)>,
    eos: Option<(usize, u32)>,
    failing_chunks: Vec<usize>,
    created: Arc<AtomicUsize>,
    destroyed: Arc<AtomicUsize>,
}

impl ScriptedVad {
    fn new() -> Self {
        Self {
            frame_size: FRAME_SAMPLES,
            ..Default::default()
        }
    }

    fn sos_at(mut self, chunk: usize, position_ms: u32) -> Self {
        self.sos = Some((chunk, position_ms));
        self
    }

    fn eos_at(mut self, chunk: usize, position_ms: u32) -> Self {
        self.eos = Some((chunk, position_ms));
        self
    }

    fn detector(&self) -> EndpointDetector {
        EndpointDetector::new(Arc::new(self.clone()), VadOptions::default())
    }
}

struct ScriptedVadInstance {
    script: ScriptedVad,
    chunks: usize,
    callbacks: VadCallbacks,
}

impl VadInstance for ScriptedVadInstance {
    fn frame_size(&self) -> usize {
        self.script.frame_size
    }

    fn process_audio(&mut self, _frame: &[i16]) -> i32 {
        self.chunks += 1;
        if self.script.failing_chunks.contains(&self.chunks) {
            return -5;
        }
        if let Some((chunk, pos)) = self.script.sos {
            if chunk == self.chunks {
                (self.callbacks.on_sos)(pos);
            }
        }
        if let Some((chunk, pos)) = self.script.eos {
            if chunk == self.chunks {
                (self.callbacks.on_eos)(pos);
            }
        }
        VAD_OK
    }
}

impl Drop for ScriptedVadInstance {
    fn drop(&mut self) {
        self.script.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

impl VadBackend for ScriptedVad {
    fn create(
        &self,
        _options: &VadOptions,
        callbacks: VadCallbacks,
    ) -> Result<Box<dyn VadInstance>, i32> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedVadInstance {
            script: self.clone(),
            chunks: 0,
            callbacks,
        }))
    }
}

/// Engine that records the number of every frame written to it.
#[derive(Default)]
struct RecordingEngine {
    sink: Mutex<Option<Arc<dyn EngineEventSink>>>,
    subscriptions: AtomicUsize,
    starts: AtomicUsize,
    stop_calls: AtomicUsize,
    active: AtomicBool,
    frames: Mutex<Vec<i16>>,
    fail_start: bool,
    final_on_stop: Option<String>,
    /// Emitted from inside `write` once this many frames have arrived.
    terminal_after: Option<(usize, EngineEvent)>,
}

impl RecordingEngine {
    fn emit(&self, event: EngineEvent) {
        let sink = self.sink.lock().unwrap().clone();
        if let Some(sink) = sink {
            sink.on_engine_event(event);
        }
    }

    fn frames(&self) -> Vec<i16> {
        self.frames.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecognitionEngine for RecordingEngine {
    fn subscribe(&self, sink: Arc<dyn EngineEventSink>) {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock().unwrap() = Some(sink);
    }

    async fn start_session(&self, _grammar_hints: &[String]) -> hark_engine::Result<()> {
        let n = self.starts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_start {
            return Err(EngineError::StartFailed("scripted".into()));
        }
        self.active.store(true, Ordering::SeqCst);
        self.emit(EngineEvent::SessionStarted {
            session_id: format!("session-{n}"),
        });
        Ok(())
    }

    fn write(&self, pcm: &[u8]) -> hark_engine::Result<()> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(EngineError::NotStarted);
        }
        let frame_number = i16::from_le_bytes([pcm[0], pcm[1]]);
        let count = {
            let mut frames = self.frames.lock().unwrap();
            frames.push(frame_number);
            frames.len()
        };
        if let Some((after, event)) = &self.terminal_after {
            if *after == count {
                self.emit(event.clone());
            }
        }
        Ok(())
    }

    async fn stop_session(&self) -> hark_engine::Result<()> {
        let n = self.stop_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.active.swap(false, Ordering::SeqCst) {
            if let Some(text) = &self.final_on_stop {
                self.emit(EngineEvent::Final {
                    alternatives: vec![Alternative {
                        text: text.clone(),
                        confidence: 0.75,
                    }],
                });
            }
            self.emit(EngineEvent::SessionStopped {
                session_id: format!("session-{n}"),
            });
        }
        Ok(())
    }
}

fn controller(
    config: SessionConfig,
    source: &Arc<ScriptedSource>,
    vad: &ScriptedVad,
    engine: &Arc<RecordingEngine>,
) -> SessionController {
    SessionController::new(config, source.clone(), vad.detector(), engine.clone())
        .expect("valid config")
}

// =============================================================================
// Pre-speech replay
// =============================================================================

mod replay {
    use super::*;

    #[tokio::test]
    async fn test_replays_last_window_then_live_frames() {
        init_tracing();
        let source = Arc::new(ScriptedSource::new(30));
        // SOS confirmed while processing frame 10; speech began at frame 6.
        let vad = ScriptedVad::new().sos_at(10, 100).eos_at(15, 280);
        let engine = Arc::new(RecordingEngine {
            final_on_stop: Some("turn on the lights".into()),
            ..Default::default()
        });
        let mut controller = controller(test_config(), &source, &vad, &engine);

        let mut events = Vec::new();
        let result = controller
            .run_turn(|e| events.push(e), None)
            .await
            .expect("turn should complete");

        // Buffer holds 100 ms / 20 ms = 5 frames: 6..=10 replayed, then 11..=15 live.
        assert_eq!(engine.frames(), (6..=15).collect::<Vec<i16>>());
        assert_eq!(result.frames_received, 15);
        assert_eq!(result.frames_streamed, 10);
        assert_eq!(result.frames_discarded, 5);
        assert_eq!(result.audio_duration_ms, 10 * FRAME_MS as u64);
        assert_eq!(result.sos_position_ms, Some(100));
        assert_eq!(result.eos_position_ms, Some(280));
        assert_eq!(
            result.trigger,
            CompletionTrigger::EndOfSpeech { position_ms: 280 }
        );
        assert_eq!(result.transcript.as_deref(), Some("turn on the lights"));
        assert!(result.outcome.is_recognized(), "got {:?}", result.outcome);

        assert_eq!(events.first(), Some(&TurnEvent::ClientSpeechStart { position_ms: 100 }));
        assert!(events.contains(&TurnEvent::ClientSpeechEnd { position_ms: 280 }));
        assert!(matches!(events.last(), Some(TurnEvent::Completed { .. })));
        assert_eq!(engine.starts.load(Ordering::SeqCst), 1);
        assert_eq!(engine.stop_calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_frames_before_window_are_discarded() {
        init_tracing();
        let source = Arc::new(ScriptedSource::new(30));
        // Speech reported at 160 ms; the buffer holds frames 4..=8, all
        // inside the window that starts at 60 ms.
        let vad = ScriptedVad::new().sos_at(8, 160).eos_at(10, 200);
        let engine = Arc::new(RecordingEngine::default());
        let config = SessionConfig {
            sos_window_ms: 100,
            ..test_config()
        };
        let mut controller = controller(config, &source, &vad, &engine);

        let result = controller.run_turn(|_| {}, None).await.unwrap();

        assert_eq!(engine.frames(), (4..=10).collect::<Vec<i16>>());
        assert_eq!(result.outcome, TurnOutcome::Completed);
        assert_eq!(
            result.audio_duration_ms,
            result.frames_streamed * FRAME_MS as u64
        );
    }

    #[tokio::test]
    async fn test_short_window_replays_fewer_frames() {
        init_tracing();
        let source = Arc::new(ScriptedSource::new(30));
        let vad = ScriptedVad::new().sos_at(9, 140).eos_at(11, 200);
        let engine = Arc::new(RecordingEngine::default());
        let config = SessionConfig {
            sos_window_ms: 40,
            ..test_config()
        };
        let mut controller = controller(config, &source, &vad, &engine);
        let result = controller.run_turn(|_| {}, None).await.unwrap();

        // Two frames of history: 8 and 9 replayed, 1..=7 evicted.
        assert_eq!(engine.frames(), (8..=11).collect::<Vec<i16>>());
        assert_eq!(result.frames_discarded, 7);
        assert_eq!(result.frames_streamed, 4);
    }
}

// =============================================================================
// Timeouts
// =============================================================================

mod timeouts {
    use super::*;

    #[tokio::test]
    async fn test_listening_timeout_never_engages_engine() {
        init_tracing();
        let source = Arc::new(ScriptedSource::new(0).continuous());
        let vad = ScriptedVad::new();
        let engine = Arc::new(RecordingEngine::default());
        let config = SessionConfig {
            listening_timeout_ms: 60,
            ..test_config()
        };
        let mut controller = controller(config, &source, &vad, &engine);

        let mut events = Vec::new();
        let result = controller.run_turn(|e| events.push(e), None).await.unwrap();

        assert_eq!(result.outcome, TurnOutcome::NoSpeech);
        assert_eq!(result.trigger, CompletionTrigger::ListeningTimeout);
        assert_eq!(engine.starts.load(Ordering::SeqCst), 0);
        assert!(engine.frames().is_empty(), "no audio may reach the engine");
        assert_eq!(result.audio_duration_ms, 0);
        assert_eq!(
            events,
            vec![
                TurnEvent::ListeningTimerExpired,
                TurnEvent::Completed {
                    outcome: TurnOutcome::NoSpeech
                },
            ]
        );
        assert_eq!(source.stops.load(Ordering::SeqCst), 1);
        assert!(!source.is_running());
        assert_eq!(controller.detector().state(), DetectorState::Stopped);
        assert_eq!(vad.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recognition_timeout_bounds_the_turn() {
        init_tracing();
        let source = Arc::new(ScriptedSource::new(5).continuous());
        let vad = ScriptedVad::new().sos_at(2, 0);
        let engine = Arc::new(RecordingEngine::default());
        let config = SessionConfig {
            recognition_timeout_ms: 80,
            ..test_config()
        };
        let mut controller = controller(config, &source, &vad, &engine);

        let mut events = Vec::new();
        let result = controller.run_turn(|e| events.push(e), None).await.unwrap();

        assert_eq!(result.outcome, TurnOutcome::TimedOut);
        assert_eq!(result.trigger, CompletionTrigger::RecognitionTimeout);
        assert!(events.contains(&TurnEvent::RecognitionTimerExpired));
        assert_eq!(engine.stop_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            result.audio_duration_ms,
            result.frames_streamed * FRAME_MS as u64
        );
        assert_eq!(result.frames_streamed as usize, engine.frames().len());
    }

    #[tokio::test]
    async fn test_zero_listening_timeout_waits_for_speech() {
        init_tracing();
        let source = Arc::new(ScriptedSource::new(40));
        let vad = ScriptedVad::new().sos_at(35, 600).eos_at(37, 700);
        let engine = Arc::new(RecordingEngine::default());
        let mut controller = controller(test_config(), &source, &vad, &engine);

        let result = controller.run_turn(|_| {}, None).await.unwrap();
        assert_eq!(result.sos_position_ms, Some(600));
        assert_eq!(result.outcome, TurnOutcome::Completed);
    }
}

// =============================================================================
// Completion race
// =============================================================================

mod completion {
    use super::*;

    #[tokio::test]
    async fn test_engine_final_ends_turn_before_end_of_speech() {
        init_tracing();
        let source = Arc::new(ScriptedSource::new(10).continuous());
        let vad = ScriptedVad::new().sos_at(3, 0);
        let engine = Arc::new(RecordingEngine {
            terminal_after: Some((
                4,
                EngineEvent::Final {
                    alternatives: vec![Alternative {
                        text: "call mom".into(),
                        confidence: 0.9,
                    }],
                },
            )),
            ..Default::default()
        });
        let mut controller = controller(test_config(), &source, &vad, &engine);

        let mut events = Vec::new();
        let result = controller.run_turn(|e| events.push(e), None).await.unwrap();

        match &result.outcome {
            TurnOutcome::Recognized { text, .. } => assert_eq!(text, "call mom"),
            other => panic!("expected recognized outcome, got {other:?}"),
        }
        assert!(matches!(result.trigger, CompletionTrigger::Engine { .. }));
        assert_eq!(result.session_id.as_deref(), Some("session-1"));
        assert_eq!(engine.stop_calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.stops.load(Ordering::SeqCst), 1);
        assert_eq!(vad.destroyed.load(Ordering::SeqCst), 1);

        let completed = events
            .iter()
            .filter(|e| matches!(e, TurnEvent::Completed { .. }))
            .count();
        assert_eq!(completed, 1, "exactly one completion event");
        assert!(events.contains(&TurnEvent::RecognitionStarted {
            session_id: "session-1".into()
        }));
    }

    #[tokio::test]
    async fn test_engine_error_is_reported_as_failure() {
        init_tracing();
        let source = Arc::new(ScriptedSource::new(10).continuous());
        let vad = ScriptedVad::new().sos_at(1, 0);
        let engine = Arc::new(RecordingEngine {
            terminal_after: Some((
                2,
                EngineEvent::Error {
                    code: 401,
                    details: "token expired".into(),
                },
            )),
            ..Default::default()
        });
        let mut controller = controller(test_config(), &source, &vad, &engine);

        let result = controller.run_turn(|_| {}, None).await.unwrap();
        assert_eq!(
            result.outcome,
            TurnOutcome::Failed {
                code: 401,
                details: "token expired".into()
            }
        );
        assert_eq!(engine.stop_calls.load(Ordering::SeqCst), 1);
        assert!(!source.is_running());
    }

    #[tokio::test]
    async fn test_engine_cancellation_is_distinct_from_timeout() {
        init_tracing();
        let source = Arc::new(ScriptedSource::new(10).continuous());
        let vad = ScriptedVad::new().sos_at(1, 0);
        let engine = Arc::new(RecordingEngine {
            terminal_after: Some((
                1,
                EngineEvent::Canceled {
                    reason: "network".into(),
                },
            )),
            ..Default::default()
        });
        let mut controller = controller(test_config(), &source, &vad, &engine);

        let result = controller.run_turn(|_| {}, None).await.unwrap();
        assert_eq!(
            result.outcome,
            TurnOutcome::Cancelled {
                reason: "network".into()
            }
        );
    }

    #[tokio::test]
    async fn test_end_of_speech_without_engine_result_completes() {
        init_tracing();
        let source = Arc::new(ScriptedSource::new(20));
        let vad = ScriptedVad::new().sos_at(2, 0).eos_at(6, 100);
        let engine = Arc::new(RecordingEngine::default());
        let mut controller = controller(test_config(), &source, &vad, &engine);

        let result = controller.run_turn(|_| {}, None).await.unwrap();
        assert_eq!(result.outcome, TurnOutcome::Completed);
        assert_eq!(engine.frames(), (1..=6).collect::<Vec<i16>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_racing_triggers_complete_exactly_once() {
        init_tracing();
        for turn in 0..40u64 {
            let source = Arc::new(ScriptedSource::new(10).continuous());
            // End-of-speech and the engine result land on the same frame,
            // with the recognition timer due around the same moment.
            let vad = ScriptedVad::new().sos_at(1, 0).eos_at(3, 40);
            let engine = Arc::new(RecordingEngine {
                terminal_after: Some((
                    3,
                    EngineEvent::Final {
                        alternatives: vec![Alternative {
                            text: "stop".into(),
                            confidence: 0.8,
                        }],
                    },
                )),
                ..Default::default()
            });
            let config = SessionConfig {
                recognition_timeout_ms: 5 + turn % 4,
                ..test_config()
            };
            let mut controller = controller(config, &source, &vad, &engine);

            let mut events = Vec::new();
            let result = controller.run_turn(|e| events.push(e), None).await.unwrap();

            let completed = events
                .iter()
                .filter(|e| matches!(e, TurnEvent::Completed { .. }))
                .count();
            assert_eq!(completed, 1, "turn {turn}: {events:?}");
            assert!(matches!(events.last(), Some(TurnEvent::Completed { .. })));
            assert!(
                matches!(
                    result.trigger,
                    CompletionTrigger::EndOfSpeech { .. }
                        | CompletionTrigger::Engine { .. }
                        | CompletionTrigger::RecognitionTimeout
                ),
                "turn {turn}: {:?}",
                result.trigger
            );
            assert_eq!(engine.stop_calls.load(Ordering::SeqCst), 1, "turn {turn}");
            assert_eq!(source.stops.load(Ordering::SeqCst), 1, "turn {turn}");
            assert_eq!(vad.destroyed.load(Ordering::SeqCst), 1, "turn {turn}");
            assert!(!source.is_running());
        }
    }
}

// =============================================================================
// Errors and cleanup
// =============================================================================

mod errors {
    use super::*;

    #[tokio::test]
    async fn test_audio_start_failure_cleans_up_detector() {
        init_tracing();
        let source = Arc::new(ScriptedSource::failing());
        let vad = ScriptedVad::new();
        let engine = Arc::new(RecordingEngine::default());
        let mut controller = controller(test_config(), &source, &vad, &engine);

        let result = controller.run_turn(|_| {}, None).await;

        assert!(matches!(result, Err(SessionError::AudioStart(_))));
        assert_eq!(vad.created.load(Ordering::SeqCst), 1);
        assert_eq!(vad.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(engine.starts.load(Ordering::SeqCst), 0);
        assert_eq!(source.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_engine_start_failure_stops_audio_and_detector() {
        init_tracing();
        let source = Arc::new(ScriptedSource::new(10).continuous());
        let vad = ScriptedVad::new().sos_at(2, 0);
        let engine = Arc::new(RecordingEngine {
            fail_start: true,
            ..Default::default()
        });
        let mut controller = controller(test_config(), &source, &vad, &engine);

        let result = controller.run_turn(|_| {}, None).await;

        assert!(matches!(result, Err(SessionError::EngineStart(_))));
        assert_eq!(source.stops.load(Ordering::SeqCst), 1);
        assert!(!source.is_running());
        assert_eq!(vad.destroyed.load(Ordering::SeqCst), 1);
        assert!(engine.frames().is_empty());
    }

    #[tokio::test]
    async fn test_frame_size_mismatch_is_config_error() {
        init_tracing();
        let source = Arc::new(ScriptedSource::new(10));
        let vad = ScriptedVad {
            frame_size: 480,
            ..ScriptedVad::new()
        };
        let engine = Arc::new(RecordingEngine::default());
        let mut controller = controller(test_config(), &source, &vad, &engine);

        let result = controller.run_turn(|_| {}, None).await;

        assert!(matches!(result, Err(SessionError::Config(_))));
        assert_eq!(source.starts.load(Ordering::SeqCst), 0);
        assert_eq!(vad.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_processing_errors_do_not_end_turn() {
        init_tracing();
        let source = Arc::new(ScriptedSource::new(20));
        let vad = ScriptedVad {
            failing_chunks: vec![1, 3],
            ..ScriptedVad::new().sos_at(4, 0).eos_at(8, 140)
        };
        let engine = Arc::new(RecordingEngine {
            final_on_stop: Some("ok".into()),
            ..Default::default()
        });
        let mut controller = controller(test_config(), &source, &vad, &engine);

        let result = controller.run_turn(|_| {}, None).await.unwrap();
        assert!(result.outcome.is_recognized());
        assert_eq!(result.eos_position_ms, Some(140));
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let source = Arc::new(ScriptedSource::new(0));
        let engine = Arc::new(RecordingEngine::default());
        let config = SessionConfig {
            frame_ms: 0,
            ..test_config()
        };
        let result = SessionController::new(config, source, ScriptedVad::new().detector(), engine);
        assert!(matches!(result, Err(SessionError::Config(_))));
    }
}

// =============================================================================
// Controller lifecycle
// =============================================================================

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_consecutive_turns_are_independent() {
        init_tracing();
        let source = Arc::new(ScriptedSource::new(12));
        let vad = ScriptedVad::new().sos_at(3, 20).eos_at(6, 100);
        let engine = Arc::new(RecordingEngine {
            final_on_stop: Some("again".into()),
            ..Default::default()
        });
        let mut controller = controller(test_config(), &source, &vad, &engine);

        let first = controller.run_turn(|_| {}, None).await.unwrap();
        let second = controller.run_turn(|_| {}, None).await.unwrap();

        assert_eq!(first.request_id, 1);
        assert_eq!(second.request_id, 2);
        assert_ne!(first.correlation_id, second.correlation_id);
        assert_eq!(first.frames_streamed, second.frames_streamed);
        assert_eq!(second.sos_position_ms, Some(20));
        assert_eq!(engine.subscriptions.load(Ordering::SeqCst), 1);
        assert_eq!(engine.starts.load(Ordering::SeqCst), 2);
        assert_eq!(vad.created.load(Ordering::SeqCst), 2);
        assert_eq!(vad.destroyed.load(Ordering::SeqCst), 2);
        assert_eq!(controller.turns_started(), 2);
        assert_eq!(controller.last_result().map(|r| r.request_id), Some(2));
    }

    #[tokio::test]
    async fn test_audio_source_is_stopped_off_the_runtime_thread() {
        init_tracing();
        let source = Arc::new(ScriptedSource::new(12));
        let vad = ScriptedVad::new().sos_at(2, 0).eos_at(4, 60);
        let engine = Arc::new(RecordingEngine::default());
        let mut controller = controller(test_config(), &source, &vad, &engine);

        controller.run_turn(|_| {}, None).await.unwrap();

        // The current-thread runtime drives the turn on this thread; the
        // blocking stop must run elsewhere.
        let stopped_on = source.stopped_on.lock().unwrap().clone();
        assert_eq!(stopped_on.len(), 1);
        assert_ne!(stopped_on[0], std::thread::current().id());
        assert!(!source.is_running());
    }

    #[tokio::test]
    async fn test_grammar_hints_reach_engine() {
        #[derive(Default)]
        struct HintEngine {
            inner: RecordingEngine,
            hints: Mutex<Vec<String>>,
        }

        #[async_trait]
        impl RecognitionEngine for HintEngine {
            fn subscribe(&self, sink: Arc<dyn EngineEventSink>) {
                self.inner.subscribe(sink);
            }
            async fn start_session(&self, grammar_hints: &[String]) -> hark_engine::Result<()> {
                *self.hints.lock().unwrap() = grammar_hints.to_vec();
                self.inner.start_session(grammar_hints).await
            }
            fn write(&self, pcm: &[u8]) -> hark_engine::Result<()> {
                self.inner.write(pcm)
            }
            async fn stop_session(&self) -> hark_engine::Result<()> {
                self.inner.stop_session().await
            }
        }

        init_tracing();
        let source = Arc::new(ScriptedSource::new(10));
        let vad = ScriptedVad::new().sos_at(2, 0).eos_at(4, 60);
        let engine = Arc::new(HintEngine::default());
        let mut controller =
            SessionController::new(test_config(), source, vad.detector(), engine.clone()).unwrap();

        let hints = vec!["lights".to_string(), "kitchen".to_string()];
        controller.run_turn(|_| {}, Some(hints.as_slice())).await.unwrap();
        assert_eq!(*engine.hints.lock().unwrap(), hints);
    }

    #[tokio::test]
    async fn test_turn_audio_is_captured_to_wav() {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ScriptedSource::new(10));
        let vad = ScriptedVad::new().sos_at(2, 0).eos_at(5, 80);
        let engine = Arc::new(RecordingEngine::default());
        let config = SessionConfig {
            capture_audio_dir: Some(dir.path().to_path_buf()),
            ..test_config()
        };
        let mut controller = controller(config, &source, &vad, &engine);

        let result = controller.run_turn(|_| {}, None).await.unwrap();

        let path = dir.path().join(format!("turn-1-{}.wav", result.correlation_id));
        let reader = hound::WavReader::open(&path).expect("capture file written");
        assert_eq!(reader.spec().sample_rate, 16000);
        assert!(reader.len() as u64 >= result.frames_received * FRAME_SAMPLES as u64);
    }

    #[tokio::test]
    async fn test_credential_renewal_starts_with_first_turn() {
        #[derive(Default)]
        struct RenewingEngine {
            inner: RecordingEngine,
            renewals: AtomicUsize,
        }

        #[async_trait]
        impl RecognitionEngine for RenewingEngine {
            fn subscribe(&self, sink: Arc<dyn EngineEventSink>) {
                self.inner.subscribe(sink);
            }
            async fn start_session(&self, grammar_hints: &[String]) -> hark_engine::Result<()> {
                self.inner.start_session(grammar_hints).await
            }
            fn write(&self, pcm: &[u8]) -> hark_engine::Result<()> {
                self.inner.write(pcm)
            }
            async fn stop_session(&self) -> hark_engine::Result<()> {
                self.inner.stop_session().await
            }
            async fn renew_credentials(&self) -> hark_engine::Result<()> {
                self.renewals.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        init_tracing();
        let source = Arc::new(ScriptedSource::new(10));
        let vad = ScriptedVad::new().sos_at(2, 0).eos_at(4, 60);
        let engine = Arc::new(RenewingEngine::default());
        let config = SessionConfig {
            credential_refresh_ms: 20,
            ..test_config()
        };
        let mut controller =
            SessionController::new(config, source, vad.detector(), engine.clone()).unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(
            engine.renewals.load(Ordering::SeqCst),
            0,
            "renewal must not run before the first turn"
        );

        controller.run_turn(|_| {}, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let renewed = engine.renewals.load(Ordering::SeqCst);
        assert!(renewed >= 2, "expected periodic renewals, got {renewed}");

        drop(controller);
        tokio::time::sleep(Duration::from_millis(40)).await;
        let after_drop = engine.renewals.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(engine.renewals.load(Ordering::SeqCst), after_drop);
    }
}
