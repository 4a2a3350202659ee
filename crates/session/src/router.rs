//! Callback fan-in for the turn event loop.
//!
//! Audio, detector, timer and engine callbacks run on their own threads.
//! None of them touch turn state; they post a [`SessionEvent`] into the
//! channels of the turn that is currently open and return. Endpoint
//! notifications get a channel of their own so the event loop can apply a
//! start-of-speech fired while it processed a frame before routing the frame
//! queued behind it.

use std::sync::{Arc, Mutex};

use hark_audio::{AudioRecorder, Frame, FrameHandler};
use hark_endpoint::EndpointHandler;
use hark_engine::{EngineEvent, EngineEventSink};
use tokio::sync::mpsc;

#[derive(Debug)]
pub(crate) enum SessionEvent {
    Frame(Frame),
    StartOfSpeech(u32),
    EndOfSpeech(u32),
    ProcessingError(i32),
    Engine(EngineEvent),
    ListeningTimeout,
}

impl SessionEvent {
    fn is_endpoint(&self) -> bool {
        matches!(
            self,
            SessionEvent::StartOfSpeech(_)
                | SessionEvent::EndOfSpeech(_)
                | SessionEvent::ProcessingError(_)
        )
    }
}

/// Receiving ends of one turn's channels.
pub(crate) struct TurnChannels {
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    pub endpoints: mpsc::UnboundedReceiver<SessionEvent>,
}

struct Route {
    request_id: u64,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    endpoints_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl Route {
    fn send(&self, event: SessionEvent) -> bool {
        let tx = if event.is_endpoint() {
            &self.endpoints_tx
        } else {
            &self.events_tx
        };
        tx.send(event).is_ok()
    }
}

/// Holds the sender of the open turn. Events for any other turn are dropped.
#[derive(Default)]
pub(crate) struct EventRouter {
    route: Mutex<Option<Route>>,
}

impl EventRouter {
    pub fn open(&self, request_id: u64) -> TurnChannels {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (endpoints_tx, endpoints) = mpsc::unbounded_channel();
        *self.route.lock().expect("event router mutex poisoned") = Some(Route {
            request_id,
            events_tx,
            endpoints_tx,
        });
        TurnChannels { events, endpoints }
    }

    pub fn close(&self, request_id: u64) {
        let mut route = self.route.lock().expect("event router mutex poisoned");
        if route.as_ref().is_some_and(|r| r.request_id == request_id) {
            *route = None;
        }
    }

    /// Deliver `event` if `request_id` is the open turn.
    pub fn post(&self, request_id: u64, event: SessionEvent) -> bool {
        let route = self.route.lock().expect("event router mutex poisoned");
        match route.as_ref() {
            Some(r) if r.request_id == request_id => r.send(event),
            _ => {
                tracing::trace!(request_id, ?event, "Dropping event for inactive turn");
                false
            }
        }
    }

    fn post_current(&self, event: SessionEvent) -> bool {
        let route = self.route.lock().expect("event router mutex poisoned");
        match route.as_ref() {
            Some(r) => r.send(event),
            None => {
                tracing::debug!(?event, "Dropping event outside a turn");
                false
            }
        }
    }
}

impl EngineEventSink for EventRouter {
    fn on_engine_event(&self, event: EngineEvent) {
        self.post_current(SessionEvent::Engine(event));
    }
}

/// Per-turn handler given to the audio source and the detector.
pub(crate) struct TurnLink {
    request_id: u64,
    correlation_id: String,
    router: Arc<EventRouter>,
    recorder: Option<AudioRecorder>,
}

impl TurnLink {
    pub fn new(
        request_id: u64,
        correlation_id: String,
        router: Arc<EventRouter>,
        recorder: Option<AudioRecorder>,
    ) -> Self {
        Self {
            request_id,
            correlation_id,
            router,
            recorder,
        }
    }
}

impl FrameHandler for TurnLink {
    fn on_frame(&self, correlation_id: &str, frame: Frame) {
        if correlation_id != self.correlation_id {
            tracing::debug!(
                expected = %self.correlation_id,
                got = %correlation_id,
                "Frame for another turn"
            );
            return;
        }
        if let Some(recorder) = &self.recorder {
            recorder.push_frame(&frame);
        }
        self.router.post(self.request_id, SessionEvent::Frame(frame));
    }
}

impl EndpointHandler for TurnLink {
    fn on_start_of_speech(&self, position_ms: u32) {
        self.router
            .post(self.request_id, SessionEvent::StartOfSpeech(position_ms));
    }

    fn on_end_of_speech(&self, position_ms: u32) {
        self.router
            .post(self.request_id, SessionEvent::EndOfSpeech(position_ms));
    }

    fn on_processing_error(&self, code: i32) {
        self.router
            .post(self.request_id, SessionEvent::ProcessingError(code));
    }
}
