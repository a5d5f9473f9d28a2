//! Mock voice engine for tests and the CLI simulator.
//!
//! Records every call in order and reports progress through the normal
//! event channel.  In manual mode an utterance only ends when the test
//! says so ([`MockEngineHandle::finish_current`]); in timed mode it ends
//! after a deterministic duration derived from the text length.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Boundary, EngineError, EngineEvent, EngineEventSender, VoiceEngine};
use crate::config::SimulatorConfig;
use crate::speech::utterance::{SynthesisParams, Utterance, UtteranceId};
use crate::utils::preview;

// ── Configuration ────────────────────────────────────────────────

/// How an utterance comes to an end.
#[derive(Debug, Clone)]
pub enum MockCompletion {
    /// Only when [`MockEngineHandle::finish_current`] is called.
    Manual,
    /// After `chars * ms_per_char`, clamped.
    Timed {
        ms_per_char: f64,
        min_duration_ms: f64,
        max_duration_ms: f64,
    },
}

/// Configuration for [`MockVoiceEngine`].
#[derive(Debug, Clone)]
pub struct MockEngineConfig {
    pub completion: MockCompletion,
    /// Known voices.  `None` accepts any voice.
    pub voices: Option<Vec<String>>,
}

impl Default for MockEngineConfig {
    fn default() -> Self {
        Self {
            completion: MockCompletion::Manual,
            voices: None,
        }
    }
}

/// One recorded engine call.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Speak {
        id: UtteranceId,
        text: String,
        params: SynthesisParams,
    },
    Pause(Boundary),
    Resume,
    Stop(Boundary),
    UpdateParams {
        id: UtteranceId,
        params: SynthesisParams,
    },
}

// ── Shared state ─────────────────────────────────────────────────

struct Playing {
    id: UtteranceId,
    paused: bool,
    remaining: Duration,
    resumed_at: Instant,
    timer: Option<CancellationToken>,
}

struct Inner {
    calls: Vec<EngineCall>,
    current: Option<Playing>,
    events: EngineEventSender,
}

impl Inner {
    fn emit(&self, event: EngineEvent) {
        // The service may already be gone during shutdown.
        let _ = self.events.send(event);
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Engine ───────────────────────────────────────────────────────

/// Voice engine double that records calls and simulates speech.
pub struct MockVoiceEngine {
    config: MockEngineConfig,
    inner: Arc<Mutex<Inner>>,
}

/// Test-side view of a [`MockVoiceEngine`] owned by the coordinator.
#[derive(Clone)]
pub struct MockEngineHandle {
    inner: Arc<Mutex<Inner>>,
}

impl MockVoiceEngine {
    pub fn new(config: MockEngineConfig, events: EngineEventSender) -> (Self, MockEngineHandle) {
        let inner = Arc::new(Mutex::new(Inner {
            calls: Vec::new(),
            current: None,
            events,
        }));
        let handle = MockEngineHandle {
            inner: Arc::clone(&inner),
        };
        (Self { config, inner }, handle)
    }

    /// Engine whose utterances end only when the test finishes them.
    pub fn manual(events: EngineEventSender) -> (Self, MockEngineHandle) {
        Self::new(MockEngineConfig::default(), events)
    }

    /// Engine that "speaks" for a duration proportional to text length.
    pub fn timed(ms_per_char: f64, events: EngineEventSender) -> (Self, MockEngineHandle) {
        Self::new(
            MockEngineConfig {
                completion: MockCompletion::Timed {
                    ms_per_char,
                    min_duration_ms: 200.0,
                    max_duration_ms: 30000.0,
                },
                voices: None,
            },
            events,
        )
    }

    /// Timed engine configured from the `[simulator]` section.
    pub fn simulated(config: &SimulatorConfig, events: EngineEventSender) -> (Self, MockEngineHandle) {
        Self::new(
            MockEngineConfig {
                completion: MockCompletion::Timed {
                    ms_per_char: config.ms_per_char,
                    min_duration_ms: config.min_duration_ms,
                    max_duration_ms: config.max_duration_ms,
                },
                voices: None,
            },
            events,
        )
    }

    /// Restrict the voices this engine claims to have.
    pub fn with_voices(mut self, voices: &[&str]) -> Self {
        self.config.voices = Some(voices.iter().map(|v| v.to_string()).collect());
        self
    }

    fn duration_for(&self, text: &str) -> Duration {
        match self.config.completion {
            MockCompletion::Manual => Duration::MAX,
            MockCompletion::Timed {
                ms_per_char,
                min_duration_ms,
                max_duration_ms,
            } => {
                let ms = (text.chars().count() as f64 * ms_per_char)
                    .max(min_duration_ms)
                    .min(max_duration_ms)
                    .max(0.0);
                Duration::from_secs_f64(ms / 1000.0)
            }
        }
    }

    fn is_timed(&self) -> bool {
        matches!(self.config.completion, MockCompletion::Timed { .. })
    }

    /// Spawn the completion timer for `id`.
    fn arm_timer(&self, id: UtteranceId, after: Duration) -> CancellationToken {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = sleep(after) => {
                    let mut guard = lock(&inner);
                    let done = guard
                        .current
                        .as_ref()
                        .is_some_and(|p| p.id == id && !p.paused);
                    if done {
                        guard.current = None;
                        guard.emit(EngineEvent::Finished(id));
                    }
                }
            }
        });
        token
    }
}

impl VoiceEngine for MockVoiceEngine {
    fn speak(&mut self, utterance: &Utterance) -> Result<(), EngineError> {
        if let (Some(voices), Some(voice)) = (&self.config.voices, &utterance.params.voice) {
            if !voices.contains(voice) {
                return Err(EngineError::VoiceUnavailable(voice.clone()));
            }
        }

        let duration = self.duration_for(&utterance.text);
        let timer = self
            .is_timed()
            .then(|| self.arm_timer(utterance.id, duration));

        info!(
            utterance_id = %utterance.id,
            text = %preview(&utterance.text),
            "Speaking"
        );

        let mut inner = lock(&self.inner);
        inner.calls.push(EngineCall::Speak {
            id: utterance.id,
            text: utterance.text.clone(),
            params: utterance.params.clone(),
        });
        if let Some(previous) = inner.current.take() {
            if let Some(t) = previous.timer {
                t.cancel();
            }
            debug!(utterance_id = %previous.id, "Mock engine: preempted");
            inner.emit(EngineEvent::Cancelled(previous.id));
        }
        inner.current = Some(Playing {
            id: utterance.id,
            paused: false,
            remaining: duration,
            resumed_at: Instant::now(),
            timer,
        });
        inner.emit(EngineEvent::Started(utterance.id));
        Ok(())
    }

    fn pause(&mut self, at: Boundary) -> bool {
        let mut inner = lock(&self.inner);
        inner.calls.push(EngineCall::Pause(at));
        let Some(playing) = inner.current.as_mut() else {
            return false;
        };
        if playing.paused {
            return false;
        }
        if let Some(t) = playing.timer.take() {
            t.cancel();
        }
        playing.remaining = playing.remaining.saturating_sub(playing.resumed_at.elapsed());
        playing.paused = true;
        let id = playing.id;
        inner.emit(EngineEvent::Paused(id));
        true
    }

    fn resume(&mut self) -> bool {
        let (id, remaining) = {
            let mut inner = lock(&self.inner);
            inner.calls.push(EngineCall::Resume);
            match inner.current.as_mut() {
                Some(playing) if playing.paused => {
                    playing.paused = false;
                    playing.resumed_at = Instant::now();
                    (playing.id, playing.remaining)
                }
                _ => return false,
            }
        };

        let timer = self.is_timed().then(|| self.arm_timer(id, remaining));
        let mut inner = lock(&self.inner);
        if let Some(playing) = inner.current.as_mut() {
            playing.timer = timer;
        }
        inner.emit(EngineEvent::Continued(id));
        true
    }

    fn stop(&mut self, at: Boundary) -> bool {
        let mut inner = lock(&self.inner);
        inner.calls.push(EngineCall::Stop(at));
        let Some(playing) = inner.current.take() else {
            return false;
        };
        if let Some(t) = playing.timer {
            t.cancel();
        }
        debug!(utterance_id = %playing.id, "Mock engine: cancelled");
        inner.emit(EngineEvent::Cancelled(playing.id));
        true
    }

    fn is_speaking(&self) -> bool {
        lock(&self.inner).current.is_some()
    }

    fn update_params(&mut self, id: UtteranceId, params: &SynthesisParams) {
        lock(&self.inner).calls.push(EngineCall::UpdateParams {
            id,
            params: params.clone(),
        });
    }

    fn has_voice(&self, voice: &str) -> bool {
        self.config
            .voices
            .as_ref()
            .is_none_or(|voices| voices.iter().any(|v| v == voice))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ── Handle ───────────────────────────────────────────────────────

impl MockEngineHandle {
    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<EngineCall> {
        lock(&self.inner).calls.clone()
    }

    /// Texts passed to `speak`, in order.
    pub fn spoken(&self) -> Vec<String> {
        lock(&self.inner)
            .calls
            .iter()
            .filter_map(|c| match c {
                EngineCall::Speak { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of recorded calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&EngineCall) -> bool) -> usize {
        lock(&self.inner).calls.iter().filter(|c| pred(c)).count()
    }

    pub fn is_speaking(&self) -> bool {
        lock(&self.inner).current.is_some()
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.inner)
            .current
            .as_ref()
            .is_some_and(|p| p.paused)
    }

    /// Parameters of the last `speak` call.
    pub fn last_params(&self) -> Option<SynthesisParams> {
        lock(&self.inner).calls.iter().rev().find_map(|c| match c {
            EngineCall::Speak { params, .. } => Some(params.clone()),
            _ => None,
        })
    }

    /// End the in-flight utterance as if it had been spoken to the end.
    pub fn finish_current(&self) -> Option<UtteranceId> {
        let mut inner = lock(&self.inner);
        let playing = inner.current.take()?;
        if let Some(t) = playing.timer {
            t.cancel();
        }
        inner.emit(EngineEvent::Finished(playing.id));
        Some(playing.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::engine::event_channel;

    fn utterance(id: u64, text: &str) -> Utterance {
        Utterance::new(UtteranceId(id), text)
    }

    #[test]
    fn records_calls_in_order() {
        let (tx, mut rx) = event_channel();
        let (mut engine, handle) = MockVoiceEngine::manual(tx);

        engine.speak(&utterance(1, "one")).unwrap();
        assert!(engine.pause(Boundary::Word));
        assert!(engine.resume());
        assert!(engine.stop(Boundary::Word));

        let calls = handle.calls();
        assert_eq!(calls.len(), 4);
        assert!(matches!(calls[0], EngineCall::Speak { .. }));
        assert_eq!(calls[1], EngineCall::Pause(Boundary::Word));
        assert_eq!(calls[2], EngineCall::Resume);
        assert_eq!(calls[3], EngineCall::Stop(Boundary::Word));

        let id = UtteranceId(1);
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::Started(id));
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::Paused(id));
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::Continued(id));
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::Cancelled(id));
    }

    #[test]
    fn idle_engine_reports_nothing_to_do() {
        let (tx, _rx) = event_channel();
        let (mut engine, _handle) = MockVoiceEngine::manual(tx);
        assert!(!engine.pause(Boundary::Word));
        assert!(!engine.resume());
        assert!(!engine.stop(Boundary::Word));
        assert!(!engine.is_speaking());
    }

    #[test]
    fn finish_current_emits_finished() {
        let (tx, mut rx) = event_channel();
        let (mut engine, handle) = MockVoiceEngine::manual(tx);
        engine.speak(&utterance(4, "hi")).unwrap();
        assert_eq!(handle.finish_current(), Some(UtteranceId(4)));
        assert!(!handle.is_speaking());
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::Started(UtteranceId(4)));
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::Finished(UtteranceId(4)));
        assert_eq!(handle.finish_current(), None);
    }

    #[test]
    fn unknown_voice_is_rejected() {
        let (tx, _rx) = event_channel();
        let (engine, handle) = MockVoiceEngine::manual(tx);
        let mut engine = engine.with_voices(&["alex"]);
        assert!(engine.has_voice("alex"));
        assert!(!engine.has_voice("zarvox"));

        let mut u = utterance(1, "x");
        u.params.voice = Some("zarvox".to_string());
        assert!(matches!(
            engine.speak(&u),
            Err(EngineError::VoiceUnavailable(_))
        ));
        assert!(handle.spoken().is_empty());
    }

    #[test]
    fn inverted_duration_bounds_do_not_panic() {
        let (tx, _rx) = event_channel();
        let (engine, _handle) = MockVoiceEngine::new(
            MockEngineConfig {
                completion: MockCompletion::Timed {
                    ms_per_char: -5.0,
                    min_duration_ms: 500.0,
                    max_duration_ms: 100.0,
                },
                voices: None,
            },
            tx,
        );
        assert_eq!(engine.duration_for("hello"), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_engine_finishes_after_duration() {
        let (tx, mut rx) = event_channel();
        let (mut engine, handle) = MockVoiceEngine::timed(100.0, tx);
        // 5 chars * 100 ms = 500 ms
        engine.speak(&utterance(1, "hello")).unwrap();
        assert_eq!(rx.recv().await, Some(EngineEvent::Started(UtteranceId(1))));

        let start = Instant::now();
        assert_eq!(rx.recv().await, Some(EngineEvent::Finished(UtteranceId(1))));
        assert_eq!(start.elapsed(), Duration::from_millis(500));
        assert!(!handle.is_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_engine_pause_holds_completion() {
        let (tx, mut rx) = event_channel();
        let (mut engine, handle) = MockVoiceEngine::timed(100.0, tx);
        engine.speak(&utterance(1, "hello")).unwrap();
        rx.recv().await;

        sleep(Duration::from_millis(200)).await;
        assert!(engine.pause(Boundary::Word));
        assert_eq!(rx.recv().await, Some(EngineEvent::Paused(UtteranceId(1))));

        sleep(Duration::from_secs(5)).await;
        assert!(handle.is_paused());
        assert!(rx.try_recv().is_err());

        let resumed = Instant::now();
        assert!(engine.resume());
        assert_eq!(rx.recv().await, Some(EngineEvent::Continued(UtteranceId(1))));
        assert_eq!(rx.recv().await, Some(EngineEvent::Finished(UtteranceId(1))));
        assert_eq!(resumed.elapsed(), Duration::from_millis(300));
    }
}
